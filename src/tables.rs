//! Tabular HR data: employee master, leave records, and attendance logs.
//!
//! Each source is loaded into a column-oriented [`Table`] whose column names
//! are normalized (trimmed, lower-cased, spaces replaced by underscores) and
//! whose date columns hold `YYYY-MM-DD` strings or `null`.
//!
//! | Source | Format | Date columns |
//! |--------|--------|--------------|
//! | Employee master | CSV | names containing `date` or `joining` |
//! | Leave records | XLSX (first sheet) | names containing `date`, `start`, or `end` |
//! | Attendance logs | nested JSON | `date` |

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde_json::{Map, Number, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::TablesConfig;
use crate::xlsx::{self, Cell, XlsxError};

#[derive(Debug, Error)]
pub enum TableLoadError {
    #[error("data file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid CSV in {path}: {reason}")]
    Csv { path: PathBuf, reason: String },
    #[error("invalid spreadsheet {path}: {source}")]
    Xlsx {
        path: PathBuf,
        #[source]
        source: XlsxError,
    },
    #[error("invalid attendance JSON in {path}: {reason}")]
    Json { path: PathBuf, reason: String },
}

/// Which of the three HR sources a table holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    EmployeeMaster,
    LeaveRecords,
    AttendanceLogs,
}

impl TableKind {
    pub const ALL: [TableKind; 3] = [
        TableKind::EmployeeMaster,
        TableKind::LeaveRecords,
        TableKind::AttendanceLogs,
    ];

    /// Name the analysis agent uses to refer to the table.
    pub fn name(&self) -> &'static str {
        match self {
            TableKind::EmployeeMaster => "employees",
            TableKind::LeaveRecords => "leave_records",
            TableKind::AttendanceLogs => "attendance_logs",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            TableKind::EmployeeMaster => "employee master data, one row per employee",
            TableKind::LeaveRecords => "leave requests and balances",
            TableKind::AttendanceLogs => "daily check-in/check-out records per employee",
        }
    }

    /// Upload extension that feeds this table.
    pub fn extension(&self) -> &'static str {
        match self {
            TableKind::EmployeeMaster => "csv",
            TableKind::LeaveRecords => "xlsx",
            TableKind::AttendanceLogs => "json",
        }
    }

    pub fn from_extension(ext: &str) -> Option<TableKind> {
        TableKind::ALL
            .into_iter()
            .find(|k| k.extension().eq_ignore_ascii_case(ext))
    }

    pub fn source_path<'a>(&self, config: &'a TablesConfig) -> &'a Path {
        match self {
            TableKind::EmployeeMaster => &config.employee_master,
            TableKind::LeaveRecords => &config.leave_records,
            TableKind::AttendanceLogs => &config.attendance_logs,
        }
    }

    fn is_date_column(&self, column: &str) -> bool {
        match self {
            TableKind::EmployeeMaster => column.contains("date") || column.contains("joining"),
            TableKind::LeaveRecords => {
                column.contains("date") || column.contains("start") || column.contains("end")
            }
            TableKind::AttendanceLogs => column == "date",
        }
    }

    /// Parse the file at `path` as this kind of table.
    pub fn load(&self, path: &Path) -> Result<Table, TableLoadError> {
        if !path.is_file() {
            return Err(TableLoadError::NotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path).map_err(|source| TableLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match self {
            TableKind::EmployeeMaster => parse_employee_csv(&bytes, path),
            TableKind::LeaveRecords => parse_leave_xlsx(&bytes, path),
            TableKind::AttendanceLogs => parse_attendance_json(&bytes, path),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

/// A named, column-oriented table. All columns have the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
        }
    }

    /// Build a table from a header and rows; short rows are padded with `null`.
    pub fn from_rows(name: &str, header: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let mut columns: Vec<Column> = header
            .into_iter()
            .map(|name| Column {
                name,
                values: Vec::with_capacity(rows.len()),
            })
            .collect();
        for row in rows {
            let mut cells = row.into_iter();
            for column in columns.iter_mut() {
                column.values.push(cells.next().unwrap_or(Value::Null));
            }
        }
        Self {
            name: name.to_string(),
            columns,
        }
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        let wanted = normalize_column_name(name);
        self.columns.iter().find(|c| c.name == wanted)
    }

    /// Row `index` as a JSON object keyed by column name.
    pub fn row(&self, index: usize) -> Map<String, Value> {
        self.columns
            .iter()
            .map(|c| {
                let value = c.values.get(index).cloned().unwrap_or(Value::Null);
                (c.name.clone(), value)
            })
            .collect()
    }

    fn normalize_dates(&mut self, kind: TableKind, serial_numbers: bool) {
        for column in self.columns.iter_mut() {
            if kind.is_date_column(&column.name) {
                for value in column.values.iter_mut() {
                    *value = normalize_date(value, serial_numbers);
                }
            }
        }
    }
}

/// The three HR tables, always swapped together.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSet {
    pub employees: Table,
    pub leave_records: Table,
    pub attendance_logs: Table,
}

impl Default for TableSet {
    fn default() -> Self {
        Self {
            employees: Table::empty(TableKind::EmployeeMaster.name()),
            leave_records: Table::empty(TableKind::LeaveRecords.name()),
            attendance_logs: Table::empty(TableKind::AttendanceLogs.name()),
        }
    }
}

impl TableSet {
    /// Load all three sources. A missing source file yields an empty table
    /// instead of an error; any other failure aborts the whole load.
    /// Returns the kinds that were missing.
    pub fn load_available(config: &TablesConfig) -> Result<(Self, Vec<TableKind>), TableLoadError> {
        Self::load_except(config, None)
    }

    /// Like [`TableSet::load_available`], but `kind` is taken from `table`
    /// instead of its configured source.
    pub fn load_replacing(
        config: &TablesConfig,
        kind: TableKind,
        table: Table,
    ) -> Result<(Self, Vec<TableKind>), TableLoadError> {
        Self::load_except(config, Some((kind, table)))
    }

    fn load_except(
        config: &TablesConfig,
        replacement: Option<(TableKind, Table)>,
    ) -> Result<(Self, Vec<TableKind>), TableLoadError> {
        let mut set = Self::default();
        let mut missing = Vec::new();
        let skip = replacement.as_ref().map(|(kind, _)| *kind);
        for kind in TableKind::ALL {
            if Some(kind) == skip {
                continue;
            }
            match kind.load(kind.source_path(config)) {
                Ok(table) => *set.get_mut(kind) = table,
                Err(TableLoadError::NotFound(_)) => missing.push(kind),
                Err(e) => return Err(e),
            }
        }
        if let Some((kind, table)) = replacement {
            *set.get_mut(kind) = table;
        }
        Ok((set, missing))
    }

    pub fn get(&self, kind: TableKind) -> &Table {
        match kind {
            TableKind::EmployeeMaster => &self.employees,
            TableKind::LeaveRecords => &self.leave_records,
            TableKind::AttendanceLogs => &self.attendance_logs,
        }
    }

    pub fn get_mut(&mut self, kind: TableKind) -> &mut Table {
        match kind {
            TableKind::EmployeeMaster => &mut self.employees,
            TableKind::LeaveRecords => &mut self.leave_records,
            TableKind::AttendanceLogs => &mut self.attendance_logs,
        }
    }

    /// Look a table up by its agent-facing name.
    pub fn by_name(&self, name: &str) -> Option<&Table> {
        let wanted = name.trim().to_lowercase();
        TableKind::ALL
            .into_iter()
            .map(|k| self.get(k))
            .find(|t| t.name == wanted)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TableKind, &Table)> {
        TableKind::ALL.into_iter().map(move |k| (k, self.get(k)))
    }
}

pub fn normalize_column_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

const DATE_FORMATS: [&str; 8] = [
    "%Y-%m-%d", "%m/%d/%Y", "%d-%m-%Y", "%Y/%m/%d", "%d %b %Y", "%d %B %Y", "%b %d, %Y", "%Y%m%d",
];
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

/// Normalize one date cell to `YYYY-MM-DD`, or `null` if it cannot be parsed.
/// With `serial_numbers`, numeric cells are read as spreadsheet serial dates.
pub fn normalize_date(value: &Value, serial_numbers: bool) -> Value {
    let parsed = match value {
        Value::String(s) => parse_date(s),
        Value::Number(n) if serial_numbers => n.as_f64().and_then(from_serial),
        Value::Number(n) => parse_date(&n.to_string()),
        _ => None,
    };
    parsed
        .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
        .unwrap_or(Value::Null)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok().map(|dt| dt.date()))
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        })
}

/// Spreadsheet serial date (days since 1899-12-30).
fn from_serial(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_signed(Duration::days(serial.floor() as i64))
}

/// Infer a JSON scalar from CSV text.
fn infer_scalar(raw: &str) -> Value {
    let s = raw.trim();
    if s.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = s.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match s.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(s.to_string()),
    }
}

fn parse_employee_csv(bytes: &[u8], path: &Path) -> Result<Table, TableLoadError> {
    let csv_err = |e: csv::Error| TableLoadError::Csv {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(bytes);
    let header: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| normalize_column_name(h.trim_start_matches('\u{feff}')))
        .collect();
    if header.iter().all(|h| h.is_empty()) {
        return Err(TableLoadError::Csv {
            path: path.to_path_buf(),
            reason: "missing header row".to_string(),
        });
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        rows.push(record.iter().map(infer_scalar).collect());
    }

    let mut table = Table::from_rows(TableKind::EmployeeMaster.name(), header, rows);
    table.normalize_dates(TableKind::EmployeeMaster, false);
    Ok(table)
}

fn cell_to_value(cell: Cell) -> Value {
    match cell {
        Cell::Empty => Value::Null,
        Cell::Bool(b) => Value::Bool(b),
        Cell::Text(s) if s.trim().is_empty() => Value::Null,
        Cell::Text(s) => Value::String(s),
        Cell::Number(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            Value::Number((f as i64).into())
        }
        Cell::Number(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
    }
}

fn parse_leave_xlsx(bytes: &[u8], path: &Path) -> Result<Table, TableLoadError> {
    let mut grid = xlsx::read_first_sheet(bytes)
        .map_err(|source| TableLoadError::Xlsx {
            path: path.to_path_buf(),
            source,
        })?
        .into_iter();
    let header: Vec<String> = grid
        .next()
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(idx, cell)| match cell {
            Cell::Text(s) => normalize_column_name(&s),
            Cell::Number(n) => normalize_column_name(&n.to_string()),
            Cell::Bool(b) => b.to_string(),
            Cell::Empty => format!("unnamed:_{}", idx),
        })
        .collect();
    let rows: Vec<Vec<Value>> = grid
        .filter(|row| row.iter().any(|c| *c != Cell::Empty))
        .map(|row| row.into_iter().map(cell_to_value).collect())
        .collect();

    let mut table = Table::from_rows(TableKind::LeaveRecords.name(), header, rows);
    table.normalize_dates(TableKind::LeaveRecords, true);
    Ok(table)
}

const ATTENDANCE_COLUMNS: [&str; 7] = [
    "emp_id",
    "date",
    "check_in",
    "check_out",
    "location",
    "ip",
    "device",
];

fn parse_attendance_json(bytes: &[u8], path: &Path) -> Result<Table, TableLoadError> {
    let json_err = |reason: String| TableLoadError::Json {
        path: path.to_path_buf(),
        reason,
    };
    let root: Value = serde_json::from_slice(bytes).map_err(|e| json_err(e.to_string()))?;
    let employees = root
        .as_object()
        .ok_or_else(|| json_err("top level must be an object keyed by employee id".to_string()))?;

    let field = |obj: &Map<String, Value>, key: &str| obj.get(key).cloned().unwrap_or(Value::Null);
    let mut rows = Vec::new();
    for (emp_id, entry) in employees {
        let records = entry
            .get("records")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for record in records.iter().filter_map(Value::as_object) {
            let metadata = record
                .get("metadata")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            rows.push(vec![
                Value::String(emp_id.clone()),
                field(record, "date"),
                field(record, "check_in"),
                field(record, "check_out"),
                field(record, "location_logged"),
                field(&metadata, "ip"),
                field(&metadata, "device"),
            ]);
        }
    }

    let header = ATTENDANCE_COLUMNS.iter().map(|c| c.to_string()).collect();
    let mut table = Table::from_rows(TableKind::AttendanceLogs.name(), header, rows);
    table.normalize_dates(TableKind::AttendanceLogs, false);
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::File::create(&path)
            .unwrap()
            .write_all(body.as_bytes())
            .unwrap();
        path
    }

    #[test]
    fn column_names_are_normalized() {
        assert_eq!(normalize_column_name("  Date of Joining "), "date_of_joining");
        assert_eq!(normalize_column_name("Emp ID"), "emp_id");
    }

    #[test]
    fn dates_normalize_or_become_null() {
        assert_eq!(normalize_date(&json!("2024-01-05"), false), json!("2024-01-05"));
        assert_eq!(normalize_date(&json!("01/05/2024"), false), json!("2024-01-05"));
        assert_eq!(normalize_date(&json!("5 Jan 2024"), false), json!("2024-01-05"));
        assert_eq!(
            normalize_date(&json!("2024-01-05T09:12:00"), false),
            json!("2024-01-05")
        );
        assert_eq!(normalize_date(&json!("not a date"), false), Value::Null);
        assert_eq!(normalize_date(&Value::Null, false), Value::Null);
        assert_eq!(normalize_date(&json!(45296), true), json!("2024-01-05"));
    }

    #[test]
    fn employee_csv_loads_with_dates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "employee_master.csv",
            "Emp ID,Name,Department,Date of Joining,Salary\n\
             E1001,Asha Rao,Engineering,2019-03-04,85000\n\
             E1002,Ben Ito,Finance,bad-date,72000.5\n",
        );
        let table = TableKind::EmployeeMaster.load(&path).unwrap();
        assert_eq!(
            table.column_names(),
            vec!["emp_id", "name", "department", "date_of_joining", "salary"]
        );
        assert_eq!(table.row_count(), 2);
        let first = table.row(0);
        assert_eq!(first["emp_id"], json!("E1001"));
        assert_eq!(first["date_of_joining"], json!("2019-03-04"));
        assert_eq!(first["salary"], json!(85000));
        assert_eq!(table.row(1)["date_of_joining"], Value::Null);
    }

    #[test]
    fn attendance_json_is_flattened() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "attendance.json",
            r#"{
              "E1001": {"records": [
                {"date": "2024-02-01", "check_in": "09:02", "check_out": "17:45",
                 "location_logged": "HQ", "metadata": {"ip": "10.0.0.4", "device": "laptop"}},
                {"date": "02/02/2024", "check_in": "09:10", "check_out": null,
                 "location_logged": "Remote"}
              ]},
              "E1002": {"records": []}
            }"#,
        );
        let table = TableKind::AttendanceLogs.load(&path).unwrap();
        assert_eq!(table.column_names(), ATTENDANCE_COLUMNS.to_vec());
        assert_eq!(table.row_count(), 2);
        let second = table.row(1);
        assert_eq!(second["emp_id"], json!("E1001"));
        assert_eq!(second["date"], json!("2024-02-02"));
        assert_eq!(second["location"], json!("Remote"));
        assert_eq!(second["ip"], Value::Null);
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = TableKind::LeaveRecords
            .load(Path::new("/nonexistent/leave.xlsx"))
            .unwrap_err();
        assert!(matches!(err, TableLoadError::NotFound(_)));
    }

    #[test]
    fn malformed_attendance_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write(dir.path(), "a.json", "[1, 2, 3]");
        let err = TableKind::AttendanceLogs.load(&path).unwrap_err();
        assert!(matches!(err, TableLoadError::Json { .. }));
    }

    #[test]
    fn table_lookup_by_name() {
        let set = TableSet::default();
        assert!(set.by_name("Employees").is_some());
        assert!(set.by_name("payroll").is_none());
        assert_eq!(TableKind::from_extension("XLSX"), Some(TableKind::LeaveRecords));
        assert_eq!(TableKind::from_extension("pdf"), None);
    }

    #[test]
    fn load_available_tolerates_missing_but_not_corrupt_sources() {
        let dir = tempfile::TempDir::new().unwrap();
        let employees = write(dir.path(), "e.csv", "Emp ID,Name\nE1001,Asha Rao\n");
        let config = TablesConfig {
            employee_master: employees,
            leave_records: dir.path().join("missing.xlsx"),
            attendance_logs: dir.path().join("missing.json"),
        };
        let (set, missing) = TableSet::load_available(&config).unwrap();
        assert_eq!(set.employees.row_count(), 1);
        assert_eq!(set.leave_records.row_count(), 0);
        assert_eq!(missing, vec![TableKind::LeaveRecords, TableKind::AttendanceLogs]);

        let corrupt = TablesConfig {
            attendance_logs: write(dir.path(), "bad.json", "not json"),
            ..config
        };
        assert!(TableSet::load_available(&corrupt).is_err());
    }

    #[test]
    fn load_replacing_substitutes_one_table_and_checks_the_rest() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = TablesConfig {
            employee_master: write(dir.path(), "e.csv", "Emp ID,Name\nE1001,Asha Rao\n"),
            leave_records: dir.path().join("missing.xlsx"),
            attendance_logs: write(dir.path(), "bad.json", "not json"),
        };
        let fixed = Table::from_rows(
            TableKind::AttendanceLogs.name(),
            vec!["emp_id".to_string()],
            vec![vec![json!("E1001")], vec![json!("E1002")]],
        );

        let (set, missing) =
            TableSet::load_replacing(&config, TableKind::AttendanceLogs, fixed).unwrap();
        assert_eq!(set.employees.row_count(), 1);
        assert_eq!(set.attendance_logs.row_count(), 2);
        assert_eq!(missing, vec![TableKind::LeaveRecords]);

        let replacement = Table::empty(TableKind::EmployeeMaster.name());
        assert!(TableSet::load_replacing(&config, TableKind::EmployeeMaster, replacement).is_err());
    }
}
