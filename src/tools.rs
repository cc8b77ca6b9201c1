//! Table tools available to the analysis agent.
//!
//! Every tool takes a JSON object of parameters and returns a JSON value
//! that is shown to the agent as the observation for its action. Tools only
//! read the [`TableSet`] they are given, so an agent bound to one snapshot
//! can never observe rows from another.
//!
//! # Built-in tools
//!
//! | Tool | Purpose |
//! |------|---------|
//! | `list_tables` | Names, row counts, and columns of every table |
//! | `describe` | Per-column non-null counts and sample values |
//! | `head` | First rows of a table |
//! | `filter` | Rows matching conditions |
//! | `aggregate` | count / sum / mean / min / max / distinct, optionally grouped |
//! | `lookup` | Rows in any table containing an exact value (e.g. an employee id) |
//!
//! # Conditions
//!
//! `filter` and `aggregate` accept a `where` parameter, either a list of
//! `{"column", "op", "value"}` objects (`op` is one of `eq`, `ne`, `gt`,
//! `gte`, `lt`, `lte`, `contains`) or an object shorthand `{"emp_id": "E1001"}`
//! meaning equality on each key.

use anyhow::{bail, Result};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::tables::{Column, Table, TableSet};

const MAX_ROWS: usize = 100;
static NULL: Value = Value::Null;
const DEFAULT_ROWS: usize = 20;

// ═══════════════════════════════════════════════════════════════════════
// Tool Trait
// ═══════════════════════════════════════════════════════════════════════

pub trait TableTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema of the accepted parameters.
    fn parameters_schema(&self) -> Value;
    fn execute(&self, params: &Value, tables: &TableSet) -> Result<Value>;
}

// ═══════════════════════════════════════════════════════════════════════
// Parameter Helpers
// ═══════════════════════════════════════════════════════════════════════

fn table_param<'a>(params: &Value, tables: &'a TableSet) -> Result<&'a Table> {
    let name = params["table"].as_str().unwrap_or("");
    if name.trim().is_empty() {
        bail!("'table' is required (one of: employees, leave_records, attendance_logs)");
    }
    tables.by_name(name).ok_or_else(|| {
        anyhow::anyhow!(
            "unknown table '{}' (one of: employees, leave_records, attendance_logs)",
            name
        )
    })
}

fn limit_param(params: &Value, default: usize) -> usize {
    params["limit"]
        .as_u64()
        .or_else(|| params["n"].as_u64())
        .map(|n| n as usize)
        .unwrap_or(default)
        .clamp(1, MAX_ROWS)
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn compare(left: &Value, right: &Value) -> Ordering {
    match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        _ => display(left).to_lowercase().cmp(&display(right).to_lowercase()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

impl Op {
    fn parse(raw: &str) -> Result<Op> {
        Ok(match raw.trim().to_lowercase().as_str() {
            "eq" | "=" | "==" => Op::Eq,
            "ne" | "!=" => Op::Ne,
            "gt" | ">" => Op::Gt,
            "gte" | ">=" => Op::Gte,
            "lt" | "<" => Op::Lt,
            "lte" | "<=" => Op::Lte,
            "contains" | "like" => Op::Contains,
            other => bail!("unknown operator '{}'", other),
        })
    }
}

#[derive(Debug, Clone)]
struct Condition {
    column: String,
    op: Op,
    value: Value,
}

impl Condition {
    fn matches(&self, cell: &Value) -> bool {
        if cell.is_null() {
            return match self.op {
                Op::Eq => self.value.is_null(),
                Op::Ne => !self.value.is_null(),
                _ => false,
            };
        }
        match self.op {
            Op::Eq => compare(cell, &self.value) == Ordering::Equal,
            Op::Ne => compare(cell, &self.value) != Ordering::Equal,
            Op::Gt => compare(cell, &self.value) == Ordering::Greater,
            Op::Gte => compare(cell, &self.value) != Ordering::Less,
            Op::Lt => compare(cell, &self.value) == Ordering::Less,
            Op::Lte => compare(cell, &self.value) != Ordering::Greater,
            Op::Contains => display(cell)
                .to_lowercase()
                .contains(&display(&self.value).to_lowercase()),
        }
    }
}

fn conditions_param(params: &Value, table: &Table) -> Result<Vec<Condition>> {
    let conditions = match &params["where"] {
        Value::Null => Vec::new(),
        Value::Object(map) => map
            .iter()
            .map(|(column, value)| Condition {
                column: column.clone(),
                op: Op::Eq,
                value: value.clone(),
            })
            .collect(),
        Value::Array(items) => items
            .iter()
            .map(|item| -> Result<Condition> {
                let column = item["column"]
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("each condition needs a 'column'"))?;
                Ok(Condition {
                    column: column.to_string(),
                    op: Op::parse(item["op"].as_str().unwrap_or("eq"))?,
                    value: item["value"].clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?,
        _ => bail!("'where' must be an object or a list of conditions"),
    };
    for c in &conditions {
        if table.column(&c.column).is_none() {
            bail!(
                "unknown column '{}' in {} (columns: {})",
                c.column,
                table.name,
                table.column_names().join(", ")
            );
        }
    }
    Ok(conditions)
}

fn matching_rows(table: &Table, conditions: &[Condition]) -> Vec<usize> {
    let columns: Vec<_> = conditions
        .iter()
        .filter_map(|c| table.column(&c.column).map(|col| (c, col)))
        .collect();
    (0..table.row_count())
        .filter(|&i| {
            columns
                .iter()
                .all(|(c, col)| c.matches(col.values.get(i).unwrap_or(&NULL)))
        })
        .collect()
}

/// Cell `row` of `column`, or `marker` when aggregating whole rows.
fn cell_or<'a>(column: Option<&'a Column>, row: usize, marker: &'a Value) -> &'a Value {
    match column {
        Some(col) => col.values.get(row).unwrap_or(&NULL),
        None => marker,
    }
}

fn project(table: &Table, row: usize, columns: Option<&[String]>) -> Map<String, Value> {
    let full = table.row(row);
    match columns {
        Some(wanted) => full
            .into_iter()
            .filter(|(name, _)| wanted.iter().any(|w| w.eq_ignore_ascii_case(name)))
            .collect(),
        None => full,
    }
}

fn columns_param(params: &Value) -> Option<Vec<String>> {
    params["columns"].as_array().map(|cols| {
        cols.iter()
            .filter_map(Value::as_str)
            .map(crate::tables::normalize_column_name)
            .collect()
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in Tools
// ═══════════════════════════════════════════════════════════════════════

pub struct ListTablesTool;

impl TableTool for ListTablesTool {
    fn name(&self) -> &str {
        "list_tables"
    }

    fn description(&self) -> &str {
        "List the available tables with their row counts and column names"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn execute(&self, _params: &Value, tables: &TableSet) -> Result<Value> {
        let listed: Vec<Value> = tables
            .iter()
            .map(|(kind, table)| {
                json!({
                    "table": table.name,
                    "description": kind.describe(),
                    "rows": table.row_count(),
                    "columns": table.column_names(),
                })
            })
            .collect();
        Ok(json!({ "tables": listed }))
    }
}

pub struct DescribeTool;

impl TableTool for DescribeTool {
    fn name(&self) -> &str {
        "describe"
    }

    fn description(&self) -> &str {
        "Describe each column of a table: non-null count and a few sample values"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "table": { "type": "string" } },
            "required": ["table"]
        })
    }

    fn execute(&self, params: &Value, tables: &TableSet) -> Result<Value> {
        let table = table_param(params, tables)?;
        let columns: Vec<Value> = table
            .columns
            .iter()
            .map(|col| {
                let non_null = col.values.iter().filter(|v| !v.is_null()).count();
                let samples: BTreeSet<String> = col
                    .values
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(display)
                    .take(50)
                    .collect();
                json!({
                    "column": col.name,
                    "non_null": non_null,
                    "numeric": col.values.iter().filter(|v| !v.is_null()).all(|v| as_number(v).is_some()) && non_null > 0,
                    "samples": samples.into_iter().take(3).collect::<Vec<_>>(),
                })
            })
            .collect();
        Ok(json!({ "table": table.name, "rows": table.row_count(), "columns": columns }))
    }
}

pub struct HeadTool;

impl TableTool for HeadTool {
    fn name(&self) -> &str {
        "head"
    }

    fn description(&self) -> &str {
        "Show the first n rows of a table"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table": { "type": "string" },
                "n": { "type": "integer", "default": 5 }
            },
            "required": ["table"]
        })
    }

    fn execute(&self, params: &Value, tables: &TableSet) -> Result<Value> {
        let table = table_param(params, tables)?;
        let n = limit_param(params, 5).min(table.row_count());
        let rows: Vec<Map<String, Value>> = (0..n).map(|i| table.row(i)).collect();
        Ok(json!({ "table": table.name, "rows": rows }))
    }
}

pub struct FilterTool;

impl TableTool for FilterTool {
    fn name(&self) -> &str {
        "filter"
    }

    fn description(&self) -> &str {
        "Return rows of a table matching all conditions in 'where'; optional 'columns' and 'limit'"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table": { "type": "string" },
                "where": {
                    "description": "Object of column equalities, or list of {column, op, value}",
                    "oneOf": [{ "type": "object" }, { "type": "array" }]
                },
                "columns": { "type": "array", "items": { "type": "string" } },
                "limit": { "type": "integer", "default": DEFAULT_ROWS }
            },
            "required": ["table"]
        })
    }

    fn execute(&self, params: &Value, tables: &TableSet) -> Result<Value> {
        let table = table_param(params, tables)?;
        let conditions = conditions_param(params, table)?;
        let columns = columns_param(params);
        let limit = limit_param(params, DEFAULT_ROWS);
        let matched = matching_rows(table, &conditions);
        let rows: Vec<Map<String, Value>> = matched
            .iter()
            .take(limit)
            .map(|&i| project(table, i, columns.as_deref()))
            .collect();
        Ok(json!({
            "table": table.name,
            "matched": matched.len(),
            "rows": rows,
            "truncated": matched.len() > limit,
        }))
    }
}

pub struct AggregateTool;

#[derive(Debug, Clone, Copy)]
enum AggFunc {
    Count,
    Sum,
    Mean,
    Min,
    Max,
    Distinct,
}

impl AggFunc {
    fn parse(raw: &str) -> Result<AggFunc> {
        Ok(match raw.trim().to_lowercase().as_str() {
            "count" => AggFunc::Count,
            "sum" => AggFunc::Sum,
            "mean" | "avg" | "average" => AggFunc::Mean,
            "min" => AggFunc::Min,
            "max" => AggFunc::Max,
            "distinct" | "unique" => AggFunc::Distinct,
            other => bail!("unknown aggregate '{}'", other),
        })
    }

    fn apply(&self, values: &[&Value]) -> Value {
        let present: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();
        let numbers: Vec<f64> = present.iter().filter_map(|v| as_number(v)).collect();
        match self {
            AggFunc::Count => json!(present.len()),
            AggFunc::Sum => json!(numbers.iter().sum::<f64>()),
            AggFunc::Mean if numbers.is_empty() => Value::Null,
            AggFunc::Mean => json!(numbers.iter().sum::<f64>() / numbers.len() as f64),
            AggFunc::Min => present
                .iter()
                .min_by(|a, b| compare(a, b))
                .map(|v| (*v).clone())
                .unwrap_or(Value::Null),
            AggFunc::Max => present
                .iter()
                .max_by(|a, b| compare(a, b))
                .map(|v| (*v).clone())
                .unwrap_or(Value::Null),
            AggFunc::Distinct => {
                let unique: BTreeSet<String> = present.iter().map(|v| display(v)).collect();
                json!({
                    "count": unique.len(),
                    "values": unique.into_iter().take(50).collect::<Vec<_>>(),
                })
            }
        }
    }
}

impl TableTool for AggregateTool {
    fn name(&self) -> &str {
        "aggregate"
    }

    fn description(&self) -> &str {
        "Aggregate a column (count, sum, mean, min, max, distinct), optionally grouped by another column and filtered with 'where'"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table": { "type": "string" },
                "column": { "type": "string", "description": "Column to aggregate; omit to count rows" },
                "func": { "type": "string", "enum": ["count", "sum", "mean", "min", "max", "distinct"] },
                "group_by": { "type": "string" },
                "where": { "oneOf": [{ "type": "object" }, { "type": "array" }] }
            },
            "required": ["table", "func"]
        })
    }

    fn execute(&self, params: &Value, tables: &TableSet) -> Result<Value> {
        let table = table_param(params, tables)?;
        let func = AggFunc::parse(params["func"].as_str().unwrap_or("count"))?;
        let conditions = conditions_param(params, table)?;
        let rows = matching_rows(table, &conditions);

        let column = match params["column"].as_str() {
            Some(name) => Some(table.column(name).ok_or_else(|| {
                anyhow::anyhow!("unknown column '{}' in {}", name, table.name)
            })?),
            None => None,
        };
        let row_marker = Value::Bool(true);

        match params["group_by"].as_str() {
            None => {
                let values: Vec<&Value> = rows
                    .iter()
                    .map(|&i| cell_or(column, i, &row_marker))
                    .collect();
                Ok(json!({ "table": table.name, "rows": rows.len(), "result": func.apply(&values) }))
            }
            Some(group_name) => {
                let group_col = table.column(group_name).ok_or_else(|| {
                    anyhow::anyhow!("unknown group_by column '{}' in {}", group_name, table.name)
                })?;
                let mut groups: BTreeMap<String, Vec<&Value>> = BTreeMap::new();
                for &i in &rows {
                    let key = display(group_col.values.get(i).unwrap_or(&NULL));
                    groups.entry(key).or_default().push(cell_or(column, i, &row_marker));
                }
                let results: Vec<Value> = groups
                    .iter()
                    .take(MAX_ROWS)
                    .map(|(key, values)| json!({ "group": key, "result": func.apply(values) }))
                    .collect();
                Ok(json!({ "table": table.name, "groups": results, "group_count": groups.len() }))
            }
        }
    }
}

pub struct LookupTool;

impl TableTool for LookupTool {
    fn name(&self) -> &str {
        "lookup"
    }

    fn description(&self) -> &str {
        "Find rows in every table where any cell equals 'value' (case-insensitive), e.g. an employee id"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "value": { "type": "string" },
                "limit": { "type": "integer", "default": DEFAULT_ROWS }
            },
            "required": ["value"]
        })
    }

    fn execute(&self, params: &Value, tables: &TableSet) -> Result<Value> {
        let needle = match &params["value"] {
            Value::Null => bail!("'value' is required"),
            other => display(other),
        };
        if needle.trim().is_empty() {
            bail!("'value' must not be empty");
        }
        let target = Value::String(needle.trim().to_string());
        let limit = limit_param(params, DEFAULT_ROWS);

        let mut found = Map::new();
        for (_, table) in tables.iter() {
            let hits: Vec<usize> = (0..table.row_count())
                .filter(|&i| {
                    table.columns.iter().any(|col| {
                        col.values
                            .get(i)
                            .is_some_and(|v| !v.is_null() && compare(v, &target) == Ordering::Equal)
                    })
                })
                .collect();
            if !hits.is_empty() {
                let rows: Vec<Map<String, Value>> =
                    hits.iter().take(limit).map(|&i| table.row(i)).collect();
                found.insert(
                    table.name.clone(),
                    json!({ "matched": hits.len(), "rows": rows }),
                );
            }
        }
        Ok(json!({ "value": target, "tables": found }))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

pub struct ToolRegistry {
    tools: Vec<Box<dyn TableTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with every built-in table tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ListTablesTool));
        registry.register(Box::new(DescribeTool));
        registry.register(Box::new(HeadTool));
        registry.register(Box::new(FilterTool));
        registry.register(Box::new(AggregateTool));
        registry.register(Box::new(LookupTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn TableTool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn TableTool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn TableTool> {
        let name = name.trim();
        self.tools
            .iter()
            .find(|t| t.name().eq_ignore_ascii_case(name))
            .map(|t| t.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
