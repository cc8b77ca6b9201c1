//! Tabular Store: the three HR tables plus the analysis agent bound to them.
//!
//! The tables live in one immutable [`TableSet`] behind a pointer that is
//! swapped as a whole, so readers see either the old three tables or the
//! new three, never a mix. Each swap bumps a generation counter; the cached
//! agent remembers the generation it was built for and is rebuilt when the
//! tables change. Reloads are serialized, so a slower reload can never swap
//! in tables older than the ones a later reload already installed.
//!
//! [`TabularStore::analyze`] never fails: errors come back as the text of
//! the [`AnalysisResult`].

use serde_json::Value;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

use crate::agent::{AnalysisAgent, AnalysisAgentFactory};
use crate::config::TablesConfig;
use crate::tables::{Table, TableKind, TableLoadError, TableSet};

/// Appended to every instruction sent to the analysis agent.
pub const FORMAT_DIRECTIVE: &str = "\n\nIMPORTANT: Provide the final answer as a readable sentence or a markdown table. Do NOT return raw JSON rows or tool output.";

/// Outcome of an analysis, always text.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub text: String,
}

impl AnalysisResult {
    /// Adapt a raw agent response: the `"output"` field of an object, the
    /// string itself, or the JSON rendering of anything else.
    pub fn from_response(response: Value) -> Self {
        let text = match response {
            Value::Object(mut map) => match map.remove("output") {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => Value::Object(map).to_string(),
            },
            Value::String(s) => s,
            other => other.to_string(),
        };
        Self { text }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            text: format!("Analysis Error: {}", message),
        }
    }
}

struct TableBundle {
    tables: Arc<TableSet>,
    generation: u64,
}

struct CachedAgent {
    generation: u64,
    agent: Arc<dyn AnalysisAgent>,
}

pub struct TabularStore {
    bundle: RwLock<Arc<TableBundle>>,
    agent: Mutex<Option<CachedAgent>>,
    reloading: Mutex<()>,
    factory: Arc<dyn AnalysisAgentFactory>,
    max_iterations: usize,
}

impl TabularStore {
    pub fn new(
        tables: TableSet,
        factory: Arc<dyn AnalysisAgentFactory>,
        max_iterations: usize,
    ) -> Self {
        Self {
            bundle: RwLock::new(Arc::new(TableBundle {
                tables: Arc::new(tables),
                generation: 0,
            })),
            agent: Mutex::new(None),
            reloading: Mutex::new(()),
            factory,
            max_iterations,
        }
    }

    fn current(&self) -> Arc<TableBundle> {
        match self.bundle.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// The tables currently served.
    pub fn tables(&self) -> Arc<TableSet> {
        Arc::clone(&self.current().tables)
    }

    /// Generation of the current tables; increases on every reload.
    pub fn generation(&self) -> u64 {
        self.current().generation
    }

    /// Replace all three tables at once and drop the cached agent.
    pub async fn reload_tables(&self, tables: TableSet) {
        {
            let mut guard = match self.bundle.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let generation = guard.generation + 1;
            *guard = Arc::new(TableBundle {
                tables: Arc::new(tables),
                generation,
            });
        }
        *self.agent.lock().await = None;

        let bundle = self.current();
        tracing::info!(
            generation = bundle.generation,
            employees = bundle.tables.employees.row_count(),
            leave_records = bundle.tables.leave_records.row_count(),
            attendance_logs = bundle.tables.attendance_logs.row_count(),
            "tables reloaded"
        );
    }

    /// Load all three sources and swap them in. A missing source becomes
    /// an empty table; any other load failure leaves the current tables in
    /// place and is returned. Returns the sources that were missing.
    pub async fn reload_from_sources(
        &self,
        config: &TablesConfig,
    ) -> Result<Vec<TableKind>, TableLoadError> {
        let _reloading = self.reloading.lock().await;
        let (tables, missing) = TableSet::load_available(config)?;
        warn_missing(config, &missing);
        self.reload_tables(tables).await;
        Ok(missing)
    }

    /// Install an upload that already parsed as `table` for `kind`.
    ///
    /// The other two sources are loaded first. `install` writes the upload
    /// over the configured source and runs only once the whole set has
    /// loaded; if loading or `install` fails, neither the files nor the
    /// served tables change.
    pub async fn replace_table<F, E>(
        &self,
        config: &TablesConfig,
        kind: TableKind,
        table: Table,
        install: F,
    ) -> Result<Vec<TableKind>, E>
    where
        F: FnOnce() -> Result<(), E>,
        E: From<TableLoadError>,
    {
        let _reloading = self.reloading.lock().await;
        let (tables, missing) = TableSet::load_replacing(config, kind, table)?;
        install()?;
        warn_missing(config, &missing);
        self.reload_tables(tables).await;
        Ok(missing)
    }

    async fn agent_for(&self, bundle: &TableBundle) -> Arc<dyn AnalysisAgent> {
        let mut cached = self.agent.lock().await;
        if let Some(existing) = cached.as_ref() {
            if existing.generation == bundle.generation {
                return Arc::clone(&existing.agent);
            }
        }
        tracing::debug!(generation = bundle.generation, "building analysis agent");
        let agent = self.factory.build(Arc::clone(&bundle.tables));
        *cached = Some(CachedAgent {
            generation: bundle.generation,
            agent: Arc::clone(&agent),
        });
        agent
    }

    /// Answer `instruction` from the tables.
    pub async fn analyze(&self, instruction: &str) -> AnalysisResult {
        let bundle = self.current();
        let agent = self.agent_for(&bundle).await;
        let input = format!("{}{}", instruction, FORMAT_DIRECTIVE);

        match agent.invoke(&input, self.max_iterations).await {
            Ok(response) => AnalysisResult::from_response(response),
            Err(e) => {
                tracing::warn!(error = %e, "table analysis failed");
                AnalysisResult::error(format!("{:#}", e))
            }
        }
    }
}

fn warn_missing(config: &TablesConfig, missing: &[TableKind]) {
    for kind in missing {
        tracing::warn!(
            table = kind.name(),
            path = %kind.source_path(config).display(),
            "data file missing, serving an empty table"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers with the employee count of the tables it was built for.
    struct CountingAgent {
        tables: Arc<TableSet>,
    }

    #[async_trait]
    impl AnalysisAgent for CountingAgent {
        async fn invoke(&self, input: &str, max_iterations: usize) -> anyhow::Result<Value> {
            if input.starts_with("fail") {
                anyhow::bail!("agent exploded");
            }
            if input.starts_with("bare") {
                return Ok(json!(["not", "an", "object"]));
            }
            Ok(json!({
                "output": format!("{} employees (cap {})", self.tables.employees.row_count(), max_iterations),
                "input": input,
            }))
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        builds: AtomicUsize,
    }

    impl AnalysisAgentFactory for CountingFactory {
        fn build(&self, tables: Arc<TableSet>) -> Arc<dyn AnalysisAgent> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Arc::new(CountingAgent { tables })
        }
    }

    fn with_employees(n: usize) -> TableSet {
        TableSet {
            employees: Table::from_rows(
                "employees",
                vec!["emp_id".into()],
                (0..n).map(|i| vec![json!(format!("E{}", 1000 + i))]).collect(),
            ),
            ..TableSet::default()
        }
    }

    #[test]
    fn adapter_handles_every_shape() {
        assert_eq!(
            AnalysisResult::from_response(json!({"output": "3 rows", "input": "q"})).text,
            "3 rows"
        );
        assert_eq!(AnalysisResult::from_response(json!("plain")).text, "plain");
        assert_eq!(AnalysisResult::from_response(json!({"output": 7})).text, "7");
        assert_eq!(AnalysisResult::from_response(json!([1, 2])).text, "[1,2]");
    }

    #[tokio::test]
    async fn agent_is_cached_until_reload() {
        let factory = Arc::new(CountingFactory::default());
        let store = TabularStore::new(with_employees(2), factory.clone(), 30);

        assert_eq!(store.analyze("count").await.text, "2 employees (cap 30)");
        assert_eq!(store.analyze("count").await.text, "2 employees (cap 30)");
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);

        store.reload_tables(with_employees(5)).await;
        assert_eq!(store.analyze("count").await.text, "5 employees (cap 30)");
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
        assert_eq!(store.generation(), 1);
    }

    #[tokio::test]
    async fn failures_become_text() {
        let store = TabularStore::new(
            TableSet::default(),
            Arc::new(CountingFactory::default()),
            30,
        );
        let result = store.analyze("fail please").await;
        assert!(result.text.starts_with("Analysis Error: "));
        assert!(result.text.contains("agent exploded"));

        let result = store.analyze("bare please").await;
        assert_eq!(result.text, "[\"not\",\"an\",\"object\"]");
    }

    #[tokio::test]
    async fn corrupt_source_reload_keeps_old_tables() {
        let store = TabularStore::new(
            with_employees(3),
            Arc::new(CountingFactory::default()),
            30,
        );
        let dir = tempfile::TempDir::new().unwrap();
        let corrupt = dir.path().join("attendance.json");
        std::fs::write(&corrupt, "{ not json").unwrap();
        let config = TablesConfig {
            employee_master: dir.path().join("employees.csv"),
            leave_records: dir.path().join("leave.xlsx"),
            attendance_logs: corrupt,
        };
        assert!(store.reload_from_sources(&config).await.is_err());
        assert_eq!(store.tables().employees.row_count(), 3);
        assert_eq!(store.generation(), 0);

        std::fs::remove_file(&config.attendance_logs).unwrap();
        let missing = store.reload_from_sources(&config).await.unwrap();
        assert_eq!(missing.len(), 3);
        assert_eq!(store.tables().employees.row_count(), 0);
        assert_eq!(store.generation(), 1);
    }

    #[tokio::test]
    async fn readers_never_see_mixed_tables() {
        let store = Arc::new(TabularStore::new(
            with_employees(1),
            Arc::new(CountingFactory::default()),
            30,
        ));
        let reader = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for _ in 0..500 {
                    let tables = store.tables();
                    let n = tables.employees.row_count();
                    // Each reload writes n employees and n leave rows together.
                    assert_eq!(tables.leave_records.row_count(), if n == 1 { 0 } else { n });
                    tokio::task::yield_now().await;
                }
            })
        };
        for n in 2..50 {
            let mut set = with_employees(n);
            set.leave_records = Table::from_rows(
                "leave_records",
                vec!["emp_id".into()],
                (0..n).map(|i| vec![json!(i)]).collect(),
            );
            store.reload_tables(set).await;
            tokio::task::yield_now().await;
        }
        reader.await.unwrap();
    }

    fn sources(dir: &std::path::Path) -> TablesConfig {
        TablesConfig {
            employee_master: dir.join("employees.csv"),
            leave_records: dir.join("leave.xlsx"),
            attendance_logs: dir.join("attendance.json"),
        }
    }

    #[tokio::test]
    async fn replace_table_installs_only_after_the_set_loads() {
        let store = TabularStore::new(
            with_employees(3),
            Arc::new(CountingFactory::default()),
            30,
        );
        let dir = tempfile::TempDir::new().unwrap();
        let config = sources(dir.path());
        std::fs::write(&config.attendance_logs, "{ not json").unwrap();

        let mut installed = false;
        let result: Result<_, TableLoadError> = store
            .replace_table(&config, TableKind::EmployeeMaster, with_employees(5).employees, || {
                installed = true;
                Ok(())
            })
            .await;
        assert!(result.is_err());
        assert!(!installed);
        assert_eq!(store.tables().employees.row_count(), 3);

        let result: Result<_, anyhow::Error> = store
            .replace_table(&config, TableKind::AttendanceLogs, Table::empty("attendance_logs"), || {
                anyhow::bail!("disk full")
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.generation(), 0);

        std::fs::remove_file(&config.attendance_logs).unwrap();
        let missing = store
            .replace_table(&config, TableKind::EmployeeMaster, with_employees(5).employees, || {
                Ok::<_, TableLoadError>(())
            })
            .await
            .unwrap();
        assert_eq!(missing, vec![TableKind::LeaveRecords, TableKind::AttendanceLogs]);
        assert_eq!(store.tables().employees.row_count(), 5);
        assert_eq!(store.generation(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_uploads_of_different_tables_both_land() {
        let store = Arc::new(TabularStore::new(
            TableSet::default(),
            Arc::new(CountingFactory::default()),
            30,
        ));
        let dir = tempfile::TempDir::new().unwrap();
        let config = Arc::new(sources(dir.path()));

        for round in 1..20usize {
            let ids: Vec<String> = (0..round).map(|i| format!("E{}", 1000 + i)).collect();

            let employees = {
                let (store, config) = (Arc::clone(&store), Arc::clone(&config));
                let csv = format!("Emp ID\n{}\n", ids.join("\n"));
                tokio::spawn(async move {
                    let table = with_employees(round).employees;
                    store
                        .replace_table(&config, TableKind::EmployeeMaster, table, || {
                            std::fs::write(&config.employee_master, csv).map_err(anyhow::Error::from)
                        })
                        .await
                })
            };
            let attendance = {
                let (store, config) = (Arc::clone(&store), Arc::clone(&config));
                let logs: serde_json::Map<String, Value> = ids
                    .iter()
                    .map(|id| (id.clone(), json!({"records": [{"date": "2024-01-02"}]})))
                    .collect();
                let body = Value::Object(logs).to_string();
                tokio::spawn(async move {
                    let table = Table::from_rows(
                        "attendance_logs",
                        vec!["emp_id".into()],
                        (0..round).map(|i| vec![json!(i)]).collect(),
                    );
                    store
                        .replace_table(&config, TableKind::AttendanceLogs, table, || {
                            std::fs::write(&config.attendance_logs, body).map_err(anyhow::Error::from)
                        })
                        .await
                })
            };
            employees.await.unwrap().unwrap();
            attendance.await.unwrap().unwrap();

            let tables = store.tables();
            assert_eq!(tables.employees.row_count(), round);
            assert_eq!(tables.attendance_logs.row_count(), round);
        }
    }
}
