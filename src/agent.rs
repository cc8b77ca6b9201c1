//! Reasoning agent for questions over the HR tables.
//!
//! [`ReactAgent`] runs a zero-shot ReAct loop: the model sees the table
//! tools and a preview of every table, then alternates between choosing a
//! tool (`Action:` / `Action Input:`) and reading its result
//! (`Observation:`) until it emits `Final Answer:`.
//!
//! ```text
//! Question: How many leave days has E1001 taken?
//! Thought: I should look up the employee's leave records.
//! Action: aggregate
//! Action Input: {"table": "leave_records", "column": "days", "func": "sum", "where": {"emp_id": "E1001"}}
//! Observation: {"result": 4.0, ...}
//! Thought: I now know the final answer
//! Final Answer: E1001 has taken 4 days of leave.
//! ```
//!
//! Malformed model output and tool errors are fed back as observations
//! rather than aborting the run. The loop is bounded by `max_iterations`.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

use crate::llm::TextCompletion;
use crate::models::excerpt;
use crate::tables::TableSet;
use crate::tools::ToolRegistry;

/// Longest observation passed back to the model, in characters.
const MAX_OBSERVATION_CHARS: usize = 4000;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent stopped due to iteration limit ({0} iterations) before reaching a final answer")]
    IterationLimit(usize),
    #[error("text completion failed: {0}")]
    Completion(String),
}

/// An agent able to answer a natural-language instruction over tables.
///
/// The response is loosely shaped: callers must not assume more than a JSON
/// value and should go through `AnalysisResult::from_response`.
#[async_trait]
pub trait AnalysisAgent: Send + Sync {
    async fn invoke(&self, input: &str, max_iterations: usize) -> Result<Value>;
}

/// Builds an agent bound to one immutable table snapshot.
pub trait AnalysisAgentFactory: Send + Sync {
    fn build(&self, tables: Arc<TableSet>) -> Arc<dyn AnalysisAgent>;
}

pub struct ReactAgentFactory {
    llm: Arc<dyn TextCompletion>,
    head_rows: usize,
}

impl ReactAgentFactory {
    pub fn new(llm: Arc<dyn TextCompletion>, head_rows: usize) -> Self {
        Self { llm, head_rows }
    }
}

impl AnalysisAgentFactory for ReactAgentFactory {
    fn build(&self, tables: Arc<TableSet>) -> Arc<dyn AnalysisAgent> {
        Arc::new(ReactAgent::new(
            Arc::clone(&self.llm),
            tables,
            self.head_rows,
        ))
    }
}

pub struct ReactAgent {
    llm: Arc<dyn TextCompletion>,
    tables: Arc<TableSet>,
    tools: ToolRegistry,
    head_rows: usize,
}

#[derive(Debug, PartialEq)]
enum Step {
    Final(String),
    Action { tool: String, input: String },
    Malformed(&'static str),
}

impl ReactAgent {
    pub fn new(llm: Arc<dyn TextCompletion>, tables: Arc<TableSet>, head_rows: usize) -> Self {
        Self {
            llm,
            tables,
            tools: ToolRegistry::with_builtins(),
            head_rows,
        }
    }

    fn preamble(&self) -> String {
        let mut out = String::from(
            "You are working with three tables of HR data: employee master records, \
             leave records, and attendance logs. Dates are formatted YYYY-MM-DD.\n\n",
        );
        for (kind, table) in self.tables.iter() {
            out.push_str(&format!(
                "Table `{}` ({}), {} rows, columns: {}\n",
                table.name,
                kind.describe(),
                table.row_count(),
                table.column_names().join(", ")
            ));
            for i in 0..self.head_rows.min(table.row_count()) {
                out.push_str(&format!("  {}\n", Value::Object(table.row(i))));
            }
        }
        out.push_str("\nYou have access to the following tools:\n\n");
        for tool in self.tools.tools() {
            out.push_str(&format!(
                "{}: {} Parameters: {}\n",
                tool.name(),
                tool.description(),
                tool.parameters_schema()
            ));
        }
        out
    }

    fn prompt(&self, preamble: &str, input: &str, scratchpad: &str) -> String {
        format!(
            "{preamble}\n\
             Use the following format:\n\n\
             Question: the input question you must answer\n\
             Thought: you should always think about what to do\n\
             Action: the action to take, should be one of [{names}]\n\
             Action Input: the input to the action, as a single JSON object\n\
             Observation: the result of the action\n\
             ... (this Thought/Action/Action Input/Observation can repeat N times)\n\
             Thought: I now know the final answer\n\
             Final Answer: the final answer to the original input question\n\n\
             Begin!\n\n\
             Question: {input}\n\
             Thought:{scratchpad}",
            names = self.tools.names().join(", "),
        )
    }

    fn run_tool(&self, tool: &str, raw_input: &str) -> String {
        let Some(found) = self.tools.find(tool) else {
            return format!(
                "{} is not a valid tool, try one of [{}].",
                tool,
                self.tools.names().join(", ")
            );
        };
        let params = match parse_action_input(raw_input) {
            Ok(params) => params,
            Err(msg) => return msg,
        };
        match found.execute(&params, &self.tables) {
            Ok(value) => excerpt(&value.to_string(), MAX_OBSERVATION_CHARS),
            Err(e) => format!("Error: {}", e),
        }
    }
}

#[async_trait]
impl AnalysisAgent for ReactAgent {
    async fn invoke(&self, input: &str, max_iterations: usize) -> Result<Value> {
        let preamble = self.preamble();
        let mut scratchpad = String::new();

        for iteration in 1..=max_iterations {
            let prompt = self.prompt(&preamble, input, &scratchpad);
            let output = self
                .llm
                .complete(&prompt)
                .await
                .map_err(|e| AgentError::Completion(format!("{:#}", e)))?;
            let output = truncate_hallucinated_observation(&output);

            let observation = match parse_step(output) {
                Step::Final(answer) => {
                    tracing::debug!(iteration, "analysis agent finished");
                    return Ok(json!({
                        "input": input,
                        "output": answer,
                        "iterations": iteration,
                    }));
                }
                Step::Action { tool, input: raw } => {
                    tracing::debug!(iteration, tool = %tool, "analysis agent action");
                    self.run_tool(&tool, &raw)
                }
                Step::Malformed(msg) => {
                    tracing::debug!(iteration, "analysis agent produced malformed step");
                    msg.to_string()
                }
            };
            scratchpad.push_str(&format!(
                " {}\nObservation: {}\nThought:",
                output.trim(),
                observation
            ));
        }

        Err(AgentError::IterationLimit(max_iterations).into())
    }
}

/// Models sometimes keep writing past the action and invent their own
/// observation; everything from that point on is discarded.
fn truncate_hallucinated_observation(output: &str) -> &str {
    match output.find("\nObservation:") {
        Some(idx) => &output[..idx],
        None => output,
    }
}

fn parse_step(text: &str) -> Step {
    let final_at = text.find("Final Answer:");
    let action_at = text.find("Action:");

    match (final_at, action_at) {
        (Some(f), a) if a.map_or(true, |a| f < a) => {
            Step::Final(text[f + "Final Answer:".len()..].trim().to_string())
        }
        (_, Some(a)) => {
            let after = &text[a + "Action:".len()..];
            let Some(input_at) = after.find("Action Input:") else {
                return Step::Malformed(
                    "Invalid Format: Missing 'Action Input:' after 'Action:'",
                );
            };
            let tool = after[..input_at].trim().trim_matches('`').to_string();
            if tool.is_empty() {
                return Step::Malformed("Invalid Format: Missing tool name after 'Action:'");
            }
            let input = after[input_at + "Action Input:".len()..].trim().to_string();
            Step::Action { tool, input }
        }
        _ => Step::Malformed(
            "Invalid Format: Missing 'Action:' after 'Thought:'. Reply with an Action or a Final Answer.",
        ),
    }
}

fn parse_action_input(raw: &str) -> Result<Value, String> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if cleaned.is_empty() {
        return Ok(json!({}));
    }
    match serde_json::from_str::<Value>(cleaned) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) | Err(_) => Err(format!(
            "Invalid Action Input: expected a single JSON object such as {{\"table\": \"employees\"}}, got: {}",
            excerpt(cleaned, 200)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::Table;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays canned outputs in order, repeating the last one, and keeps
    /// every prompt it was given.
    struct Scripted {
        outputs: Vec<String>,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(outputs: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                outputs: outputs.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextCompletion for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.outputs[n.min(self.outputs.len() - 1)].clone())
        }
    }

    fn tables() -> Arc<TableSet> {
        Arc::new(TableSet {
            employees: Table::from_rows(
                "employees",
                vec!["emp_id".into(), "name".into()],
                vec![
                    vec![json!("E1001"), json!("Asha Rao")],
                    vec![json!("E1002"), json!("Ben Ito")],
                ],
            ),
            ..TableSet::default()
        })
    }

    #[test]
    fn parses_final_answer() {
        assert_eq!(
            parse_step("Thought: done\nFinal Answer: 42 employees"),
            Step::Final("42 employees".to_string())
        );
    }

    #[test]
    fn parses_action() {
        assert_eq!(
            parse_step("Thought: look\nAction: lookup\nAction Input: {\"value\": \"E1001\"}"),
            Step::Action {
                tool: "lookup".to_string(),
                input: "{\"value\": \"E1001\"}".to_string()
            }
        );
    }

    #[test]
    fn missing_action_is_malformed() {
        assert!(matches!(parse_step("I think the answer is 3"), Step::Malformed(_)));
        assert!(matches!(parse_step("Action: filter"), Step::Malformed(_)));
    }

    #[test]
    fn action_input_accepts_fenced_json() {
        let v = parse_action_input("```json\n{\"table\": \"employees\"}\n```").unwrap();
        assert_eq!(v["table"], "employees");
        assert!(parse_action_input("employees").is_err());
        assert_eq!(parse_action_input("").unwrap(), json!({}));
    }

    #[tokio::test]
    async fn runs_tool_then_answers() {
        let llm = Scripted::new(&[
            "I should find the employee.\nAction: lookup\nAction Input: {\"value\": \"E1001\"}\nObservation: made up",
            "I now know the final answer\nFinal Answer: E1001 is Asha Rao.",
        ]);
        let agent = ReactAgent::new(llm.clone(), tables(), 5);
        let response = agent.invoke("Who is E1001?", 30).await.unwrap();
        assert_eq!(response["output"], "E1001 is Asha Rao.");
        assert_eq!(response["iterations"], 2);

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("Table `employees`"));
        assert!(prompts[1].contains("Observation: {"));
        assert!(prompts[1].contains("Asha Rao"));
        assert!(!prompts[1].contains("made up"));
    }

    #[tokio::test]
    async fn malformed_output_is_fed_back() {
        let llm = Scripted::new(&["The answer is two.", "Final Answer: There are 2 employees."]);
        let agent = ReactAgent::new(llm.clone(), tables(), 5);
        let response = agent.invoke("How many employees?", 30).await.unwrap();
        assert_eq!(response["output"], "There are 2 employees.");
        assert!(llm.prompts.lock().unwrap()[1].contains("Invalid Format"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_observation() {
        let llm = Scripted::new(&[
            "Action: drop_table\nAction Input: {}",
            "Final Answer: done",
        ]);
        let agent = ReactAgent::new(llm.clone(), tables(), 5);
        agent.invoke("x", 30).await.unwrap();
        assert!(llm.prompts.lock().unwrap()[1].contains("is not a valid tool"));
    }

    #[tokio::test]
    async fn stops_at_iteration_cap() {
        let llm = Scripted::new(&["Action: list_tables\nAction Input: {}"]);
        let agent = ReactAgent::new(llm.clone(), tables(), 5);
        let err = agent.invoke("loop forever", 30).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AgentError>(),
            Some(AgentError::IterationLimit(30))
        ));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 30);
    }
}
