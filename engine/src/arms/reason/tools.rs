//! Reason arm tool registry
//!
//! The tool set is closed. Five tools run in-process; `web_research` and
//! `search_files` are delegated to a [`ToolInvoker`] under a timeout.

use super::calculator;
use async_trait::async_trait;
use regex::Regex;
use sdk::context::CallContext;
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    Calculate,
    SearchFiles,
    AnalyzePattern,
    LogicalInference,
    WebResearch,
    CodeAnalysis,
    DataTransformation,
}

impl ToolName {
    pub const ALL: [ToolName; 7] = [
        ToolName::Calculate,
        ToolName::SearchFiles,
        ToolName::AnalyzePattern,
        ToolName::LogicalInference,
        ToolName::WebResearch,
        ToolName::CodeAnalysis,
        ToolName::DataTransformation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::Calculate => "calculate",
            ToolName::SearchFiles => "search_files",
            ToolName::AnalyzePattern => "analyze_pattern",
            ToolName::LogicalInference => "logical_inference",
            ToolName::WebResearch => "web_research",
            ToolName::CodeAnalysis => "code_analysis",
            ToolName::DataTransformation => "data_transformation",
        }
    }

    /// Whether the tool leaves the process
    pub fn is_external(&self) -> bool {
        matches!(self, ToolName::WebResearch | ToolName::SearchFiles)
    }
}

impl FromStr for ToolName {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EngineError::ToolNotFound(s.to_string()))
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collaborator for tools that reach outside the engine
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        tool: ToolName,
        params: &Value,
        timeout: Duration,
    ) -> Result<Value, EngineError>;
}

/// Invoker that never leaves the process
///
/// Returns deterministic placeholder results so chains that mention external
/// tools still run end to end.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineInvoker;

#[async_trait]
impl ToolInvoker for OfflineInvoker {
    async fn invoke(
        &self,
        tool: ToolName,
        params: &Value,
        _timeout: Duration,
    ) -> Result<Value, EngineError> {
        match tool {
            ToolName::WebResearch => {
                let query = str_param(params, &["query", "topic"]).unwrap_or("general");
                let slug: String = query
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
                    .collect();
                Ok(json!({
                    "query": query,
                    "sources": [
                        {"title": format!("Overview of {}", query), "url": format!("offline://{}/overview", slug)},
                        {"title": format!("Recent work on {}", query), "url": format!("offline://{}/recent", slug)},
                    ],
                    "offline": true,
                }))
            }
            ToolName::SearchFiles => {
                let pattern = str_param(params, &["pattern", "query"]).unwrap_or("*");
                Ok(json!({ "pattern": pattern, "matches": [], "offline": true }))
            }
            other => Err(EngineError::tool(
                other.as_str(),
                "not an external tool",
            )),
        }
    }
}

/// Dispatches tool calls by name
#[derive(Clone)]
pub struct ToolRegistry {
    invoker: Arc<dyn ToolInvoker>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new(invoker: Arc<dyn ToolInvoker>, timeout: Duration) -> Self {
        Self { invoker, timeout }
    }

    pub fn available_tool_names(&self) -> Vec<&'static str> {
        ToolName::ALL.iter().map(ToolName::as_str).collect()
    }

    /// Run one tool
    ///
    /// Unknown names fail with `ToolNotFound`; a tool error, an external
    /// timeout or a malformed parameter fails with a `Tool*` error.
    pub async fn execute(
        &self,
        name: &str,
        params: &Value,
        ctx: &CallContext,
    ) -> Result<Value, EngineError> {
        let tool: ToolName = name.parse().inspect_err(|_| {
            warn!(
                "Unknown tool requested: {}. Available tools: {}",
                name,
                self.available_tool_names().join(", ")
            );
        })?;
        debug!("Executing tool '{}'", tool);

        match tool {
            ToolName::Calculate => calculate(params),
            ToolName::AnalyzePattern => Ok(analyze_pattern(params)),
            ToolName::LogicalInference => Ok(logical_inference(params)),
            ToolName::CodeAnalysis => code_analysis(params),
            ToolName::DataTransformation => data_transformation(params),
            ToolName::WebResearch | ToolName::SearchFiles => {
                let call = tokio::time::timeout(
                    self.timeout,
                    self.invoker.invoke(tool, params, self.timeout),
                );
                match ctx.run(call).await? {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::ToolTimeout {
                        tool: tool.to_string(),
                        secs: self.timeout.as_secs(),
                    }),
                }
            }
        }
    }
}

fn str_param<'a>(params: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| params.get(*k).and_then(Value::as_str))
}

/// The `result` of the most recent successful step, if any
fn previous_result(params: &Value) -> Option<&Value> {
    params
        .get("previous_results")
        .and_then(Value::as_array)?
        .iter()
        .rev()
        .find(|r| r.get("success").and_then(Value::as_bool).unwrap_or(false))
        .and_then(|r| r.get("result"))
}

/// Integral results become JSON integers so `2+2` reads back as `4`
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

fn calculate(params: &Value) -> Result<Value, EngineError> {
    let expression = str_param(params, &["expression", "expr"])
        .ok_or_else(|| EngineError::tool("calculate", "missing 'expression' parameter"))?;
    let result =
        calculator::evaluate(expression).map_err(|e| EngineError::tool("calculate", e))?;

    Ok(json!({ "expression": expression, "result": number_value(result) }))
}

fn analyze_pattern(params: &Value) -> Value {
    let data = params
        .get("data")
        .or_else(|| previous_result(params))
        .cloned()
        .unwrap_or(Value::Null);

    let mut patterns = Vec::new();
    match &data {
        Value::Array(items) => {
            let numbers: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
            if numbers.len() == items.len() && numbers.len() >= 2 {
                let diffs: Vec<f64> = numbers.windows(2).map(|w| w[1] - w[0]).collect();
                if diffs.iter().all(|d| *d > 0.0) {
                    patterns.push("increasing".to_string());
                } else if diffs.iter().all(|d| *d < 0.0) {
                    patterns.push("decreasing".to_string());
                } else if diffs.iter().all(|d| *d == 0.0) {
                    patterns.push("constant".to_string());
                }
                if diffs.windows(2).all(|w| (w[0] - w[1]).abs() < 1e-9) {
                    patterns.push(format!("arithmetic step {}", diffs[0]));
                }
            }
            let distinct: BTreeSet<String> = items.iter().map(Value::to_string).collect();
            if distinct.len() < items.len() {
                patterns.push("repeated values".to_string());
            }
        }
        Value::String(text) => {
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for word in text.split_whitespace() {
                *counts.entry(word.to_lowercase()).or_default() += 1;
            }
            patterns.extend(
                counts
                    .into_iter()
                    .filter(|(_, n)| *n > 1)
                    .map(|(w, n)| format!("'{}' repeats {} times", w, n)),
            );
        }
        Value::Number(n) => {
            patterns.push(format!("single value {}", n));
        }
        _ => {}
    }

    json!({ "patterns": patterns, "count": patterns.len() })
}

fn conditional() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*if\s+(.+?)\s*,?\s+then\s+(.+?)\s*\.?\s*$")
            .expect("Invalid conditional pattern")
    })
}

/// Forward chaining with modus ponens over `if A then B` premises
fn logical_inference(params: &Value) -> Value {
    let premises: Vec<String> = params
        .get("premises")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let normalize = |s: &str| s.trim().trim_end_matches('.').to_lowercase();

    let mut facts: BTreeSet<String> = BTreeSet::new();
    let mut rules: Vec<(String, String)> = Vec::new();
    for premise in &premises {
        match conditional().captures(premise) {
            Some(caps) => rules.push((normalize(&caps[1]), normalize(&caps[2]))),
            None => {
                facts.insert(normalize(premise));
            }
        }
    }

    let mut inferences = Vec::new();
    loop {
        let new: Vec<String> = rules
            .iter()
            .filter(|(a, b)| facts.contains(a) && !facts.contains(b))
            .map(|(_, b)| b.clone())
            .collect();
        if new.is_empty() {
            break;
        }
        for fact in new {
            if facts.insert(fact.clone()) {
                inferences.push(fact);
            }
        }
    }

    json!({
        "premises": premises.len(),
        "rules": rules.len(),
        "inferences": inferences,
        "valid": !inferences.is_empty(),
    })
}

fn code_analysis(params: &Value) -> Result<Value, EngineError> {
    let code = str_param(params, &["code", "source"])
        .ok_or_else(|| EngineError::tool("code_analysis", "missing 'code' parameter"))?;

    let lines: Vec<&str> = code.lines().collect();
    let non_empty = lines.iter().filter(|l| !l.trim().is_empty()).count();
    let comments = lines
        .iter()
        .filter(|l| {
            let t = l.trim_start();
            t.starts_with("//") || t.starts_with('#')
        })
        .count();
    let functions = lines
        .iter()
        .filter(|l| {
            let t = l.trim_start();
            t.starts_with("fn ")
                || t.starts_with("pub fn ")
                || t.starts_with("def ")
                || t.starts_with("function ")
        })
        .count();
    let branches = code
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| matches!(*w, "if" | "for" | "while" | "match" | "loop" | "elif"))
        .count();

    Ok(json!({
        "lines": lines.len(),
        "non_empty_lines": non_empty,
        "comment_lines": comments,
        "functions": functions,
        "cyclomatic_estimate": branches + 1,
    }))
}

fn data_transformation(params: &Value) -> Result<Value, EngineError> {
    let operation = str_param(params, &["operation", "op"]).ok_or_else(|| {
        EngineError::tool("data_transformation", "missing 'operation' parameter")
    })?;
    let data = params
        .get("data")
        .or_else(|| previous_result(params))
        .ok_or_else(|| EngineError::tool("data_transformation", "no data to transform"))?;

    let fail = |reason: &str| EngineError::tool("data_transformation", reason);

    let result = match (operation, data) {
        ("uppercase", Value::String(s)) => json!(s.to_uppercase()),
        ("lowercase", Value::String(s)) => json!(s.to_lowercase()),
        ("reverse", Value::String(s)) => json!(s.chars().rev().collect::<String>()),
        ("reverse", Value::Array(items)) => {
            json!(items.iter().rev().cloned().collect::<Vec<_>>())
        }
        ("sort", Value::Array(items)) => {
            let mut sorted = items.clone();
            sorted.sort_by(|a, b| match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.to_string().cmp(&b.to_string()),
            });
            json!(sorted)
        }
        ("unique", Value::Array(items)) => {
            let mut seen = BTreeSet::new();
            json!(items
                .iter()
                .filter(|v| seen.insert(v.to_string()))
                .cloned()
                .collect::<Vec<_>>())
        }
        ("count", Value::Array(items)) => json!(items.len()),
        ("count", Value::String(s)) => json!(s.chars().count()),
        ("sum", Value::Array(items)) => {
            let numbers: Option<Vec<f64>> = items.iter().map(Value::as_f64).collect();
            let numbers = numbers.ok_or_else(|| fail("sum needs an array of numbers"))?;
            number_value(numbers.iter().sum())
        }
        ("sum", Value::Object(map)) if map.contains_key("result") => {
            // previous calculate output
            map["result"].clone()
        }
        (op, other) => {
            return Err(fail(&format!(
                "operation '{}' does not apply to {}",
                op,
                match other {
                    Value::Null => "null",
                    Value::Bool(_) => "a boolean",
                    Value::Number(_) => "a number",
                    Value::String(_) => "a string",
                    Value::Array(_) => "an array",
                    Value::Object(_) => "an object",
                }
            )))
        }
    };

    Ok(json!({ "operation": operation, "result": result }))
}
