//! Reason arm
//!
//! Handles `reasoning_request` messages. Tool chains run every requested tool
//! in order and keep going past failures; the other request types are fixed
//! shape pipelines with heuristic confidence.

pub mod calculator;
pub mod tools;

pub use tools::{OfflineInvoker, ToolInvoker, ToolName, ToolRegistry};

use crate::config::ReasonConfig;
use crate::message_bus::{Event, MessageBus};
use async_trait::async_trait;
use sdk::{Arm, CallContext, EngineError, Message};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub const REASON_ARM: &str = "reason_arm";

const LOGICAL_STEPS: [&str; 4] = [
    "parse premises",
    "identify components",
    "apply inference rules",
    "draw conclusions",
];

/// Payload of a `reasoning_request` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReasoningRequest {
    ToolChain {
        tools: Vec<ToolCall>,
    },
    LogicalReasoning {
        #[serde(alias = "query", default)]
        problem: String,
        #[serde(default)]
        premises: Vec<String>,
        #[serde(default)]
        evidence: Vec<String>,
    },
    Research {
        #[serde(alias = "query")]
        topic: String,
    },
    Analysis {
        #[serde(default)]
        subject: String,
        #[serde(default)]
        data: Value,
    },
    General {
        #[serde(default)]
        query: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(alias = "tool_name")]
    pub name: String,
    #[serde(default)]
    pub parameters: Value,
}

/// One entry in a tool chain's result list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    pub result: Value,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainOutcome {
    pub success: bool,
    pub results: Vec<ToolResult>,
    pub synthesis: String,
}

/// `min(1.0, 0.7 + 0.05 * steps + 0.02 * evidence)`
pub fn logical_confidence(steps: usize, evidence: usize) -> f64 {
    (0.7 + 0.05 * steps as f64 + 0.02 * evidence as f64).min(1.0)
}

pub struct ReasonArm {
    registry: ToolRegistry,
    config: ReasonConfig,
    bus: MessageBus,
}

impl ReasonArm {
    pub fn new(invoker: Arc<dyn ToolInvoker>, config: ReasonConfig, bus: MessageBus) -> Self {
        Self {
            registry: ToolRegistry::new(invoker, config.tool_timeout()),
            config,
            bus,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run `calls` in order, feeding each one the results so far
    ///
    /// A failing or unknown tool is recorded and the chain continues. Only
    /// cancellation of `ctx` stops the chain early.
    pub async fn execute_tool_chain(
        &self,
        calls: &[ToolCall],
        ctx: &CallContext,
    ) -> Result<ChainOutcome, EngineError> {
        let tool_names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
        let mut results: Vec<ToolResult> = Vec::with_capacity(calls.len());

        for (step, call) in calls.iter().enumerate() {
            ctx.check()?;

            let mut params = match &call.parameters {
                Value::Object(map) => map.clone(),
                Value::Null => serde_json::Map::new(),
                other => {
                    let mut map = serde_json::Map::new();
                    map.insert("input".to_string(), other.clone());
                    map
                }
            };
            params.insert("previous_results".to_string(), serde_json::to_value(&results)?);
            params.insert(
                "chain_context".to_string(),
                json!({ "step": step + 1, "total": calls.len(), "tool_names": tool_names }),
            );

            let entry = match self
                .registry
                .execute(&call.name, &Value::Object(params), ctx)
                .await
            {
                Ok(result) => ToolResult {
                    tool_name: call.name.clone(),
                    success: true,
                    result,
                    error: None,
                },
                Err(e @ (EngineError::Cancelled | EngineError::DeadlineExceeded)) => return Err(e),
                Err(e) => {
                    debug!("Tool '{}' failed at step {}: {}", call.name, step + 1, e);
                    ToolResult {
                        tool_name: call.name.clone(),
                        success: false,
                        result: Value::Null,
                        error: Some(e.to_string()),
                    }
                }
            };

            self.bus
                .publish(Event::ToolExecuted {
                    tool: entry.tool_name.clone(),
                    success: entry.success,
                })
                .await;
            results.push(entry);
        }

        let success = results.iter().all(|r| r.success);
        let synthesis = self.synthesize(&results);
        info!(
            "Tool chain finished: {}/{} succeeded",
            results.iter().filter(|r| r.success).count(),
            results.len()
        );

        Ok(ChainOutcome {
            success,
            results,
            synthesis,
        })
    }

    fn synthesize(&self, results: &[ToolResult]) -> String {
        let parts: Vec<String> = results
            .iter()
            .filter(|r| r.success)
            .take(self.config.synthesis_limit)
            .map(|r| format!("{}: {}", r.tool_name, summarize_value(&r.result)))
            .collect();

        if parts.is_empty() {
            "No tool produced a result.".to_string()
        } else {
            format!("Chain results. {}", parts.join("; "))
        }
    }

    async fn logical_reasoning(
        &self,
        problem: &str,
        premises: &[String],
        evidence: &[String],
        ctx: &CallContext,
    ) -> Result<Value, EngineError> {
        let inference = self
            .registry
            .execute("logical_inference", &json!({ "premises": premises }), ctx)
            .await?;

        let steps: Vec<Value> = LOGICAL_STEPS
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let detail = match i {
                    0 => format!("{} premises, problem: {}", premises.len(), problem),
                    1 => format!("{} rules found", inference["rules"]),
                    2 => format!("{} facts inferred", inference["inferences"].as_array().map_or(0, Vec::len)),
                    _ => format!("{} evidence items considered", evidence.len()),
                };
                json!({ "step": i + 1, "name": name, "detail": detail })
            })
            .collect();

        let conclusion = inference["inferences"]
            .as_array()
            .and_then(|i| i.last())
            .and_then(Value::as_str)
            .map(|c| format!("Therefore {}", c))
            .unwrap_or_else(|| format!("No conclusion follows for: {}", problem));

        Ok(json!({
            "steps": steps,
            "conclusion": conclusion,
            "inferences": inference["inferences"],
            "confidence": logical_confidence(steps.len(), evidence.len()),
        }))
    }

    async fn research(&self, topic: &str, ctx: &CallContext) -> Result<Value, EngineError> {
        let found = self
            .registry
            .execute("web_research", &json!({ "query": topic }), ctx)
            .await?;
        let sources = found["sources"].as_array().cloned().unwrap_or_default();

        let findings: Vec<String> = sources
            .iter()
            .filter_map(|s| s["title"].as_str())
            .map(|title| format!("Consulted '{}'", title))
            .collect();

        Ok(json!({
            "topic": topic,
            "steps": ["define scope", "gather sources", "evaluate credibility", "synthesize findings"],
            "sources": sources,
            "findings": findings,
            "confidence": (0.6 + 0.1 * sources.len() as f64).min(0.95),
        }))
    }

    async fn analysis(
        &self,
        subject: &str,
        data: &Value,
        ctx: &CallContext,
    ) -> Result<Value, EngineError> {
        let found = self
            .registry
            .execute("analyze_pattern", &json!({ "data": data }), ctx)
            .await?;
        let patterns = found["patterns"].as_array().cloned().unwrap_or_default();

        let insights: Vec<String> = patterns
            .iter()
            .filter_map(Value::as_str)
            .map(|p| format!("{} shows {}", if subject.is_empty() { "data" } else { subject }, p))
            .collect();

        Ok(json!({
            "subject": subject,
            "patterns": patterns,
            "insights": insights,
            "confidence": (0.5 + 0.1 * patterns.len() as f64).min(0.9),
        }))
    }

    fn general(&self, query: &str) -> Value {
        let lower = query.to_lowercase();
        let approach = if lower.contains("why") || lower.contains("because") {
            "causal"
        } else if lower.contains("how") {
            "procedural"
        } else if lower.chars().any(|c| c.is_ascii_digit()) {
            "quantitative"
        } else {
            "descriptive"
        };

        json!({
            "query": query,
            "approach": approach,
            "response": format!("Considered '{}' using a {} approach", query, approach),
            "confidence": 0.6,
        })
    }
}

fn summarize_value(value: &Value) -> String {
    match value {
        Value::Object(map) if map.contains_key("result") => map["result"].to_string(),
        Value::Object(map) => {
            let keys: Vec<&String> = map.keys().take(3).collect();
            format!("{{{}}}", keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", "))
        }
        other => other.to_string(),
    }
}

#[async_trait]
impl Arm for ReasonArm {
    fn name(&self) -> &str {
        REASON_ARM
    }

    async fn handle(&self, msg: Message, ctx: &CallContext) -> Result<Message, EngineError> {
        let request: ReasoningRequest = serde_json::from_value(msg.payload.clone())?;

        let payload = match request {
            ReasoningRequest::ToolChain { tools } => {
                let outcome = self.execute_tool_chain(&tools, ctx).await?;
                json!({
                    "success": outcome.success,
                    "type": "tool_chain",
                    "results": outcome.results,
                    "synthesis": outcome.synthesis,
                    "tools_executed": tools.len(),
                })
            }
            ReasoningRequest::LogicalReasoning {
                problem,
                premises,
                evidence,
            } => {
                let mut out = self
                    .logical_reasoning(&problem, &premises, &evidence, ctx)
                    .await?;
                out["success"] = json!(true);
                out["type"] = json!("logical_reasoning");
                out
            }
            ReasoningRequest::Research { topic } => {
                let mut out = self.research(&topic, ctx).await?;
                out["success"] = json!(true);
                out["type"] = json!("research");
                out
            }
            ReasoningRequest::Analysis { subject, data } => {
                let mut out = self.analysis(&subject, &data, ctx).await?;
                out["success"] = json!(true);
                out["type"] = json!("analysis");
                out
            }
            ReasoningRequest::General { query } => {
                let mut out = self.general(&query);
                out["success"] = json!(true);
                out["type"] = json!("general");
                out
            }
        };

        Ok(Message::respond(&msg, payload))
    }
}
