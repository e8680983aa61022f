//! Command handlers for CLI operations
//!
//! Each handler opens the memory database, builds an orchestrator, sends one
//! message and prints the response as text or JSON.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::config::Config;
use crate::db::Database;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use sdk::{Message, MessageKind};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

async fn open_orchestrator(config: &Config) -> Result<Orchestrator> {
    let db_path = config.database_path();
    let database = Database::new(&db_path)
        .await
        .context("Failed to open database")?;

    Ok(Orchestrator::new(OrchestratorConfig::from(config), database).await)
}

/// Send one message and return the response payload
async fn dispatch(config: &Config, msg: Message) -> Result<Value> {
    let orchestrator = open_orchestrator(config).await?;
    let result = orchestrator.send(msg).await;
    orchestrator.shutdown().await?;

    let response = result.context("Message was quarantined")?;
    Ok(response.payload)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Send a raw message of type `kind`
pub async fn handle_send(
    kind: String,
    payload: String,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let payload: Value = serde_json::from_str(&payload).context("Payload is not valid JSON")?;
    let kind = MessageKind::from(kind);
    let response = dispatch(config, Message::new(kind.clone(), payload)).await?;

    match format {
        OutputFormat::Text => {
            println!("{} ->", kind);
            print_json(&response)?;
        }
        OutputFormat::Json => print_json(&response)?,
    }

    Ok(())
}

/// Plan and execute a goal
pub async fn handle_goal(
    text: String,
    priority: u8,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let msg = Message::new(
        MessageKind::Goal,
        json!({ "goal": text, "priority": priority }),
    );
    let response = dispatch(config, msg).await?;

    match format {
        OutputFormat::Text => {
            println!("Plan for: {}", text);
            println!();

            let execution = &response["execution"];
            let tasks = response["plan"]["tasks"].as_array().cloned().unwrap_or_default();
            let order = execution["order"].as_array().cloned().unwrap_or_default();
            for (step, task_id) in order.iter().enumerate() {
                let Some(task) = tasks.iter().find(|t| &t["id"] == task_id) else {
                    continue;
                };
                println!(
                    "  {}. {} [{}]",
                    step + 1,
                    task["goal"].as_str().unwrap_or(""),
                    task["assigned_arm"].as_str().unwrap_or("-")
                );
            }

            println!();
            println!(
                "✓ {}/{} tasks completed, {} checkpoints, {} adjustments",
                execution["completed_tasks"],
                execution["total_tasks"],
                execution["checkpoints"].as_array().map(Vec::len).unwrap_or(0),
                execution["adjustments"].as_array().map(Vec::len).unwrap_or(0),
            );
        }
        OutputFormat::Json => print_json(&response)?,
    }

    Ok(())
}

/// Store `text` as a memory of `kind`
pub async fn handle_remember(
    text: String,
    kind: &str,
    tags: Vec<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let msg = Message::new(
        MessageKind::MemoryRequest,
        json!({
            "type": "store",
            "data": { "content": text, "type": kind, "tags": tags },
        }),
    );
    let response = dispatch(config, msg).await?;

    match format {
        OutputFormat::Text => {
            let verb = if response["created"].as_bool().unwrap_or(false) {
                "Stored"
            } else {
                "Reinforced"
            };
            println!(
                "✓ {} {} memory {}",
                verb,
                response["type"].as_str().unwrap_or(kind),
                response["memory_id"].as_str().unwrap_or("")
            );
            println!("  Access count: {}", response["access_count"]);
            if let Some(tags) = response["tags"].as_array() {
                let tags: Vec<&str> = tags.iter().filter_map(Value::as_str).collect();
                println!("  Tags: {}", tags.join(", "));
            }
        }
        OutputFormat::Json => print_json(&response)?,
    }

    Ok(())
}

/// Retrieve memories matching `query`
pub async fn handle_recall(query: String, config: &Config, format: OutputFormat) -> Result<()> {
    let msg = Message::new(
        MessageKind::MemoryRequest,
        json!({ "type": "retrieve", "query": query }),
    );
    let response = dispatch(config, msg).await?;

    match format {
        OutputFormat::Text => {
            let memories = response["memories"].as_array().cloned().unwrap_or_default();
            if memories.is_empty() {
                println!("No memories match '{}'", query);
                return Ok(());
            }

            println!("Memories matching '{}':", query);
            println!();
            for scored in memories {
                let memory = &scored["memory"];
                let content = memory["content"]["content"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| memory["content"].to_string());
                println!(
                    "  [{:.2} {}] {}",
                    scored["score"].as_f64().unwrap_or(0.0),
                    scored["source"].as_str().unwrap_or("-"),
                    content
                );
            }
        }
        OutputFormat::Json => print_json(&response)?,
    }

    Ok(())
}

/// Evaluate `expression` with a one-step calculate tool chain
pub async fn handle_reason(expression: String, config: &Config, format: OutputFormat) -> Result<()> {
    let msg = Message::new(
        MessageKind::ReasoningRequest,
        json!({
            "type": "tool_chain",
            "tools": [{ "name": "calculate", "parameters": { "expression": expression } }],
        }),
    );
    let response = dispatch(config, msg).await?;

    match format {
        OutputFormat::Text => {
            let first = &response["results"][0];
            if first["success"].as_bool().unwrap_or(false) {
                println!("{} = {}", expression, first["result"]["result"]);
            } else {
                println!(
                    "✗ {}",
                    first["error"].as_str().unwrap_or("calculation failed")
                );
            }
        }
        OutputFormat::Json => print_json(&response)?,
    }

    Ok(())
}

/// Run one spiral protocol session
pub async fn handle_spiral(
    answers: Vec<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let msg = Message::new(MessageKind::SpiralProtocol, json!({ "answers": answers }));
    let response = dispatch(config, msg).await?;

    match format {
        OutputFormat::Text => {
            let history: Vec<&str> = response["history"]
                .as_array()
                .map(|h| h.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            println!("Spiral: {}", history.join(" -> "));
            println!("  Anchors: {}", response["anchors"]);
            println!("  Gates:   {}", response["gates"]);
            if let Some(qa) = response["session_data"]["inward_qa"].as_array() {
                for entry in qa {
                    println!(
                        "  {} {}",
                        entry["prompt"].as_str().unwrap_or(""),
                        entry["answer"].as_str().unwrap_or("")
                    );
                }
            }
        }
        OutputFormat::Json => print_json(&response)?,
    }

    Ok(())
}

/// Show conductor counters and memory statistics
pub async fn handle_status(config: &Config, format: OutputFormat) -> Result<()> {
    let orchestrator = open_orchestrator(config).await?;
    let status = orchestrator.status().await;
    orchestrator.shutdown().await?;
    let status = status.context("Failed to read memory statistics")?;

    match format {
        OutputFormat::Text => {
            println!("Conductor:");
            println!("  Processed:   {}", status.conductor.processed_messages);
            println!("  Quarantined: {}", status.conductor.quarantined_messages);
            println!("  Arms:        {}", status.conductor.registered_arms.join(", "));
            println!("Memory:");
            println!("  Stored:      {}", status.memory["stored"]);
            println!("  Database:    {}", config.database_path().display());
        }
        OutputFormat::Json => print_json(&serde_json::to_value(&status)?)?,
    }

    Ok(())
}

/// Print the path of the configuration file in use
pub fn handle_config_path(custom: Option<PathBuf>) -> Result<()> {
    let path = match custom {
        Some(path) => path,
        None => Config::default_config_path()?,
    };
    println!("{}", path.display());
    Ok(())
}

pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let toml_string =
                toml::to_string_pretty(config).context("Failed to serialize config")?;
            print!("{}", toml_string);
        }
        OutputFormat::Json => print_json(&serde_json::to_value(config)?)?,
    }
    Ok(())
}
