//! Structured actions the language model may select instead of replying.
//!
//! The set is closed: adding a tool means adding a variant to
//! [`ToolInvocation`], which forces every `match` over it to be updated.

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

pub const TRANSFER_TO_HUMAN: &str = "transfer_to_human";
pub const SCHEDULE_CALLBACK: &str = "schedule_callback";

/// A side-effecting action requested by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    /// Hand the caller over to a human agent.
    TransferToHuman { reason: String },
    /// Arrange for the business to call the customer back.
    ScheduleCallback {
        phone_number: String,
        preferred_time: String,
    },
}

/// The outcome of one completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Free text to speak to the caller.
    Text(String),
    /// A tool the model chose to invoke.
    Tool(ToolInvocation),
}

/// A tool advertised to the model, in the JSON-schema shape chat APIs expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Errors decoding a tool call returned by the model.
#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {source}")]
    InvalidArguments {
        tool: String,
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct TransferArgs {
    reason: String,
}

#[derive(Deserialize)]
struct CallbackArgs {
    phone_number: String,
    preferred_time: String,
}

impl ToolInvocation {
    /// Decodes a tool call from its name and JSON-encoded arguments.
    pub fn from_call(name: &str, arguments: &str) -> Result<Self, ToolCallError> {
        let invalid = |source: serde_json::Error| ToolCallError::InvalidArguments {
            tool: name.to_string(),
            source,
        };
        match name {
            TRANSFER_TO_HUMAN => {
                let args: TransferArgs = serde_json::from_str(arguments).map_err(invalid)?;
                Ok(Self::TransferToHuman {
                    reason: args.reason,
                })
            }
            SCHEDULE_CALLBACK => {
                let args: CallbackArgs = serde_json::from_str(arguments).map_err(invalid)?;
                Ok(Self::ScheduleCallback {
                    phone_number: args.phone_number,
                    preferred_time: args.preferred_time,
                })
            }
            other => Err(ToolCallError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TransferToHuman { .. } => TRANSFER_TO_HUMAN,
            Self::ScheduleCallback { .. } => SCHEDULE_CALLBACK,
        }
    }

    /// Definitions of every tool, in the order they are offered to the model.
    pub fn catalog() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: TRANSFER_TO_HUMAN.to_string(),
                description: "Transfer the call to a human agent".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "reason": {
                            "type": "string",
                            "description": "Reason for transfer"
                        }
                    },
                    "required": ["reason"]
                }),
            },
            ToolDefinition {
                name: SCHEDULE_CALLBACK.to_string(),
                description: "Schedule a callback for the customer".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "phone_number": {"type": "string"},
                        "preferred_time": {"type": "string"}
                    },
                    "required": ["phone_number", "preferred_time"]
                }),
            },
        ]
    }
}
