//! JSON command protocol carried on the `query` and `subscribe` REP
//! sockets: `{action, data, timestamp, requestId}` in, `{success,
//! message, data, requestId}` out.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    pub action: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, rename = "requestId")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandReply {
    pub success: bool,
    pub message: String,
    pub data: Value,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
}

impl CommandReply {
    pub fn ok(request_id: Option<String>, data: Value) -> Self {
        Self {
            success: true,
            message: String::new(),
            data,
            request_id,
        }
    }

    pub fn ok_msg(request_id: Option<String>, message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            request_id,
        }
    }

    pub fn err(request_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: json!({}),
            request_id,
        }
    }
}
