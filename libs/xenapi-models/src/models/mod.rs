//! API models

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Vec<Value>, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// JSON-RPC response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
    #[serde(default)]
    pub id: Option<u64>,
}

/// JSON-RPC error object.
///
/// The server puts the failure code in `message` and the remaining
/// error-description entries in `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Flatten into the error-description list: code first, then parameters
    pub fn error_description(&self) -> Vec<String> {
        let mut description = vec![self.message.clone()];
        match &self.data {
            Some(Value::Array(items)) => {
                description.extend(items.iter().map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }));
            }
            Some(Value::String(s)) => description.push(s.clone()),
            Some(Value::Null) | None => {}
            Some(other) => description.push(other.to_string()),
        }
        description
    }
}

/// Pool record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolRecord {
    pub uuid: String,
    pub name_label: String,
    /// Opaque reference of the master host
    pub master: String,
    #[serde(default)]
    pub ha_enabled: bool,
}

/// Host record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRecord {
    pub uuid: String,
    pub name_label: String,
    #[serde(default)]
    pub address: String,
    /// Opaque reference of the host metrics object
    #[serde(default)]
    pub metrics: String,
    #[serde(default, rename = "PBDs")]
    pub pbds: Vec<String>,
    #[serde(default)]
    pub software_version: std::collections::HashMap<String, String>,
}

/// Physical block device record (host <-> storage repository connection)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PbdRecord {
    pub uuid: String,
    pub host: String,
    #[serde(rename = "SR")]
    pub sr: String,
    pub currently_attached: bool,
}

/// Virtual block device type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VbdType {
    CD,
    Disk,
    Floppy,
    #[serde(other)]
    Unknown,
}

/// Virtual block device record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VbdRecord {
    pub uuid: String,
    #[serde(rename = "VM")]
    pub vm: String,
    #[serde(rename = "type")]
    pub vbd_type: VbdType,
    pub empty: bool,
}

/// Guidance attached to a single-file patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AfterApplyGuidance {
    #[serde(rename = "restartHVM")]
    RestartHvm,
    #[serde(rename = "restartPV")]
    RestartPv,
    #[serde(rename = "restartHost")]
    RestartHost,
    #[serde(rename = "restartXAPI")]
    RestartXapi,
    #[serde(other)]
    Unknown,
}

/// Guidance attached to a pool update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateAfterApplyGuidance {
    #[serde(rename = "restartHVM")]
    RestartHvm,
    #[serde(rename = "restartPV")]
    RestartPv,
    #[serde(rename = "restartHost")]
    RestartHost,
    #[serde(rename = "restartXAPI")]
    RestartXapi,
    #[serde(other)]
    Unknown,
}

/// Single-file patch record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolPatchRecord {
    pub uuid: String,
    pub name_label: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub after_apply_guidance: Vec<AfterApplyGuidance>,
}

/// Pool update record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolUpdateRecord {
    pub uuid: String,
    pub name_label: String,
    #[serde(default)]
    pub installation_size: u64,
    #[serde(default)]
    pub after_apply_guidance: Vec<UpdateAfterApplyGuidance>,
    /// Opaque references of the hosts the update is applied on
    #[serde(default)]
    pub hosts: Vec<String>,
}

/// Result of a server-side update precheck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivepatchStatus {
    OkLivepatchComplete,
    OkLivepatchIncomplete,
    Ok,
}

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatusType {
    Pending,
    Success,
    Failure,
    Cancelling,
    Cancelled,
}

impl TaskStatusType {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatusType::Pending | TaskStatusType::Cancelling)
    }
}

/// Task record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub uuid: String,
    pub status: TaskStatusType,
    /// Progress in the range 0.0 to 1.0
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub error_info: Vec<String>,
}
