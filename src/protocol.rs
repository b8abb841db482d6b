//! Daemon wire protocol: newline-delimited JSON-RPC 2.0 frames.
//!
//! One line is one JSON object. Requests carry a client-chosen `id`;
//! responses echo it with either `result` or `error {code, message}`.
//! Parameter structs reject unknown fields and enumerated options so a
//! mistyped client call fails with `invalid_params` instead of silently
//! doing something else.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::search::intent::Intent;
use crate::search::scope::Scope;

/// Returned by `ping` and `health`.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: &Error) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(WireError {
                code: error.wire_code().to_string(),
                message: error.to_string(),
            }),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Method parameters
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchParams {
    pub query: String,
    #[serde(default = "default_intent")]
    pub intent: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub explain: bool,
}

fn default_intent() -> String {
    "auto".to_string()
}
fn default_k() -> usize {
    10
}

impl SearchParams {
    /// Validate the enumerated intent value.
    pub fn parsed_intent(&self) -> Result<Option<Intent>, Error> {
        Intent::parse(&self.intent).ok_or_else(|| {
            Error::InvalidParams(format!(
                "intent must be auto, definition, usage, concept, exact_text, or similar_code; got '{}'",
                self.intent
            ))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetSymbolParams {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FindUsagesParams {
    #[serde(default)]
    pub symbol_id: Option<String>,
    #[serde(default)]
    pub symbol_name: Option<String>,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default = "default_k")]
    pub k: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpandContextParams {
    pub table: String,
    pub id: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct IndexParams {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CancelParams {
    pub target: CancelTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelTarget {
    Indexing,
    Warmup,
    All,
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct EvalParams {
    #[serde(default = "default_eval_k")]
    pub k: usize,
    #[serde(default = "default_eval_queries")]
    pub max_queries: usize,
}

fn default_eval_k() -> usize {
    10
}
fn default_eval_queries() -> usize {
    50
}

/// Parse typed params, mapping deserialization failures to
/// `invalid_params`.
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, Error> {
    serde_json::from_value(params).map_err(|e| Error::InvalidParams(e.to_string()))
}
