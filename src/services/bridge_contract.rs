//! Bridge contract layer.
//!
//! Bridges answer `submit`, `status`, `cancel` and `active_read` calls with a
//! versioned envelope:
//!
//! ```json
//! {"contractVersion": "bridge-contract/v1", "adapterId": "ot2",
//!  "operation": "status", "result": {"status": "running"}}
//! ```
//!
//! Strict mode accepts only that envelope. With strict mode off, a payload
//! that fails the envelope check is searched breadth-first for a small
//! allow-list of legacy field names and, if the fields the operation needs
//! are found, returned tagged `legacy`.

use std::collections::VecDeque;

use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::errors::ContractError;
use crate::domain::models::{
    BridgeContractEnvelope, BridgeOperation, ParsedBridgeResponse, BRIDGE_CONTRACT_VERSION,
};

const RUN_ID_KEYS: &[&str] = &["runId", "id"];
const STATUS_KEYS: &[&str] = &["status", "runStatus"];
const RAW_DATA_KEYS: &[&str] = &["rawDataPath"];

/// Depth limit for the legacy search.
pub const DEFAULT_MAX_DEPTH: usize = 4;
/// Node limit for the legacy search.
const MAX_VISITED: usize = 1024;

#[derive(Debug, Clone)]
pub struct BridgeContractParser {
    strict: bool,
    max_depth: usize,
}

impl BridgeContractParser {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn strict() -> Self {
        Self::new(true)
    }

    pub fn legacy_compatible() -> Self {
        Self::new(false)
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Parse a raw bridge response for `operation` from `adapter_id`.
    pub fn parse(
        &self,
        operation: BridgeOperation,
        adapter_id: &str,
        raw: &str,
    ) -> Result<ParsedBridgeResponse, ContractError> {
        let value: Value = serde_json::from_str(raw.trim()).map_err(|e| ContractError::InvalidJson {
            operation: operation.as_str().to_string(),
            reason: e.to_string(),
        })?;
        self.parse_value(operation, adapter_id, &value)
    }

    pub fn parse_value(
        &self,
        operation: BridgeOperation,
        adapter_id: &str,
        value: &Value,
    ) -> Result<ParsedBridgeResponse, ContractError> {
        let strict_err = match parse_envelope(operation, adapter_id, value) {
            Ok(parsed) => return Ok(parsed),
            Err(e) => e,
        };
        if self.strict {
            return Err(strict_err);
        }

        debug!(
            operation = operation.as_str(),
            adapter_id,
            error = %strict_err,
            "strict contract check failed, trying legacy extraction"
        );
        self.extract_legacy(operation, value).ok_or_else(|| ContractError::ShapeMismatch {
            operation: operation.as_str().to_string(),
            expected: operation.expected_shape(),
            reason: format!("{strict_err}; legacy fields not found"),
        })
    }

    fn extract_legacy(&self, operation: BridgeOperation, value: &Value) -> Option<ParsedBridgeResponse> {
        let found = LegacyFields::search(value, self.max_depth);
        let satisfied = match operation {
            BridgeOperation::Submit => found.run_id.is_some(),
            BridgeOperation::Status | BridgeOperation::Cancel => found.status.is_some(),
            BridgeOperation::ActiveRead => found.raw_data_path.is_some(),
        };
        satisfied.then(|| ParsedBridgeResponse {
            operation,
            run_id: found.run_id,
            raw_data_path: found.raw_data_path,
            status: found.status,
            contract_version: None,
            adapter_id: None,
            legacy: true,
        })
    }
}

impl Default for BridgeContractParser {
    fn default() -> Self {
        Self::strict()
    }
}

fn parse_envelope(
    operation: BridgeOperation,
    adapter_id: &str,
    value: &Value,
) -> Result<ParsedBridgeResponse, ContractError> {
    let mismatch = |reason: String| ContractError::ShapeMismatch {
        operation: operation.as_str().to_string(),
        expected: operation.expected_shape(),
        reason,
    };

    let envelope: BridgeContractEnvelope =
        serde_json::from_value(value.clone()).map_err(|e| mismatch(e.to_string()))?;

    if envelope.contract_version != BRIDGE_CONTRACT_VERSION {
        return Err(ContractError::UnsupportedVersion {
            operation: operation.as_str().to_string(),
            version: envelope.contract_version,
        });
    }
    if envelope.operation != operation {
        return Err(mismatch(format!(
            "operation is {}",
            envelope.operation.as_str()
        )));
    }
    if envelope.adapter_id != adapter_id {
        return Err(mismatch(format!("adapterId is {}", envelope.adapter_id)));
    }

    let result = envelope
        .result
        .as_object()
        .ok_or_else(|| mismatch("result is not an object".to_string()))?;
    for field in operation.required_result_fields() {
        if string_field(result, field).is_none() {
            return Err(mismatch(format!("result.{field} missing or not a string")));
        }
    }

    Ok(ParsedBridgeResponse {
        operation,
        run_id: string_field(result, "runId"),
        raw_data_path: string_field(result, "rawDataPath"),
        status: string_field(result, "status"),
        contract_version: Some(envelope.contract_version),
        adapter_id: Some(envelope.adapter_id),
        legacy: false,
    })
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Identifier-like scalar: strings as-is, integers stringified.
fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct LegacyFields {
    run_id: Option<String>,
    status: Option<String>,
    raw_data_path: Option<String>,
}

impl LegacyFields {
    /// Breadth-first over object values (and array items), shallowest
    /// match wins per field.
    fn search(root: &Value, max_depth: usize) -> Self {
        let mut found = Self::default();
        let mut queue: VecDeque<(&Value, usize)> = VecDeque::from([(root, 0)]);
        let mut visited = 0usize;

        while let Some((value, depth)) = queue.pop_front() {
            visited += 1;
            if visited > MAX_VISITED || found.complete() {
                break;
            }
            let children: Vec<&Value> = match value {
                Value::Object(object) => {
                    found.absorb(object);
                    object.values().collect()
                }
                Value::Array(items) => items.iter().collect(),
                _ => continue,
            };
            if depth < max_depth {
                queue.extend(
                    children
                        .into_iter()
                        .filter(|child| child.is_object() || child.is_array())
                        .map(|child| (child, depth + 1)),
                );
            }
        }
        found
    }

    fn absorb(&mut self, object: &Map<String, Value>) {
        if self.run_id.is_none() {
            self.run_id = RUN_ID_KEYS.iter().find_map(|k| object.get(*k).and_then(scalar_id));
        }
        if self.status.is_none() {
            self.status = STATUS_KEYS.iter().find_map(|k| string_field(object, k));
        }
        if self.raw_data_path.is_none() {
            self.raw_data_path = RAW_DATA_KEYS.iter().find_map(|k| string_field(object, k));
        }
    }

    fn complete(&self) -> bool {
        self.run_id.is_some() && self.status.is_some() && self.raw_data_path.is_some()
    }
}
