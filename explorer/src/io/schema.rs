//! JSON Schema validation for oracle responses and persisted documents.

use anyhow::{Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;

pub const CHOICE_RESPONSE_SCHEMA: &str =
    include_str!("../../schemas/choice_response.schema.json");
pub const DECISION_RESPONSE_SCHEMA: &str =
    include_str!("../../schemas/decision_response.schema.json");
pub const GRAPH_SCHEMA: &str = include_str!("../../schemas/graph.schema.json");

/// Validate `instance` against the schema source `schema`.
///
/// `what` names the document in the error message.
pub fn validate_schema(schema: &str, instance: &Value, what: &str) -> Result<()> {
    let schema_value: Value =
        serde_json::from_str(schema).map_err(|err| anyhow!("parse {what} schema: {err}"))?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid {what} schema: {err}"))?;
    if !compiled.is_valid(instance) {
        let messages = compiled
            .iter_errors(instance)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "{what} schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}
