//! Capabilities backed by tools discovered on connected providers.

use super::error::ToolError;
use super::interface::{Capability, ParameterKind, ParameterSpec, ToolExecutor, ToolSource};
use crate::application::mcp::{ProviderRegistry, ProviderTool, RegistryError};
use crate::domain::types::{ToolArguments, ToolContent};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Parameters declared by a JSON schema's `properties` and `required`.
pub fn parameters_from_schema(schema: Option<&Value>) -> Vec<ParameterSpec> {
    let Some(schema) = schema else {
        return Vec::new();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };

    properties
        .iter()
        .map(|(name, property)| ParameterSpec {
            name: name.clone(),
            description: property
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            required: required.contains(&name.as_str()),
            kind: property
                .get("type")
                .and_then(Value::as_str)
                .map(ParameterKind::from_schema_type)
                .unwrap_or_default(),
        })
        .collect()
}

/// Turn markup argument text into a JSON object typed after `parameters`.
pub fn coerce_arguments(
    tool: &str,
    parameters: &[ParameterSpec],
    arguments: &ToolArguments,
) -> Result<Value, ToolError> {
    let mut object = Map::new();
    for (name, raw) in arguments {
        let kind = parameters
            .iter()
            .find(|parameter| &parameter.name == name)
            .map(|parameter| parameter.kind)
            .unwrap_or_default();
        let value = coerce_value(kind, raw).map_err(|reason| ToolError::InvalidArgument {
            tool: tool.to_string(),
            parameter: name.clone(),
            reason,
        })?;
        object.insert(name.clone(), value);
    }
    Ok(Value::Object(object))
}

fn coerce_value(kind: ParameterKind, raw: &str) -> Result<Value, String> {
    let trimmed = raw.trim();
    match kind {
        ParameterKind::String => Ok(Value::String(raw.to_string())),
        ParameterKind::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(format!("expected true or false, got '{trimmed}'")),
        },
        ParameterKind::Integer => trimmed
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("expected an integer, got '{trimmed}'")),
        ParameterKind::Number => match serde_json::from_str::<Value>(trimmed) {
            Ok(value @ Value::Number(_)) => Ok(value),
            _ => Err(format!("expected a number, got '{trimmed}'")),
        },
        ParameterKind::Object => match serde_json::from_str::<Value>(trimmed) {
            Ok(value @ Value::Object(_)) => Ok(value),
            _ => Err("expected a JSON object".to_string()),
        },
        ParameterKind::Array => match serde_json::from_str::<Value>(trimmed) {
            Ok(value @ Value::Array(_)) => Ok(value),
            _ => Err("expected a JSON array".to_string()),
        },
    }
}

/// Capability named `<namespace>__<tool>` that routes to `tool`'s provider.
pub fn provider_capability(registry: Arc<ProviderRegistry>, tool: &ProviderTool) -> Capability {
    let parameters = parameters_from_schema(tool.tool.input_schema.as_ref());
    let provider_id = tool.provider_id.clone();
    let remote_name = tool.tool.name.clone();
    let qualified_name = tool.qualified_name.clone();
    let schema = parameters.clone();

    let executor: ToolExecutor = Arc::new(move |call| {
        let registry = Arc::clone(&registry);
        let provider_id = provider_id.clone();
        let remote_name = remote_name.clone();
        let qualified_name = qualified_name.clone();
        let schema = schema.clone();
        Box::pin(async move {
            let arguments = coerce_arguments(&qualified_name, &schema, &call.arguments)?;
            let result = registry
                .call_tool(&provider_id, &remote_name, arguments)
                .await
                .map_err(|err| match err {
                    RegistryError::Provider(err) => ToolError::Provider(err),
                    other => ToolError::execution(&qualified_name, other.to_string()),
                })?;
            if result.get("isError").and_then(Value::as_bool) == Some(true) {
                let message = ToolContent::Structured(result).render();
                return Err(ToolError::execution(&qualified_name, message));
            }
            Ok(ToolContent::Structured(result))
        })
    });

    let description = tool
        .tool
        .description
        .clone()
        .unwrap_or_else(|| format!("Tool '{}' from {}.", tool.tool.name, tool.provider_name));
    let mut capability = Capability::new(tool.qualified_name.clone(), description, executor)
        .with_approval(true)
        .with_source(ToolSource::Provider {
            provider_id: tool.provider_id.clone(),
            provider_name: tool.provider_name.clone(),
        });
    capability.parameters = parameters;
    capability
}
