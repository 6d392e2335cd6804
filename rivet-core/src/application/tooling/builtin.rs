use super::interface::{Capability, ParameterSpec, ToolExecutor};
use crate::domain::types::ToolContent;
use std::sync::Arc;

pub const COMPLETION_PARAMETER: &str = "result";

/// The tool whose execution ends the task. Returns its `result` argument.
pub fn completion_capability(name: &str) -> Capability {
    let executor: ToolExecutor = Arc::new(|call| {
        let result = call
            .argument(COMPLETION_PARAMETER)
            .unwrap_or_default()
            .trim()
            .to_string();
        Box::pin(async move { Ok(ToolContent::Text(result)) })
    });
    Capability::new(
        name,
        "Present the final result of the task to the user. Use it only once the task is done; it ends the task.",
        executor,
    )
    .with_parameter(ParameterSpec::required(
        COMPLETION_PARAMETER,
        "A clear summary of what was accomplished.",
    ))
}
