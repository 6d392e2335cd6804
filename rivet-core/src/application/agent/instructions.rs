use crate::application::tooling::{Capability, ToolSource};

/// System prompt for one model turn, built from the live tool catalog.
pub fn compose_system_prompt(
    capabilities: &[Capability],
    completion_tool: &str,
    extra: Option<&str>,
) -> String {
    let mut sections = vec![
        "You are an autonomous coding agent. You work on the user's request step by step, using one tool per step, and you see the result of every tool before choosing the next one."
            .to_string(),
        format!(
            "TOOL USE\n\nTools are invoked with XML-style tags. The tool name is the outer tag and each parameter is an inner tag:\n\n<tool_name>\n<parameter_name>value</parameter_name>\n</tool_name>\n\nEvery response must contain at least one tool invocation. When the task is complete, use {completion_tool}; it ends the task, so use it only once everything is done."
        ),
    ];

    let mut tools = String::from("TOOLS");
    for capability in capabilities {
        tools.push_str("\n\n");
        tools.push_str(&describe(capability));
    }
    if capabilities.is_empty() {
        tools.push_str("\n\nNo tools are configured.");
    }
    sections.push(tools);

    if let Some(extra) = extra.map(str::trim).filter(|extra| !extra.is_empty()) {
        sections.push(format!("ADDITIONAL INSTRUCTIONS\n\n{extra}"));
    }
    sections.join("\n\n====\n\n")
}

fn describe(capability: &Capability) -> String {
    let mut out = format!("## {}\n", capability.name);
    if let ToolSource::Provider { provider_name, .. } = &capability.source {
        out.push_str(&format!("Provided by: {provider_name}\n"));
    }
    out.push_str(&format!("Description: {}\n", capability.description));
    if capability.parameters.is_empty() {
        out.push_str("Parameters: none\n");
    } else {
        out.push_str("Parameters:\n");
        for parameter in &capability.parameters {
            let requirement = if parameter.required { "required" } else { "optional" };
            match &parameter.description {
                Some(description) => out.push_str(&format!(
                    "- {} ({requirement}): {description}\n",
                    parameter.name
                )),
                None => out.push_str(&format!("- {} ({requirement})\n", parameter.name)),
            }
        }
    }
    out.push_str(&format!("Usage:\n<{name}>\n", name = capability.name));
    for parameter in &capability.parameters {
        out.push_str(&format!("<{0}>...</{0}>\n", parameter.name));
    }
    out.push_str(&format!("</{}>", capability.name));
    out
}
