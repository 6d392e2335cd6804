//! Message adapters - convert task history to chat API messages

use crate::application::parser::render_markup;
use crate::domain::types::{Turn, TurnPayload};
use serde_json::{Value, json};

/// Adapter for converting history to the OpenAI chat format
pub struct MessageAdapter;

impl MessageAdapter {
    /// Returns: [{"role": "...", "content": "..."}], system prompt first.
    ///
    /// Assistant turns are replayed as the markup the model wrote; tool
    /// results go back as user messages.
    pub fn to_openai_format(system_prompt: &str, history: &[Turn]) -> Vec<Value> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !system_prompt.trim().is_empty() {
            messages.push(json!({ "role": "system", "content": system_prompt }));
        }
        for turn in history {
            let message = match &turn.payload {
                TurnPayload::Text { text } => json!({
                    "role": turn.role.as_str(),
                    "content": text,
                }),
                TurnPayload::Assistant { blocks } => json!({
                    "role": "assistant",
                    "content": render_markup(blocks),
                }),
                TurnPayload::ToolResult { result } => json!({
                    "role": "user",
                    "content": format!("[{}] Result:\n{}", result.tool, result.render()),
                }),
            };
            messages.push(message);
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ContentBlock, ToolResult, ToolUse};

    #[test]
    fn history_maps_to_chat_messages() {
        let mut call = ToolUse::new("read_file");
        call.partial = false;
        call.arguments.insert("path".into(), "src/lib.rs".into());
        let history = vec![
            Turn::user("look at lib.rs"),
            Turn::assistant(vec![
                ContentBlock::text("Reading it."),
                ContentBlock::ToolUse(call.clone()),
            ]),
            Turn::tool_result(ToolResult::failure(&call, "no such file")),
        ];

        let messages = MessageAdapter::to_openai_format("be brief", &history);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(messages[1], json!({"role": "user", "content": "look at lib.rs"}));
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(
            messages[2]["content"],
            "Reading it.\n\n<read_file>\n<path>src/lib.rs</path>\n</read_file>"
        );
        assert_eq!(messages[3]["role"], "user");
        assert_eq!(messages[3]["content"], "[read_file] Result:\nno such file");
    }

    #[test]
    fn blank_system_prompt_is_omitted() {
        let messages = MessageAdapter::to_openai_format("  ", &[Turn::user("hi")]);
        assert_eq!(messages.len(), 1);
    }
}
