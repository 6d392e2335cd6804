use rivet_core::agent::{AgentEvent, TaskState};
use rivet_core::types::{ToolArguments, ToolResult};

const RESULT_PREVIEW_CHARS: usize = 400;

/// Turns agent events into terminal output.
///
/// Streamed text arrives as the full display text of the turn so far; only
/// the unseen suffix is printed.
#[derive(Debug, Default)]
pub struct Renderer {
    shown: String,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, event: &AgentEvent) -> Option<String> {
        match event {
            AgentEvent::Text { content, partial } => self.render_text(content, *partial),
            AgentEvent::ToolCall { call } if !call.partial => Some(format!(
                "{}[tool] {}{}\n",
                self.break_line(),
                call.name,
                format_arguments(&call.arguments)
            )),
            AgentEvent::ToolCall { .. } => None,
            AgentEvent::ToolResult { result } => Some(format_result(result)),
            AgentEvent::Diff { tool, summary } => Some(format!(
                "[diff] {tool}: {} file(s), +{} -{}\n",
                summary.files.len(),
                summary.insertions(),
                summary.deletions()
            )),
            AgentEvent::Usage { turn, total } => Some(format!(
                "{}[usage] turn {} in / {} out, total {} tokens\n",
                self.break_line(),
                turn.input_tokens,
                turn.output_tokens,
                total.total()
            )),
            AgentEvent::Error { message, .. } => Some(format!("{}[error] {message}\n", self.break_line())),
            AgentEvent::PermissionRequest {
                tool, arguments, ..
            } => Some(format!(
                "{}Allow {tool}{}? [y/n] ",
                self.break_line(),
                format_arguments(arguments)
            )),
            AgentEvent::Finished { state, message } => {
                let mut out = self.break_line();
                if let Some(message) = message {
                    out.push_str(message);
                    out.push('\n');
                }
                out.push_str(&format!("[{}]\n", finish_label(*state)));
                Some(out)
            }
        }
    }

    fn render_text(&mut self, content: &str, partial: bool) -> Option<String> {
        let mut out = match content.strip_prefix(self.shown.as_str()) {
            Some(suffix) => suffix.to_string(),
            None => format!("{}{content}", self.break_line()),
        };
        if partial {
            self.shown = content.to_string();
        } else {
            self.shown.clear();
            out.push('\n');
        }
        (!out.is_empty()).then_some(out)
    }

    /// Newline needed to leave an unfinished streamed line.
    fn break_line(&mut self) -> String {
        if self.shown.is_empty() {
            String::new()
        } else {
            self.shown.clear();
            "\n".to_string()
        }
    }
}

fn format_arguments(arguments: &ToolArguments) -> String {
    if arguments.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = arguments
        .iter()
        .map(|(name, value)| format!("{name}={}", preview(value, 60)))
        .collect();
    format!(" ({})", pairs.join(", "))
}

fn format_result(result: &ToolResult) -> String {
    let label = if result.is_error { "failed" } else { "ok" };
    format!(
        "[{} {label}] {}\n",
        result.tool,
        preview(&result.render(), RESULT_PREVIEW_CHARS)
    )
}

fn preview(text: &str, limit: usize) -> String {
    let single_line = text.replace('\n', " ");
    match single_line.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &single_line[..cut]),
        None => single_line,
    }
}

fn finish_label(state: TaskState) -> &'static str {
    match state {
        TaskState::Completed => "task completed",
        TaskState::Cancelled => "task cancelled",
        _ => "task failed",
    }
}
