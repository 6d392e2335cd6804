//! # Streaming Response Parser
//!
//! Turns streamed model output into [`ContentBlock`]s. Tool invocations are
//! written as nested tags whose names come from the live tool catalog:
//!
//! ```text
//! Let me look at the file.
//! <read_file>
//! <path>src/main.rs</path>
//! </read_file>
//! ```
//!
//! The parser is a character-level state machine. A `<` opens a tag candidate
//! that is buffered until `>` resolves it; candidates that cannot be a known
//! tag are replayed as literal text. Nothing is rescanned, so any split of the
//! same input into fragments yields the same blocks.

use crate::domain::types::{ContentBlock, ToolUse};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Name and parameter names of a tool the parser should recognise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub name: String,
    pub parameters: Vec<String>,
}

impl ToolSpec {
    pub fn new<I, S>(name: impl Into<String>, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            parameters: parameters.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug)]
enum State {
    Text,
    Tool {
        call: ToolUse,
        param: Option<(String, String)>,
    },
}

#[derive(Debug)]
pub struct StreamParser {
    tools: HashMap<String, HashSet<String>>,
    max_tag_len: usize,
    completed: Vec<ContentBlock>,
    text: String,
    state: State,
    tag: Option<String>,
    next_id: usize,
}

impl StreamParser {
    pub fn new(specs: &[ToolSpec]) -> Self {
        let tools: HashMap<String, HashSet<String>> = specs
            .iter()
            .map(|spec| {
                (
                    spec.name.clone(),
                    spec.parameters.iter().cloned().collect(),
                )
            })
            .collect();
        let longest = specs
            .iter()
            .flat_map(|spec| std::iter::once(&spec.name).chain(spec.parameters.iter()))
            .map(String::len)
            .max()
            .unwrap_or(0);
        Self {
            tools,
            // "</" + name + ">"
            max_tag_len: longest + 3,
            completed: Vec::new(),
            text: String::new(),
            state: State::Text,
            tag: None,
            next_id: 0,
        }
    }

    /// Consume a fragment and return the blocks seen so far. The last block
    /// may be an unfinished tool invocation with `partial` set.
    pub fn feed(&mut self, fragment: &str) -> Vec<ContentBlock> {
        for ch in fragment.chars() {
            self.push_char(ch);
        }
        self.blocks()
    }

    /// Snapshot of the blocks parsed so far without consuming more input.
    pub fn blocks(&self) -> Vec<ContentBlock> {
        let mut blocks = self.completed.clone();
        match &self.state {
            State::Text => {
                let trimmed = self.text.trim();
                if !trimmed.is_empty() {
                    blocks.push(ContentBlock::text(trimmed));
                }
            }
            State::Tool { call, param } => {
                let mut partial = call.clone();
                if let Some((name, value)) = param {
                    partial
                        .arguments
                        .insert(name.clone(), value.trim().to_string());
                }
                blocks.push(ContentBlock::ToolUse(partial));
            }
        }
        blocks
    }

    /// Resolve the end of the stream. Every returned tool invocation is
    /// complete; one that never closed is dropped.
    pub fn finalize(mut self) -> Vec<ContentBlock> {
        if let Some(tag) = self.tag.take() {
            self.literal(&tag);
        }
        match std::mem::replace(&mut self.state, State::Text) {
            State::Text => self.flush_text(),
            State::Tool { call, .. } => {
                debug!(tool = %call.name, "Dropping tool invocation that never closed");
            }
        }
        self.completed
    }

    fn push_char(&mut self, ch: char) {
        if let Some(tag) = self.tag.as_mut() {
            if ch == '>' {
                tag.push(ch);
                let tag = self.tag.take().unwrap_or_default();
                self.resolve_tag(&tag);
                return;
            }
            let valid = ch.is_ascii_alphanumeric()
                || matches!(ch, '_' | '-' | '.')
                || (ch == '/' && tag.len() == 1);
            if valid && tag.len() < self.max_tag_len {
                tag.push(ch);
                return;
            }
            let tag = self.tag.take().unwrap_or_default();
            self.literal(&tag);
            // The rejected character may itself open a new tag.
            self.push_char(ch);
            return;
        }

        if ch == '<' {
            self.tag = Some(String::from("<"));
        } else {
            let mut buf = [0u8; 4];
            self.literal(ch.encode_utf8(&mut buf));
        }
    }

    fn resolve_tag(&mut self, tag: &str) {
        let inner = &tag[1..tag.len() - 1];
        let (closing, name) = match inner.strip_prefix('/') {
            Some(name) => (true, name),
            None => (false, inner),
        };

        match &mut self.state {
            State::Text => {
                if !closing && self.tools.contains_key(name) {
                    self.flush_text();
                    self.next_id += 1;
                    let mut call = ToolUse::new(name);
                    call.id = Some(format!("toolu_{:02}", self.next_id));
                    self.state = State::Tool { call, param: None };
                } else {
                    self.text.push_str(tag);
                }
            }
            State::Tool { call, param } => match param.take() {
                Some((param_name, mut value)) => {
                    if closing && name == param_name {
                        call.arguments
                            .insert(param_name, value.trim().to_string());
                    } else {
                        value.push_str(tag);
                        *param = Some((param_name, value));
                    }
                }
                None => {
                    if closing && name == call.name {
                        let mut call = call.clone();
                        call.partial = false;
                        self.completed.push(ContentBlock::ToolUse(call));
                        self.state = State::Text;
                    } else if !closing
                        && self
                            .tools
                            .get(&call.name)
                            .is_some_and(|params| params.contains(name))
                    {
                        *param = Some((name.to_string(), String::new()));
                    }
                }
            },
        }
    }

    fn literal(&mut self, text: &str) {
        match &mut self.state {
            State::Text => self.text.push_str(text),
            State::Tool {
                param: Some((_, value)),
                ..
            } => value.push_str(text),
            // Whitespace between parameters carries no meaning.
            State::Tool { param: None, .. } => {}
        }
    }

    fn flush_text(&mut self) {
        let trimmed = self.text.trim();
        if !trimmed.is_empty() {
            self.completed.push(ContentBlock::text(trimmed));
        }
        self.text.clear();
    }
}

/// Concatenated free text with all tool markup removed.
pub fn display_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { content } => Some(content.as_str()),
            ContentBlock::ToolUse(_) => None,
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Tool invocations in emission order.
pub fn tool_uses(blocks: &[ContentBlock]) -> Vec<ToolUse> {
    blocks
        .iter()
        .filter_map(ContentBlock::as_tool_use)
        .cloned()
        .collect()
}

/// Render blocks back into the markup the model produced, for replaying
/// assistant turns to the model.
pub fn render_markup(blocks: &[ContentBlock]) -> String {
    let mut out = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block {
            ContentBlock::Text { content } => out.push(content.clone()),
            ContentBlock::ToolUse(call) => {
                let mut markup = format!("<{}>\n", call.name);
                for (name, value) in &call.arguments {
                    markup.push_str(&format!("<{name}>{value}</{name}>\n"));
                }
                markup.push_str(&format!("</{}>", call.name));
                out.push(markup);
            }
        }
    }
    out.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs() -> Vec<ToolSpec> {
        vec![
            ToolSpec::new("read_file", ["path"]),
            ToolSpec::new("write_to_file", ["path", "content"]),
            ToolSpec::new("attempt_completion", ["result"]),
            ToolSpec::new("files__search", ["query", "limit"]),
        ]
    }

    fn parse_whole(input: &str) -> Vec<ContentBlock> {
        let mut parser = StreamParser::new(&specs());
        parser.feed(input);
        parser.finalize()
    }

    fn parse_chunks(chunks: &[&str]) -> Vec<ContentBlock> {
        let mut parser = StreamParser::new(&specs());
        for chunk in chunks {
            parser.feed(chunk);
        }
        parser.finalize()
    }

    const SAMPLE: &str = "I'll read it first.\n<read_file>\n<path>src/main.rs</path>\n</read_file>\nThen write:\n<write_to_file>\n<path>a.txt</path>\n<content>\nif a < b && c > d { <b>bold</b> }\n</content>\n</write_to_file>";

    #[test]
    fn extracts_text_and_tool_blocks() {
        let blocks = parse_whole(SAMPLE);
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0], ContentBlock::text("I'll read it first."));
        let read = blocks[1].as_tool_use().expect("tool block");
        assert_eq!(read.name, "read_file");
        assert_eq!(read.argument("path"), Some("src/main.rs"));
        assert!(!read.partial);
        assert_eq!(read.id.as_deref(), Some("toolu_01"));
        assert_eq!(blocks[2], ContentBlock::text("Then write:"));
        let write = blocks[3].as_tool_use().expect("tool block");
        assert_eq!(
            write.argument("content"),
            Some("if a < b && c > d { <b>bold</b> }")
        );
        assert_eq!(write.id.as_deref(), Some("toolu_02"));
    }

    #[test]
    fn every_two_way_split_matches_single_chunk() {
        let expected = parse_whole(SAMPLE);
        let boundaries: Vec<usize> = SAMPLE.char_indices().map(|(i, _)| i).collect();
        for &at in &boundaries {
            let (head, tail) = SAMPLE.split_at(at);
            assert_eq!(parse_chunks(&[head, tail]), expected, "split at {at}");
        }
    }

    #[test]
    fn char_by_char_and_pseudo_random_chunking_match() {
        let expected = parse_whole(SAMPLE);
        let chars: Vec<String> = SAMPLE.chars().map(String::from).collect();
        let refs: Vec<&str> = chars.iter().map(String::as_str).collect();
        assert_eq!(parse_chunks(&refs), expected);

        let mut seed: u64 = 0x2545_f491;
        for _ in 0..50 {
            let mut chunks = Vec::new();
            let mut rest = SAMPLE;
            while !rest.is_empty() {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let mut len = (seed >> 59) as usize + 1;
                while len < rest.len() && !rest.is_char_boundary(len) {
                    len += 1;
                }
                let len = len.min(rest.len());
                let (head, tail) = rest.split_at(len);
                chunks.push(head);
                rest = tail;
            }
            assert_eq!(parse_chunks(&chunks), expected);
        }
    }

    #[test]
    fn partial_invocation_is_flagged_while_streaming() {
        let mut parser = StreamParser::new(&specs());
        let blocks = parser.feed("Working <read_file><path>src/l");
        assert_eq!(blocks.len(), 2);
        let partial = blocks[1].as_tool_use().expect("tool block");
        assert!(partial.partial);
        assert_eq!(partial.argument("path"), Some("src/l"));

        let blocks = parser.feed("ib.rs</path></read_file>");
        let done = blocks[1].as_tool_use().expect("tool block");
        assert!(!done.partial);
        assert_eq!(done.argument("path"), Some("src/lib.rs"));
    }

    #[test]
    fn split_opening_tag_is_not_shown_as_text() {
        let mut parser = StreamParser::new(&specs());
        let blocks = parser.feed("Hello <read_fi");
        assert_eq!(blocks, vec![ContentBlock::text("Hello")]);
        let blocks = parser.feed("le>");
        assert_eq!(blocks.len(), 2);
        assert!(blocks[1].as_tool_use().is_some_and(|tool| tool.partial));
    }

    #[test]
    fn unclosed_invocation_is_dropped_on_finalize() {
        let blocks = parse_whole("Intro\n<write_to_file><path>x</path><content>half");
        assert_eq!(blocks, vec![ContentBlock::text("Intro")]);
    }

    #[test]
    fn unknown_tags_stay_literal() {
        let blocks = parse_whole("Use <div> and <path>x</path> or a<b");
        assert_eq!(
            blocks,
            vec![ContentBlock::text("Use <div> and <path>x</path> or a<b")]
        );
    }

    #[test]
    fn double_angle_bracket_still_opens_tool() {
        let blocks = parse_whole("<<attempt_completion><result>ok</result></attempt_completion>");
        assert_eq!(blocks[0], ContentBlock::text("<"));
        let completion = blocks[1].as_tool_use().expect("tool");
        assert_eq!(completion.argument("result"), Some("ok"));
    }

    #[test]
    fn provider_namespaced_tools_parse_like_builtins() {
        let blocks = parse_whole(
            "<files__search>\n<query>fn main</query>\n<limit>5</limit>\n</files__search>",
        );
        let call = blocks[0].as_tool_use().expect("tool");
        assert_eq!(call.name, "files__search");
        assert_eq!(call.argument("query"), Some("fn main"));
        assert_eq!(call.argument("limit"), Some("5"));
    }

    #[test]
    fn parameters_of_other_tools_are_ignored() {
        let blocks = parse_whole("<read_file><content>x</content><path>a</path></read_file>");
        let call = blocks[0].as_tool_use().expect("tool");
        assert_eq!(call.arguments.len(), 1);
        assert_eq!(call.argument("path"), Some("a"));
    }

    #[test]
    fn display_text_strips_markup() {
        let blocks = parse_whole(SAMPLE);
        assert_eq!(display_text(&blocks), "I'll read it first.\n\nThen write:");
        assert_eq!(tool_uses(&blocks).len(), 2);
    }

    #[test]
    fn rendered_markup_parses_back_to_same_tools() {
        let blocks = parse_whole(SAMPLE);
        let reparsed = parse_whole(&render_markup(&blocks));
        assert_eq!(tool_uses(&reparsed), tool_uses(&blocks));
    }

    #[test]
    fn empty_input_yields_no_blocks() {
        assert!(parse_whole("  \n ").is_empty());
    }
}
