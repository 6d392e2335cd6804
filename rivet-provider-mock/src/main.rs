//! Scripted stdio tool provider.
//!
//! Speaks line-delimited JSON-RPC 2.0 on stdin/stdout and offers a fixed set
//! of tools whose behaviour exercises the client:
//!
//! - `echo`, `add`, `fail` - ordinary tools
//! - `whoami` - returns the JSON-RPC id of its own request
//! - `hang` - never answers
//! - `crash` - exits the process without answering
//! - `stray` - sends a response for an unknown id before the real one
//! - `grow` - adds a tool and announces `notifications/tools/list_changed`
//! - `ask_client` - sends `ping` and an unsupported request to the client
//!
//! Flags: `--exit-on-start` writes to stderr and exits with status 3,
//! `--noisy` prints non-JSON lines on stdout, `--paged` splits `tools/list`
//! into two pages.

use serde_json::{Value, json};
use std::env;
use std::io::{self, BufRead, Write};
use std::process;

struct Provider {
    noisy: bool,
    paged: bool,
    grown: bool,
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "--exit-on-start") {
        eprintln!("fatal: MOCK_TOKEN is not set");
        process::exit(3);
    }

    let mut provider = Provider {
        noisy: args.iter().any(|arg| arg == "--noisy"),
        paged: args.iter().any(|arg| arg == "--paged"),
        grown: false,
    };
    eprintln!("mock provider ready");
    if provider.noisy {
        send_raw("\u{1b}[32mINFO\u{1b}[0m starting");
        send_raw("plain log line");
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    while let Some(Ok(line)) = lines.next() {
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        // Notifications and stray responses need no answer.
        let (Some(id), Some(method)) = (message.get("id").cloned(), message.get("method")) else {
            continue;
        };
        let method = method.as_str().unwrap_or_default().to_string();
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        match method.as_str() {
            "initialize" => reply(
                &id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": { "listChanged": true } },
                    "serverInfo": { "name": "rivet-provider-mock", "version": "0.1.0" }
                }),
            ),
            "tools/list" => provider.list_tools(&id, &params),
            "tools/call" => provider.call_tool(&id, &params, &mut lines),
            "ping" => reply(&id, json!({})),
            other => send(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("Method not found: {other}") }
            })),
        }
    }
}

impl Provider {
    fn tools(&self) -> Vec<Value> {
        let mut tools = vec![
            tool("echo", "Echo the given text", json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })),
            tool("add", "Add two numbers", json!({
                "type": "object",
                "properties": { "a": { "type": "number" }, "b": { "type": "number" } },
                "required": ["a", "b"]
            })),
            tool("fail", "Always reports an error", empty_schema()),
            tool("whoami", "Return the request id", empty_schema()),
            tool("hang", "Never answers", empty_schema()),
            tool("crash", "Exit without answering", empty_schema()),
            tool("stray", "Send an unknown response id first", empty_schema()),
            tool("grow", "Announce a new tool", empty_schema()),
            tool("ask_client", "Send requests to the client", empty_schema()),
        ];
        if self.grown {
            tools.push(tool("extra", "Added at runtime", empty_schema()));
        }
        tools
    }

    fn list_tools(&self, id: &Value, params: &Value) {
        let tools = self.tools();
        if !self.paged {
            reply(id, json!({ "tools": tools }));
            return;
        }
        let split = tools.len() / 2;
        if params.get("cursor").and_then(Value::as_str) == Some("page-2") {
            reply(id, json!({ "tools": tools[split..].to_vec() }));
        } else {
            reply(id, json!({ "tools": tools[..split].to_vec(), "nextCursor": "page-2" }));
        }
    }

    fn call_tool(&mut self, id: &Value, params: &Value, lines: &mut impl Iterator<Item = io::Result<String>>) {
        let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        match name {
            "echo" => {
                let text = arguments.get("text").and_then(Value::as_str).unwrap_or_default();
                reply(id, text_result(text, false));
            }
            "add" => {
                let a = arguments.get("a").and_then(Value::as_f64);
                let b = arguments.get("b").and_then(Value::as_f64);
                match (a, b) {
                    (Some(a), Some(b)) => reply(id, text_result(&(a + b).to_string(), false)),
                    _ => reply(id, text_result("a and b must be numbers", true)),
                }
            }
            "fail" => reply(id, text_result("boom", true)),
            "whoami" => reply(id, text_result(&id.to_string(), false)),
            "hang" => {}
            "crash" => process::exit(1),
            "stray" => {
                send(&json!({ "jsonrpc": "2.0", "id": 987654, "result": {} }));
                reply(id, text_result("after stray", false));
            }
            "grow" => {
                self.grown = true;
                send(&json!({ "jsonrpc": "2.0", "method": "notifications/tools/list_changed" }));
                reply(id, text_result("grown", false));
            }
            "ask_client" => {
                send(&json!({ "jsonrpc": "2.0", "id": "srv-1", "method": "ping" }));
                send(&json!({ "jsonrpc": "2.0", "id": "srv-2", "method": "sampling/createMessage", "params": {} }));
                let mut ping = String::from("none");
                let mut sampling = String::from("none");
                while ping == "none" || sampling == "none" {
                    let Some(Ok(line)) = lines.next() else {
                        return;
                    };
                    let Ok(message) = serde_json::from_str::<Value>(&line) else {
                        continue;
                    };
                    let outcome = match message.get("error") {
                        Some(error) => error.get("code").map(Value::to_string).unwrap_or_default(),
                        None => "ok".to_string(),
                    };
                    match message.get("id").and_then(Value::as_str) {
                        Some("srv-1") => ping = outcome,
                        Some("srv-2") => sampling = outcome,
                        _ => {}
                    }
                }
                reply(id, text_result(&format!("ping={ping} sampling={sampling}"), false));
            }
            other => send(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32602, "message": format!("Unknown tool: {other}") }
            })),
        }
    }
}

fn tool(name: &str, description: &str, schema: Value) -> Value {
    json!({ "name": name, "description": description, "inputSchema": schema })
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

fn text_result(text: &str, is_error: bool) -> Value {
    json!({ "content": [{ "type": "text", "text": text }], "isError": is_error })
}

fn reply(id: &Value, result: Value) {
    send(&json!({ "jsonrpc": "2.0", "id": id, "result": result }));
}

fn send(message: &Value) {
    send_raw(&message.to_string());
}

fn send_raw(line: &str) {
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{line}");
    let _ = stdout.flush();
}
