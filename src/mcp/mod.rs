//! MCP server — the AI-agent surface.
//!
//! JSON-RPC 2.0 over stdio, one message per line.  The tool set is the
//! deliberate subset that can never return a plaintext secret value:
//! agents can list, probe shape and format, read non-sensitive fields,
//! and *use* secrets through the sandboxed runner, but no tool returns
//! sensitive plaintext.  Tool errors come back as code -32000 with a
//! message and nothing else.

use std::io::{BufRead, Write};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::audit::Channel;
use crate::errors::{Result, SecretCtlError};
use crate::facade::{Facade, RunSpec};
use crate::vault::secret::Binding;

/// Protocol revision reported by `initialize`.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error code for tool failures.
const TOOL_ERROR: i32 = -32000;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    /// Absent for notifications, which get no response.
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError { code, message }),
        }
    }
}

/// One tool descriptor for `tools/list`.
#[derive(Debug, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

fn tool_list() -> Vec<Tool> {
    vec![
        Tool {
            name: "secret_list",
            description: "List secret keys with tags, expiry, and metadata flags",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tag": {"type": "string", "description": "Only keys carrying this tag"}
                }
            }),
        },
        Tool {
            name: "secret_exists",
            description: "Check whether a key exists, with clear-side metadata",
            input_schema: json!({
                "type": "object",
                "properties": {"key": {"type": "string"}},
                "required": ["key"]
            }),
        },
        Tool {
            name: "secret_get_masked",
            description: "Masked form of a secret value: length and last 4 characters",
            input_schema: json!({
                "type": "object",
                "properties": {"key": {"type": "string"}},
                "required": ["key"]
            }),
        },
        Tool {
            name: "secret_list_fields",
            description: "Field names, sensitivity flags, and hints of a secret",
            input_schema: json!({
                "type": "object",
                "properties": {"key": {"type": "string"}},
                "required": ["key"]
            }),
        },
        Tool {
            name: "secret_get_field",
            description: "Plaintext of one non-sensitive field",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string"},
                    "field": {"type": "string"}
                },
                "required": ["key", "field"]
            }),
        },
        Tool {
            name: "secret_run",
            description: "Run an allowed command with secrets injected as environment \
                          variables; output is sanitized",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "args": {"type": "array", "items": {"type": "string"}},
                    "keys": {"type": "array", "items": {"type": "string"}},
                    "timeout_seconds": {"type": "integer"},
                    "env_prefix": {"type": "string"},
                    "env": {"type": "string", "description": "Environment alias"}
                },
                "required": ["command", "keys"]
            }),
        },
        Tool {
            name: "secret_run_with_bindings",
            description: "Like secret_run, with explicit field-to-variable bindings",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "args": {"type": "array", "items": {"type": "string"}},
                    "keys": {"type": "array", "items": {"type": "string"}},
                    "bindings": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "env": {"type": "string"},
                                "field": {"type": "string"}
                            },
                            "required": ["env", "field"]
                        }
                    },
                    "timeout_seconds": {"type": "integer"},
                    "env_prefix": {"type": "string"},
                    "env": {"type": "string"}
                },
                "required": ["command", "keys", "bindings"]
            }),
        },
    ]
}

/// The stdio server.  Owns the facade for the lifetime of the process.
pub struct McpServer {
    facade: Facade,
}

impl McpServer {
    pub fn new(facade: Facade) -> Self {
        Self { facade }
    }

    pub fn facade(&self) -> &Facade {
        &self.facade
    }

    /// Serve line-delimited JSON-RPC until EOF.
    pub fn serve<R: BufRead, W: Write>(&self, input: R, mut output: W) -> Result<()> {
        for line in input.lines() {
            let line = line.map_err(|e| SecretCtlError::io("reading an MCP request", e))?;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(&line) {
                writeln!(output, "{response}")
                    .and_then(|_| output.flush())
                    .map_err(|e| SecretCtlError::io("writing an MCP response", e))?;
            }
        }
        Ok(())
    }

    /// Process one raw line.  Notifications produce no output.
    pub fn handle_line(&self, line: &str) -> Option<String> {
        let response = match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(request)?,
            Err(e) => JsonRpcResponse::err(Value::Null, -32700, format!("parse error: {e}")),
        };
        serde_json::to_string(&response).ok()
    }

    fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone()?;

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::ok(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {
                        "name": "secretctl",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            ),
            "tools/list" => JsonRpcResponse::ok(id, json!({"tools": tool_list()})),
            "tools/call" => {
                let name = request.params["name"].as_str().unwrap_or_default().to_string();
                let arguments = request.params["arguments"].clone();
                match self.dispatch_tool(&name, &arguments) {
                    Ok(result) => JsonRpcResponse::ok(
                        id,
                        json!({
                            "content": [{
                                "type": "text",
                                "text": result.to_string(),
                            }],
                            "isError": false,
                        }),
                    ),
                    Err(e) => JsonRpcResponse::err(id, TOOL_ERROR, e.to_string()),
                }
            }
            "ping" => JsonRpcResponse::ok(id, json!({})),
            other => JsonRpcResponse::err(id, -32601, format!("unknown method '{other}'")),
        };
        Some(response)
    }

    fn dispatch_tool(&self, name: &str, args: &Value) -> Result<Value> {
        match name {
            "secret_list" => {
                let tag = args["tag"].as_str();
                let summaries = self.facade.list(Channel::Mcp, tag)?;
                to_value(&summaries)
            }
            "secret_exists" => {
                let key = required_str(args, "key")?;
                let info = self.facade.exists(Channel::Mcp, key)?;
                to_value(&info)
            }
            "secret_get_masked" => {
                let key = required_str(args, "key")?;
                let masked = self.facade.get_masked(Channel::Mcp, key)?;
                to_value(&masked)
            }
            "secret_list_fields" => {
                let key = required_str(args, "key")?;
                let fields = self.facade.list_fields(Channel::Mcp, key)?;
                to_value(&fields)
            }
            "secret_get_field" => {
                let key = required_str(args, "key")?;
                let field = required_str(args, "field")?;
                let value = self.facade.get_field(Channel::Mcp, key, field)?;
                let text = String::from_utf8_lossy(&value).into_owned();
                Ok(json!({"value": text}))
            }
            "secret_run" | "secret_run_with_bindings" => {
                let spec = parse_run_spec(args, name == "secret_run_with_bindings")?;
                let outcome = self.facade.run(Channel::Mcp, &spec, None)?;
                Ok(json!({
                    "exit_code": outcome.exit_code,
                    "stdout": String::from_utf8_lossy(&outcome.stdout),
                    "stderr": String::from_utf8_lossy(&outcome.stderr),
                    "duration_ms": outcome.duration.as_millis() as u64,
                    "injected": outcome.injected,
                }))
            }
            other => Err(SecretCtlError::CommandFailed(format!(
                "unknown tool '{other}'"
            ))),
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| SecretCtlError::Serialization(e.to_string()))
}

fn required_str<'a>(args: &'a Value, name: &str) -> Result<&'a str> {
    args[name]
        .as_str()
        .ok_or_else(|| SecretCtlError::validation(name, "required string argument"))
}

fn parse_run_spec(args: &Value, with_bindings: bool) -> Result<RunSpec> {
    let command = required_str(args, "command")?.to_string();
    let str_list = |field: &str| -> Vec<String> {
        args[field]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    };

    let keys = str_list("keys");
    if keys.is_empty() {
        return Err(SecretCtlError::validation("keys", "at least one key pattern"));
    }

    let bindings = if with_bindings {
        let raw = args["bindings"]
            .as_array()
            .ok_or_else(|| SecretCtlError::validation("bindings", "required array argument"))?;
        let mut bindings = Vec::with_capacity(raw.len());
        for entry in raw {
            bindings.push(Binding {
                env: required_str(entry, "env")?.to_string(),
                field: required_str(entry, "field")?.to_string(),
            });
        }
        bindings
    } else {
        Vec::new()
    };

    Ok(RunSpec {
        command,
        args: str_list("args"),
        keys,
        timeout: args["timeout_seconds"].as_u64().map(Duration::from_secs),
        env_prefix: args["env_prefix"].as_str().unwrap_or_default().to_string(),
        env: args["env"].as_str().map(String::from),
        sanitize: true,
        bindings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_surface_has_no_plaintext_getter() {
        let names: Vec<&str> = tool_list().iter().map(|t| t.name).collect();
        assert!(!names.contains(&"secret_get"));
        assert!(!names.contains(&"secret_set"));
        assert!(!names.contains(&"secret_delete"));
        assert_eq!(names.len(), 7);
    }

    #[test]
    fn parse_error_yields_rpc_error() {
        let raw = "{not json";
        let request: std::result::Result<JsonRpcRequest, _> = serde_json::from_str(raw);
        assert!(request.is_err());
    }

    #[test]
    fn run_spec_requires_keys() {
        let args = json!({"command": "echo"});
        assert!(parse_run_spec(&args, false).is_err());
    }

    #[test]
    fn run_spec_parses_bindings() {
        let args = json!({
            "command": "echo",
            "keys": ["database/production"],
            "bindings": [{"env": "DB_PASS", "field": "password"}],
        });
        let spec = parse_run_spec(&args, true).unwrap();
        assert_eq!(spec.bindings.len(), 1);
        assert_eq!(spec.bindings[0].env, "DB_PASS");
        assert!(spec.sanitize);
    }
}
