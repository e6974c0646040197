/*
 * CEP Bridge - Filesystem Command Channel for Host Scripting
 * File Path: src/tools.rs
 * Responsibility: Representative tool definitions that build script bodies and dispatch them over the bridge.
 */

use crate::channel::{CommandChannel, SendOptions};
use crate::config::{BridgeConfig, LONG_TIMEOUT_MS};
use crate::response::Response;
use crate::script::{ScriptBuilder, assemble};
use serde_json::{Value, json};
use tracing::debug;

const MAX_TOOL_OUTPUT_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub output: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: true,
        }
    }

    fn from_response(response: Response) -> Self {
        if response.success {
            let data = response.data.unwrap_or(Value::Null);
            let text = serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string());
            Self::success(text)
        } else {
            Self::error(
                response
                    .error
                    .unwrap_or_else(|| "Host reported failure without a message".to_string()),
            )
        }
    }
}

pub const TOOL_NAMES: &[&str] = &[
    "ping",
    "get_project_info",
    "find_sequence",
    "export_sequence",
    "execute_script",
];

pub fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "ping",
            "description": "Check that the host application and its CEP plugin are answering.",
            "parameters": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "get_project_info",
            "description": "Name, path and sequences of the open project.",
            "parameters": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "find_sequence",
            "description": "Look up a sequence by exact name.",
            "parameters": {
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Sequence name" }
                },
                "required": ["name"]
            }
        }),
        json!({
            "name": "export_sequence",
            "description": "Render a sequence to disk with an encoder preset. Long running.",
            "parameters": {
                "type": "object",
                "properties": {
                    "sequence": { "type": "string", "description": "Sequence name" },
                    "outputPath": { "type": "string", "description": "Absolute output file path" },
                    "presetPath": { "type": "string", "description": "Absolute path to an .epr preset" }
                },
                "required": ["sequence", "outputPath", "presetPath"]
            }
        }),
        json!({
            "name": "execute_script",
            "description": "Run caller-authored script in the host engine. The body must return __ok(...) or __fail(...). Not subject to the pattern blocklist.",
            "parameters": {
                "type": "object",
                "properties": {
                    "script": { "type": "string", "description": "Script body" }
                },
                "required": ["script"]
            }
        }),
    ]
}

fn require_str_arg<'a>(args: &'a Value, field: &str) -> Result<&'a str, ToolOutput> {
    args.get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ToolOutput::error(format!("Error: Missing required argument `{}`.", field)))
}

fn ping_script() -> String {
    ScriptBuilder::new()
        .line("return __ok({ version: app.version, project: app.project ? app.project.name : null });")
        .finish()
}

fn project_info_script() -> String {
    ScriptBuilder::new()
        .line("if (!app.project) { return __fail(\"No project is open\"); }")
        .line("var sequences = [];")
        .line("for (var i = 0; i < app.project.sequences.numSequences; i++) {")
        .line("    sequences.push(app.project.sequences[i].name);")
        .line("}")
        .line("var active = app.project.activeSequence;")
        .line("return __ok({ name: app.project.name, path: app.project.path, sequences: sequences, activeSequence: active ? active.name : null });")
        .finish()
}

fn find_sequence_script(name: &str) -> String {
    ScriptBuilder::new()
        .let_string("name", name)
        .line("var sequence = __findSequence(name);")
        .line("if (!sequence) { return __fail(\"Sequence not found: \" + name); }")
        .line("return __ok({ name: sequence.name, id: sequence.sequenceID, durationSeconds: __ticksToSeconds(sequence.end) });")
        .finish()
}

fn export_sequence_script(sequence: &str, output_path: &str, preset_path: &str) -> String {
    ScriptBuilder::new()
        .let_string("sequenceName", sequence)
        .let_string("outputPath", output_path)
        .let_string("presetPath", preset_path)
        .line("var sequence = __findSequence(sequenceName);")
        .line("if (!sequence) { return __fail(\"Sequence not found: \" + sequenceName); }")
        .line("var exported = sequence.exportAsMediaDirect(outputPath, presetPath, app.encoder.ENCODE_ENTIRE);")
        .line("if (!exported) { return __fail(\"Export failed for sequence: \" + sequenceName); }")
        .line("return __ok({ sequence: sequenceName, outputPath: outputPath });")
        .finish()
}

/// Builds the script and call parameters for one tool.
fn plan_tool(
    name: &str,
    args: &Value,
    config: &BridgeConfig,
) -> Result<(String, BridgeConfig, SendOptions), ToolOutput> {
    let plan = match name {
        "ping" => (ping_script(), config.clone(), SendOptions::validated()),
        "get_project_info" => (project_info_script(), config.clone(), SendOptions::validated()),
        "find_sequence" => {
            let seq_name = require_str_arg(args, "name")?;
            (find_sequence_script(seq_name), config.clone(), SendOptions::validated())
        }
        "export_sequence" => {
            let sequence = require_str_arg(args, "sequence")?;
            let output_path = require_str_arg(args, "outputPath")?;
            let preset_path = require_str_arg(args, "presetPath")?;
            (
                export_sequence_script(sequence, output_path, preset_path),
                config.with_timeout(LONG_TIMEOUT_MS.max(config.timeout_ms)),
                SendOptions::validated().in_slot(format!("export:{}", sequence)),
            )
        }
        // The one caller allowed past the pattern blocklist.
        "execute_script" => {
            let body = require_str_arg(args, "script")?;
            (assemble(body), config.clone(), SendOptions::unchecked())
        }
        _ => return Err(ToolOutput::error(format!("Error: Unknown tool `{}`", name))),
    };
    Ok(plan)
}

pub async fn dispatch_tool(
    channel: &CommandChannel,
    config: &BridgeConfig,
    name: &str,
    args: &Value,
) -> ToolOutput {
    let (script, call_config, options) = match plan_tool(name, args, config) {
        Ok(plan) => plan,
        Err(output) => return output,
    };
    debug!(tool = name, timeout_ms = call_config.timeout_ms, "Dispatching tool");

    let output = match channel.send(&script, &call_config, &options).await {
        Ok(response) => ToolOutput::from_response(response),
        Err(e) => ToolOutput::error(format!("Error: {}", e)),
    };

    ToolOutput {
        output: truncate_output(output.output, MAX_TOOL_OUTPUT_BYTES),
        is_error: output.is_error,
    }
}

fn truncate_output(output: String, limit: usize) -> String {
    if limit == 0 || output.len() <= limit {
        return output;
    }

    let mut prefix_end = limit / 2;
    while prefix_end > 0 && !output.is_char_boundary(prefix_end) {
        prefix_end -= 1;
    }

    let mut suffix_start = output.len().saturating_sub(limit / 2);
    while suffix_start < output.len() && !output.is_char_boundary(suffix_start) {
        suffix_start += 1;
    }

    format!(
        "{} ... [TRUNCATED {} bytes] ... {}",
        &output[..prefix_end],
        suffix_start - prefix_end,
        &output[suffix_start..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn fast_channel() -> CommandChannel {
        CommandChannel::default().with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_every_tool_has_a_definition() {
        let definitions = tool_definitions();
        let names: Vec<&str> = definitions.iter().filter_map(|d| d["name"].as_str()).collect();
        assert_eq!(names, TOOL_NAMES);
    }

    #[test]
    fn test_find_sequence_escapes_the_name() {
        let script = find_sequence_script("Cut \"v2\"\nfinal");
        assert!(script.contains("var name = \"Cut \\\"v2\\\"\\nfinal\";"));
    }

    #[test]
    fn test_export_uses_long_timeout_and_slot() {
        let config = BridgeConfig::new("/tmp/bridge");
        let args = json!({ "sequence": "Main", "outputPath": "/out/main.mp4", "presetPath": "/p/h264.epr" });

        let (script, call_config, options) = plan_tool("export_sequence", &args, &config).unwrap();
        assert_eq!(call_config.timeout_ms, LONG_TIMEOUT_MS);
        assert_eq!(options.slot.as_deref(), Some("export:Main"));
        assert!(options.validate);
        assert!(script.contains("exportAsMediaDirect"));
    }

    #[test]
    fn test_only_execute_script_skips_pattern_checks() {
        let config = BridgeConfig::new("/tmp/bridge");
        for name in TOOL_NAMES {
            let args = json!({
                "name": "n", "sequence": "s", "outputPath": "o", "presetPath": "p", "script": "return __ok(1);"
            });
            let (_, _, options) = plan_tool(name, &args, &config).unwrap();
            assert_eq!(options.validate, *name != "execute_script", "tool {}", name);
        }
    }

    #[test]
    fn test_missing_argument_is_reported() {
        let config = BridgeConfig::new("/tmp/bridge");
        let err = plan_tool("find_sequence", &json!({}), &config).unwrap_err();
        assert!(err.is_error);
        assert!(err.output.contains("Missing required argument `name`"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_an_error() {
        let dir = tempdir().unwrap();
        let config = BridgeConfig::new(dir.path());
        let result = dispatch_tool(&fast_channel(), &config, "nope", &json!({})).await;
        assert!(result.is_error);
        assert!(result.output.contains("Unknown tool `nope`"));
    }

    #[tokio::test]
    async fn test_execute_script_bypasses_blocklist_but_not_timeout() {
        let dir = tempdir().unwrap();
        let config = BridgeConfig::new(dir.path()).with_timeout(50);
        let args = json!({ "script": "return __ok(eval(\"1 + 1\"));" });

        let result = dispatch_tool(&fast_channel(), &config, "execute_script", &args).await;
        assert!(result.is_error);
        assert!(result.output.contains("timed out"));
        assert!(!result.output.contains("blocked pattern"));
    }

    #[test]
    fn test_response_rendering() {
        let ok = ToolOutput::from_response(Response::ok(json!({ "a": 1 })));
        assert_eq!(ok, ToolOutput::success("{\n  \"a\": 1\n}"));

        let failed = ToolOutput::from_response(Response::failure("No project is open"));
        assert_eq!(failed, ToolOutput::error("No project is open"));
    }

    #[test]
    fn test_truncate_output_respects_char_boundaries() {
        let text = "é".repeat(100);
        let truncated = truncate_output(text, 21);
        assert!(truncated.contains("[TRUNCATED"));
        assert!(truncate_output("short".to_string(), 100) == "short");
    }
}
