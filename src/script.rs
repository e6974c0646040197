/*
 * CEP Bridge - Filesystem Command Channel for Host Scripting
 * File Path: src/script.rs
 * Responsibility: Literal escaping and assembly of self-contained host scripts
 */

/// Helpers available to every body. `__ok` and `__fail` return the
/// serialized response; the host executor writes whatever the script
/// evaluates to into the response file.
const PREAMBLE: &str = r#"    var __TICKS_PER_SECOND = 254016000000;
    function __secondsToTicks(seconds) {
        return String(Math.round(Number(seconds) * __TICKS_PER_SECOND));
    }
    function __ticksToSeconds(ticks) {
        return Number(ticks) / __TICKS_PER_SECOND;
    }
    function __jsonString(text) {
        var out = "\"";
        for (var i = 0; i < text.length; i++) {
            var ch = text.charAt(i);
            var code = text.charCodeAt(i);
            if (ch === "\"" || ch === "\\") {
                out += "\\" + ch;
            } else if (ch === "\n") {
                out += "\\n";
            } else if (ch === "\r") {
                out += "\\r";
            } else if (ch === "\t") {
                out += "\\t";
            } else if (code < 0x20 || code === 0x2028 || code === 0x2029) {
                var hex = code.toString(16);
                out += "\\u" + "0000".substr(hex.length) + hex;
            } else {
                out += ch;
            }
        }
        return out + "\"";
    }
    function __json(value) {
        if (typeof JSON !== "undefined" && JSON.stringify) {
            return JSON.stringify(value);
        }
        if (value === null || value === undefined) {
            return "null";
        }
        var kind = typeof value;
        if (kind === "boolean") {
            return String(value);
        }
        if (kind === "number") {
            return isFinite(value) ? String(value) : "null";
        }
        if (kind === "string") {
            return __jsonString(value);
        }
        var parts = [];
        if (value instanceof Array) {
            for (var i = 0; i < value.length; i++) {
                parts.push(__json(value[i]));
            }
            return "[" + parts.join(",") + "]";
        }
        for (var key in value) {
            if (value.hasOwnProperty(key)) {
                parts.push(__json(String(key)) + ":" + __json(value[key]));
            }
        }
        return "{" + parts.join(",") + "}";
    }
    function __ok(data) {
        return __json({ success: true, data: data === undefined ? null : data });
    }
    function __fail(message) {
        return __json({ success: false, error: String(message) });
    }
    function __findSequence(name) {
        var sequences = app.project.sequences;
        for (var i = 0; i < sequences.numSequences; i++) {
            if (sequences[i].name === name) {
                return sequences[i];
            }
        }
        return null;
    }
    function __findProjectItem(name, bin) {
        var root = bin || app.project.rootItem;
        for (var i = 0; i < root.children.numItems; i++) {
            var item = root.children[i];
            if (item.name === name) {
                return item;
            }
            if (item.type === ProjectItemType.BIN) {
                var nested = __findProjectItem(name, item);
                if (nested) {
                    return nested;
                }
            }
        }
        return null;
    }
    function __findTrack(sequence, kind, index) {
        var tracks = kind === "audio" ? sequence.audioTracks : sequence.videoTracks;
        if (index < 0 || index >= tracks.numTracks) {
            return null;
        }
        return tracks[index];
    }
"#;

/// Escapes `text` for embedding inside a single- or double-quoted literal.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            _ => out.push(ch),
        }
    }
    out
}

/// `text` as a complete double-quoted literal.
pub fn quote(text: &str) -> String {
    format!("\"{}\"", escape(text))
}

/// Wraps `body` with the preamble inside a self-invoking function whose
/// top-level catch turns any uncaught exception into `__fail`.
///
/// The body must `return __ok(...)` or `return __fail(...)` on every path;
/// nothing here checks that.
pub fn assemble(body: &str) -> String {
    let mut script = String::with_capacity(PREAMBLE.len() + body.len() + 256);
    script.push_str("(function () {\n");
    script.push_str(PREAMBLE);
    script.push_str("    try {\n");
    for line in body.lines() {
        if line.is_empty() {
            script.push('\n');
        } else {
            script.push_str("        ");
            script.push_str(line);
            script.push('\n');
        }
    }
    script.push_str("    } catch (e) {\n");
    script.push_str("        return __fail(e && e.message ? e.message : String(e));\n");
    script.push_str("    }\n");
    script.push_str("})();\n");
    script
}

/// Line-oriented builder for tool bodies.
#[derive(Debug, Default, Clone)]
pub struct ScriptBuilder {
    body: String,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(mut self, line: impl AsRef<str>) -> Self {
        self.body.push_str(line.as_ref());
        self.body.push('\n');
        self
    }

    /// Binds `name` to an escaped string literal.
    pub fn let_string(self, name: &str, value: &str) -> Self {
        let line = format!("var {} = {};", name, quote(value));
        self.line(line)
    }

    pub fn let_number(self, name: &str, value: f64) -> Self {
        let literal = if value.is_finite() { value.to_string() } else { "NaN".to_string() };
        self.line(format!("var {} = {};", name, literal))
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn finish(&self) -> String {
        assemble(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::SecurityPolicy;

    #[test]
    fn test_escape_reconstructs_inside_double_quotes() {
        let samples = [
            "C:\\Users\\editor\\Project \"Final\".prproj",
            "line one\nline two\r\n\ttabbed",
            "plain",
            "",
            "sep\u{2028}arator\u{2029}",
            "trailing backslash \\",
        ];
        for sample in samples {
            let literal = format!("\"{}\"", escape(sample));
            let parsed: String = serde_json::from_str(&literal).unwrap();
            assert_eq!(parsed, sample);
        }
    }

    #[test]
    fn test_escape_handles_single_quotes() {
        assert_eq!(escape("it's"), "it\\'s");
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn test_escaped_output_has_no_raw_line_breaks() {
        let escaped = escape("a\nb\rc\u{2028}d");
        assert!(!escaped.contains('\n'));
        assert!(!escaped.contains('\r'));
        assert!(!escaped.contains('\u{2028}'));
    }

    #[test]
    fn test_assemble_wraps_body_in_guarded_function() {
        let script = assemble("return __ok(1);");

        assert!(script.starts_with("(function () {"));
        assert!(script.trim_end().ends_with("})();"));
        assert!(script.contains("function __ok(data)"));
        assert!(script.contains("function __fail(message)"));
        assert!(script.contains("function __secondsToTicks(seconds)"));
        assert!(script.contains("function __findSequence(name)"));

        let try_at = script.find("try {").unwrap();
        let body_at = script.find("return __ok(1);").unwrap();
        let catch_at = script.find("} catch (e) {").unwrap();
        assert!(try_at < body_at && body_at < catch_at);
    }

    #[test]
    fn test_assembled_preamble_passes_default_policy() {
        let script = assemble("return __ok(null);");
        assert!(SecurityPolicy::default().validate(&script, true).is_ok());
    }

    #[test]
    fn test_json_fallback_escapes_every_control_character() {
        let assembled = assemble("return __ok(1);");
        assert!(assembled.contains("return __jsonString(value);"));
        assert!(assembled.contains("code < 0x20 || code === 0x2028 || code === 0x2029"));
        assert!(assembled.contains(r#"out += "\\u" + "0000".substr(hex.length) + hex;"#));
        assert!(!assembled.contains(".replace(/\\n/g"));
    }

    #[test]
    fn test_builder_binds_escaped_literals() {
        let builder = ScriptBuilder::new()
            .let_string("name", "Seq \"A\"")
            .let_number("start", 1.5)
            .line("return __ok({ name: name, start: start });");

        assert_eq!(
            builder.body(),
            "var name = \"Seq \\\"A\\\"\";\nvar start = 1.5;\nreturn __ok({ name: name, start: start });\n"
        );
        assert!(builder.finish().contains("        var name = \"Seq \\\"A\\\"\";"));
    }
}
