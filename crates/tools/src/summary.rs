//! Summary-template rendering.
//!
//! Templates use `{{.field}}` placeholders referring to top-level keys of
//! the parameter JSON. Keys present in the input are substituted; missing
//! keys render as the literal `<no value>`; when the input is not a JSON
//! object the template is returned unchanged.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

const MISSING: &str = "<no value>";

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*\.([A-Za-z0-9_]+)\s*\}\}").expect("static regex"))
}

/// Render `template` against the top-level keys of `input`.
pub fn render(template: &str, input: &Value) -> String {
    let Some(fields) = input.as_object() else {
        // Invalid or non-object input: emit the template unchanged.
        return template.to_string();
    };

    placeholder_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match fields.get(&caps[1]) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => MISSING.to_string(),
            }
        })
        .into_owned()
}
