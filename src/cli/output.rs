use console::style;
use serde::Serialize;

use crate::error::{Result, ShelfError, StructuredError};

/// Uniform machine-readable result: `{success, data}` or `{success, error}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StructuredError>,
}

impl<T: Serialize> Envelope<T> {
    pub const fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl Envelope<serde_json::Value> {
    pub fn failure(err: &ShelfError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_structured()),
        }
    }
}

pub fn emit_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value)?;
    println!("{payload}");
    Ok(())
}

pub fn emit_ok<T: Serialize>(data: T) -> Result<()> {
    emit_json(&Envelope::ok(data))
}

/// Print a failure the way the active mode expects: the JSON envelope on
/// stdout, or a styled message with the suggestion on stderr.
pub fn emit_error(err: &ShelfError, json: bool) {
    if json {
        let payload = serde_json::to_string_pretty(&Envelope::failure(err)).unwrap_or_else(|_| {
            r#"{"success": false, "error": {"message": "failed to serialize error"}}"#.to_string()
        });
        println!("{payload}");
        return;
    }

    let structured = err.to_structured();
    eprintln!("{} {structured}", style("error:").red().bold());
    eprintln!("{} {}", style("hint:").dim(), structured.suggestion);
    if structured.retryable {
        eprintln!("{}", style("This error is transient; retrying may succeed.").dim());
    }
}

pub struct HumanLayout {
    lines: Vec<String>,
    key_width: usize,
}

impl Default for HumanLayout {
    fn default() -> Self {
        Self::new()
    }
}

impl HumanLayout {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lines: Vec::new(),
            key_width: 16,
        }
    }

    pub fn title(&mut self, text: &str) -> &mut Self {
        self.lines.push(style(text).bold().to_string());
        self
    }

    pub fn kv(&mut self, key: &str, value: &str) -> &mut Self {
        self.lines.push(format!(
            "  {:width$} {value}",
            style(key).dim(),
            width = self.key_width
        ));
        self
    }

    pub fn bullet(&mut self, text: &str) -> &mut Self {
        self.lines.push(format!("  - {text}"));
        self
    }

    pub fn push_line(&mut self, line: impl Into<String>) -> &mut Self {
        self.lines.push(line.into());
        self
    }

    #[must_use]
    pub fn build(self) -> String {
        self.lines.join("\n")
    }
}

pub fn emit_human(layout: HumanLayout) {
    println!("{}", layout.build());
}

/// Byte count as a short human string.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
