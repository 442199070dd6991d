//! Block output side-channel.
//!
//! A block publishes outputs by appending `name=value` lines to the file named
//! by `$RUNBOOK_OUTPUT`. Later lines win; malformed lines are skipped.

use std::collections::HashMap;
use std::path::Path;

/// Environment variable carrying the output file path.
pub const OUTPUT_ENV_VAR: &str = "RUNBOOK_OUTPUT";

/// Read and parse an output file.
///
/// A missing file means the block wrote no outputs.
pub fn read_outputs(path: &Path) -> std::io::Result<HashMap<String, String>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(parse_outputs(&String::from_utf8_lossy(&bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e),
    }
}

/// Parse `name=value` lines.
///
/// The key is trimmed and must be a valid identifier. The value is kept
/// verbatim apart from a trailing carriage return, and may be empty.
pub fn parse_outputs(content: &str) -> HashMap<String, String> {
    let mut outputs = HashMap::new();

    for (index, raw) in content.lines().enumerate() {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line.trim().is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            tracing::warn!(line = index + 1, content = line, "Invalid output line (no = sign)");
            continue;
        };

        let key = key.trim();
        if !is_valid_output_key(key) {
            tracing::warn!(line = index + 1, key, "Invalid output key");
            continue;
        }

        outputs.insert(key.to_string(), value.to_string());
    }

    outputs
}

/// Check if a key matches `^[A-Za-z_][A-Za-z0-9_]*$`.
pub fn is_valid_output_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
