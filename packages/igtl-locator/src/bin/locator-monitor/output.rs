use std::io::Write;

/// Serialize a value to JSON (pretty or compact).
pub fn to_json<T: serde::Serialize>(value: &T, compact: bool) -> Result<String, String> {
    let json = if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    };
    json.map_err(|e| format!("JSON serialization failed: {}", e))
}

/// Write a line to stdout.
pub fn write_line(line: &str) -> Result<(), String> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(line.as_bytes())
        .and_then(|_| handle.write_all(b"\n"))
        .map_err(|e| format!("Failed to write to stdout: {}", e))
}
