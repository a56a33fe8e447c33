//! Common utilities and helper functions

pub mod retry;

/// Node id for a configured endpoint (`zk1:2181` -> `zk1`)
pub fn node_id(endpoint: &str) -> &str {
    let trimmed = endpoint.trim();
    trimmed.split(':').next().unwrap_or(trimmed).trim()
}

/// Replace path separators and other unsafe characters in a filename
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        String::from("uploaded.bin")
    } else {
        cleaned
    }
}
