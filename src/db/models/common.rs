//! Common types and utilities shared across models.

/// Helper to parse a JSON string list column (images, features)
pub fn parse_string_list(json: Option<&str>) -> Vec<String> {
    json.and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}

/// Helper to serialize a string list to JSON for the database
pub fn serialize_string_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Current time in the RFC 3339 form every timestamp column uses
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
