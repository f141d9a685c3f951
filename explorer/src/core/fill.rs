//! Plausible input values for text fields, derived from the field's name.

/// Synthesize text to type into a field identified by `target`.
///
/// Field names are matched case-insensitively; unknown names get a generic value.
pub fn synthesize_text(target: Option<&str>) -> String {
    let name = target.unwrap_or_default().to_ascii_lowercase();
    let has = |needle: &str| name.contains(needle);

    if has("email") || has("e-mail") {
        "explorer.test@example.com".to_string()
    } else if has("password") || has("passcode") {
        "Test1234!".to_string()
    } else if has("phone") || has("mobile") {
        "5551234567".to_string()
    } else if has("zip") || has("postal") {
        "94103".to_string()
    } else if has("search") || has("query") {
        "test".to_string()
    } else if has("url") || has("website") {
        "https://example.com".to_string()
    } else if has("name") || has("user") {
        "Test User".to_string()
    } else if has("amount") || has("quantity") || has("number") {
        "42".to_string()
    } else {
        "test input".to_string()
    }
}
