//! Model-list filtering
//!
//! When restricted models are disabled, listing responses drop every model
//! whose id starts with a restricted prefix. `gpt-4o-mini` is always kept.

use serde_json::Value;

/// Prefixes denoting the restricted model family
pub const RESTRICTED_MODEL_PREFIXES: &[&str] = &["gpt-4", "chatgpt-4o"];

/// Model that stays available even though it matches a restricted prefix
pub const ALWAYS_ALLOWED_MODEL: &str = "gpt-4o-mini";

/// Whether a model id belongs to the restricted family
pub fn is_restricted(id: &str) -> bool {
    let id = id.strip_prefix("models/").unwrap_or(id);
    !id.starts_with(ALWAYS_ALLOWED_MODEL)
        && RESTRICTED_MODEL_PREFIXES
            .iter()
            .any(|prefix| id.starts_with(prefix))
}

/// Remove restricted entries from a model listing in place
///
/// Understands OpenAI (`data[].id`) and Gemini (`models[].name`) listings.
/// Returns the number of removed entries.
pub fn filter_model_list(body: &mut Value) -> usize {
    let mut removed = 0;

    for (list_key, id_key) in [("data", "id"), ("models", "name")] {
        if let Some(entries) = body.get_mut(list_key).and_then(Value::as_array_mut) {
            let before = entries.len();
            entries.retain(|entry| {
                entry
                    .get(id_key)
                    .and_then(Value::as_str)
                    .map(|id| !is_restricted(id))
                    .unwrap_or(true)
            });
            removed += before - entries.len();
        }
    }

    removed
}
