//! Input normalizers applied by `handle_change` before a value is stored.
//!
//! Only text values are rewritten; other kinds pass through untouched.

use super::value::Value;

pub fn trim() -> impl Fn(Value) -> Value + Send + Sync + 'static {
    |value| map_text(value, |text| text.trim().to_string())
}

pub fn lowercase() -> impl Fn(Value) -> Value + Send + Sync + 'static {
    |value| map_text(value, |text| text.to_lowercase())
}

/// Keeps ASCII digits only, e.g. `"(555) 010-2030"` becomes `"5550102030"`.
pub fn digits_only() -> impl Fn(Value) -> Value + Send + Sync + 'static {
    |value| map_text(value, |text| text.chars().filter(char::is_ascii_digit).collect())
}

pub fn max_chars(limit: usize) -> impl Fn(Value) -> Value + Send + Sync + 'static {
    move |value| map_text(value, |text| text.chars().take(limit).collect())
}

fn map_text(value: Value, f: impl FnOnce(&str) -> String) -> Value {
    match value {
        Value::Text(text) => Value::Text(f(&text)),
        other => other,
    }
}
