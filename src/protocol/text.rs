//! Delimiter-separated text payloads.
//!
//! Sensor nodes commonly ship readings as `"21.5;48;OK;"`. [`TextPayload`]
//! builds such a string field by field and [`field`] / [`field_f32`] pick
//! fields back out on the receiving side.

use std::fmt::{Display, Write};

/// Default field separator.
pub const DEFAULT_SEPARATOR: &str = ";";

/// Staged outgoing text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextPayload {
    data: String,
}

impl TextPayload {
    /// Create an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` followed by `separator`.
    pub fn push<T: Display>(&mut self, value: T, separator: &str) {
        // Writing into a String cannot fail.
        let _ = write!(self.data, "{}", value);
        self.data.push_str(separator);
    }

    /// Discard all staged fields.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.data
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}

/// Field `index` of `data`, or `""` when there is no such field.
pub fn field<'a>(data: &'a str, index: usize, separator: &str) -> &'a str {
    if separator.is_empty() {
        return if index == 0 { data } else { "" };
    }
    data.split(separator).nth(index).unwrap_or("")
}

/// Field `index` parsed as a float; `0.0` when missing or not numeric.
pub fn field_f32(data: &str, index: usize, separator: &str) -> f32 {
    field(data, index, separator).trim().parse().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_appends_separator() {
        let mut payload = TextPayload::new();
        payload.push(21.5, DEFAULT_SEPARATOR);
        payload.push(48, DEFAULT_SEPARATOR);
        payload.push("OK", ",");
        assert_eq!(payload.as_str(), "21.5;48;OK,");
        assert_eq!(payload.len(), 11);

        payload.clear();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_field_lookup() {
        let data = "21.5;48;OK;";
        assert_eq!(field(data, 0, ";"), "21.5");
        assert_eq!(field(data, 2, ";"), "OK");
        assert_eq!(field(data, 3, ";"), "");
        assert_eq!(field(data, 9, ";"), "");
    }

    #[test]
    fn test_field_without_trailing_separator() {
        assert_eq!(field("a,b,c", 2, ","), "c");
        assert_eq!(field("single", 0, ";"), "single");
    }

    #[test]
    fn test_field_f32() {
        let data = "21.5; 48 ;OK";
        assert_eq!(field_f32(data, 0, ";"), 21.5);
        assert_eq!(field_f32(data, 1, ";"), 48.0);
        assert_eq!(field_f32(data, 2, ";"), 0.0);
        assert_eq!(field_f32(data, 5, ";"), 0.0);
    }

    #[test]
    fn test_empty_separator_returns_whole_string() {
        assert_eq!(field("abc", 0, ""), "abc");
        assert_eq!(field("abc", 1, ""), "");
    }
}
