/// Room codes and join-code validation
use crate::error::ValidationError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Number of characters in a room code
pub const ROOM_CODE_LEN: usize = 5;

/// A room code, e.g. "QX7K2"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Wrap a code issued by the background process. These are opaque and
    /// are not re-validated.
    pub fn from_server(code: impl Into<String>) -> RoomCode {
        RoomCode(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9]*$").expect("static pattern"))
}

/// Validate a code typed into the join form and normalize it to uppercase.
///
/// Checks run in order and the first failure wins:
/// 1. empty
/// 2. too long
/// 3. too short
/// 4. characters outside `[a-zA-Z0-9]`
pub fn validate_room_code(input: &str) -> Result<RoomCode, ValidationError> {
    let len = input.chars().count();

    if len == 0 {
        return Err(ValidationError::Required);
    }
    if len > ROOM_CODE_LEN {
        return Err(ValidationError::TooLong);
    }
    if len < ROOM_CODE_LEN {
        return Err(ValidationError::TooShort);
    }
    if !code_pattern().is_match(input) {
        return Err(ValidationError::Format);
    }

    Ok(RoomCode(input.to_uppercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_code() {
        assert_eq!(validate_room_code("ABCDE"), Ok(RoomCode::from_server("ABCDE")));
        assert_eq!(validate_room_code("QX7K2").unwrap().as_str(), "QX7K2");
    }

    #[test]
    fn test_lowercase_is_normalized() {
        assert_eq!(validate_room_code("abcde").unwrap().as_str(), "ABCDE");
        assert_eq!(validate_room_code("qx7k2").unwrap().as_str(), "QX7K2");
    }

    #[test]
    fn test_length_errors() {
        assert_eq!(validate_room_code(""), Err(ValidationError::Required));
        assert_eq!(validate_room_code("AB12"), Err(ValidationError::TooShort));
        assert_eq!(validate_room_code("ABCDEF"), Err(ValidationError::TooLong));
    }

    #[test]
    fn test_format_errors() {
        assert_eq!(validate_room_code("AB#DE"), Err(ValidationError::Format));
        assert_eq!(validate_room_code("AB DE"), Err(ValidationError::Format));
        // Length is checked before format
        assert_eq!(validate_room_code("A#"), Err(ValidationError::TooShort));
    }

    #[test]
    fn test_length_counts_chars() {
        // Five characters, more than five bytes
        assert_eq!(validate_room_code("ÄBCDE"), Err(ValidationError::Format));
        assert_eq!(validate_room_code("ÄÄÄÄ"), Err(ValidationError::TooShort));
    }

    #[test]
    fn test_serializes_as_bare_string() {
        let code = RoomCode::from_server("QX7K2");
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"QX7K2\"");
        assert_eq!(code.to_string(), "QX7K2");
    }
}
