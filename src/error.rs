/// Error types for the room popup
use thiserror::Error;

/// Join-code validation failures. `Display` is the message shown under the form field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Room code can't be empty.")]
    Required,
    #[error("Room code too long.")]
    TooLong,
    #[error("Room code too short")]
    TooShort,
    #[error("Room code format incorrect")]
    Format,
}

/// Failures talking to the background process or the page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("background port disconnected")]
    Disconnected,
    #[error("background error: {message}")]
    Rpc { message: String },
    #[error("failed to decode reply: {0}")]
    Decode(String),
    #[error("browser call failed: {0}")]
    Bridge(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("storage call failed: {0}")]
    Bridge(String),
}

/// Everything a popup action can fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("action not allowed: {0}")]
    InvalidState(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_messages() {
        assert_eq!(ValidationError::Required.to_string(), "Room code can't be empty.");
        assert_eq!(ValidationError::TooLong.to_string(), "Room code too long.");
        assert_eq!(ValidationError::TooShort.to_string(), "Room code too short");
        assert_eq!(ValidationError::Format.to_string(), "Room code format incorrect");
    }

    #[test]
    fn test_session_error_is_transparent() {
        let err: SessionError = ValidationError::TooShort.into();
        assert_eq!(err.to_string(), "Room code too short");

        let err: SessionError = TransportError::Rpc { message: "boom".to_string() }.into();
        assert_eq!(err.to_string(), "background error: boom");
    }
}
