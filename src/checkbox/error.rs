use thiserror::Error;

/// Errors surfaced by the fiscal API layer.
///
/// Messages are shown to operators as-is, so backend-derived variants carry
/// the text the backend returned (or a fixed Ukrainian message).
#[derive(Error, Debug)]
pub enum CheckboxError {
    /// Generic backend error
    #[error("{0}")]
    Api(String),

    /// Signature service unavailable or failed
    #[error("{0}")]
    Sign(String),

    /// Receipt creation or signing failed
    #[error("{0}")]
    Receipt(String),

    /// Shift open/close failed
    #[error("{0}")]
    Shift(String),

    /// Rejected locally before any request was made
    #[error("{0}")]
    Validation(String),

    /// Network-level failure
    #[error("Помилка мережі: {0}")]
    Transport(#[from] reqwest::Error),

    /// Read retries exhausted on timeouts
    #[error("Час очікування вичерпано: {0}")]
    Timeout(String),

    /// Response body was not what the endpoint promises
    #[error("Невірна відповідь сервера: {0}")]
    Decode(String),

    /// Client is missing required settings
    #[error("{0}")]
    Config(String),
}

/// Which error variant a failed call maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Api,
    Sign,
    Receipt,
    Shift,
}

impl ErrorKind {
    pub fn error(self, message: impl Into<String>) -> CheckboxError {
        let message = message.into();
        match self {
            ErrorKind::Api => CheckboxError::Api(message),
            ErrorKind::Sign => CheckboxError::Sign(message),
            ErrorKind::Receipt => CheckboxError::Receipt(message),
            ErrorKind::Shift => CheckboxError::Shift(message),
        }
    }
}

pub type CheckboxResult<T> = Result<T, CheckboxError>;

/// Builds an error from a non-2xx response body.
///
/// Uses `message` and `detail` from a JSON body; falls back to the HTTP reason phrase.
pub fn error_from_body(status: reqwest::StatusCode, body: &[u8], kind: ErrorKind) -> CheckboxError {
    let reason = || status.canonical_reason().unwrap_or("Невідома помилка").to_string();

    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return kind.error(reason());
    };

    let Some(message) = value.get("message").and_then(|m| m.as_str()) else {
        return kind.error(reason());
    };

    let detail = match value.get("detail") {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(serde_json::Value::Null) | None => None,
        Some(serde_json::Value::String(_)) => None,
        Some(other) => Some(other.to_string()),
    };

    match detail {
        Some(detail) => kind.error(format!("{}: {}", message, detail)),
        None => kind.error(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_message_and_detail() {
        let body = br#"{"message": "Validation error", "detail": "price must be positive"}"#;
        let err = error_from_body(StatusCode::UNPROCESSABLE_ENTITY, body, ErrorKind::Receipt);

        assert!(matches!(err, CheckboxError::Receipt(_)));
        assert_eq!(err.to_string(), "Validation error: price must be positive");
    }

    #[test]
    fn test_message_without_detail() {
        let body = r#"{"message": "Зміну не відкрито"}"#.as_bytes();
        let err = error_from_body(StatusCode::BAD_REQUEST, body, ErrorKind::Shift);

        assert_eq!(err.to_string(), "Зміну не відкрито");
    }

    #[test]
    fn test_non_json_body_uses_reason() {
        let err = error_from_body(StatusCode::FORBIDDEN, b"<html>nope</html>", ErrorKind::Api);
        assert_eq!(err.to_string(), "Forbidden");
    }
}
