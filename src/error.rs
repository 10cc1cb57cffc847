use crate::store::StoreError;

pub type ChatResult<T> = Result<T, ChatError>;

/// Failures of a single connection's request.
///
/// None of these end the connection: the transport reports them back to the
/// offending client as an `error` event and keeps reading.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Persistence(#[from] StoreError),
}

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Text sent to the client. Storage details stay in the server log.
    pub fn reason(&self) -> String {
        match self {
            Self::Persistence(_) => "internal storage error".to_owned(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_reason_hides_details() {
        let err = ChatError::from(StoreError::Corrupt("bad uuid in rooms.id".to_owned()));
        assert_eq!(err.reason(), "internal storage error");
        assert!(err.to_string().contains("bad uuid"));
    }

    #[test]
    fn validation_reason_is_message() {
        let err = ChatError::validation("bind an identity first");
        assert_eq!(err.reason(), "bind an identity first");
        let err = ChatError::not_found("room 42 does not exist");
        assert_eq!(err.reason(), "room 42 does not exist");
    }
}
