//! Flat error taxonomy shared by all simulation crates.

use thiserror::Error;

/// Errors surfaced by core operations. The taxonomy is deliberately flat:
/// callers match on the kind, messages identify the violated contract.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Contract violation on a value: negative threshold, over-extraction,
    /// over-capacity push, duplicate push.
    #[error("value error: {0}")]
    Value(String),
    /// Missing name in a registry, or a duplicate registration.
    #[error("key error: {0}")]
    Key(String),
    /// Operation requires a group/parent that is unset.
    #[error("state error: {0}")]
    State(String),
    /// Input document cannot be located, parsed, or validated.
    #[error("io error: {0}")]
    Io(String),
    /// Registry lookup returned an agent of the wrong subtype.
    #[error("cast error: {0}")]
    Cast(String),
}

impl CoreError {
    pub fn value(msg: impl Into<String>) -> Self {
        CoreError::Value(msg.into())
    }

    pub fn key(msg: impl Into<String>) -> Self {
        CoreError::Key(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        CoreError::State(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        CoreError::Io(msg.into())
    }

    pub fn cast(msg: impl Into<String>) -> Self {
        CoreError::Cast(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_kind() {
        assert!(CoreError::value("x").to_string().starts_with("value error"));
        assert!(CoreError::key("x").to_string().starts_with("key error"));
        assert!(CoreError::cast("x").to_string().starts_with("cast error"));
    }
}
