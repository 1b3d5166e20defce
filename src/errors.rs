// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error taxonomy for engine operations
//!
//! Validation, authorization, and not-found failures are rejected
//! synchronously with no state mutated. External dependency failures
//! (subscription provider, notification transport) are recovered locally by
//! the components and never surface through this type.

use thiserror::Error;

/// Errors returned by engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad input: invalid type/duration, self-challenge, duplicate pair
    /// challenge, insufficient XP, months out of range
    #[error("validation failed: {0}")]
    Validation(String),

    /// The acting user is not the right party for this operation
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// Referenced challenge/user/badge does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Storage failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        EngineError::Unauthorized(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Result alias used across engine components
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EngineError::validation("duration must be 3, 7 or 14 days");
        assert_eq!(
            err.to_string(),
            "validation failed: duration must be 3, 7 or 14 days"
        );

        let err = EngineError::not_found("challenge", "abc-123");
        assert_eq!(err.to_string(), "challenge not found: abc-123");
    }
}
