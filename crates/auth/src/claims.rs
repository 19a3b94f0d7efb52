use serde::{Deserialize, Serialize};
use thiserror::Error;

use labinv_core::UserId;

/// Session cookie payload.
///
/// Timestamps are JWT `iat`/`exp` seconds since the epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

/// Proof that an email address passed signup code verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupTicket {
    pub email: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

/// Proof that the owner of `user_id` passed reset code verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetTicket {
    pub email: String,
    #[serde(rename = "userId")]
    pub user_id: UserId,
    pub purpose: String,
    pub iat: i64,
    pub exp: i64,
}

impl ResetTicket {
    pub const PURPOSE: &'static str = "reset";
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("token signature or encoding is invalid")]
    Malformed,

    #[error("token was issued for another purpose")]
    WrongPurpose,
}

/// Deterministically validate a token's time window against `now` (seconds).
pub fn validate_window(iat: i64, exp: i64, now: i64) -> Result<(), TokenValidationError> {
    if exp <= iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < iat {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_checks() {
        assert_eq!(validate_window(10, 20, 15), Ok(()));
        assert_eq!(validate_window(10, 20, 20), Err(TokenValidationError::Expired));
        assert_eq!(validate_window(10, 20, 5), Err(TokenValidationError::NotYetValid));
        assert_eq!(validate_window(20, 20, 20), Err(TokenValidationError::InvalidTimeWindow));
    }
}
