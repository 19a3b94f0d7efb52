//! HS256 signing and verification of session cookies and flow tickets.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use labinv_core::{DomainError, UserId};

use crate::claims::{ResetTicket, SessionClaims, SignupTicket, TokenValidationError, validate_window};

/// Shortest accepted signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;
/// Session lifetime: seven days.
pub const SESSION_TTL_SECS: i64 = 7 * 24 * 60 * 60;
/// Signup/reset ticket lifetime: ten minutes.
pub const TICKET_TTL_SECS: i64 = 600;

/// Verifies a session token and yields its claims.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, TokenValidationError>;
}

/// Symmetric HS256 keys shared by sessions and tickets.
#[derive(Clone)]
pub struct Hs256Jwt {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl core::fmt::Debug for Hs256Jwt {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256Jwt").finish_non_exhaustive()
    }
}

impl Hs256Jwt {
    pub fn new(secret: &str) -> Result<Self, DomainError> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(DomainError::validation(format!(
                "signing secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        })
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, TokenValidationError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|_| TokenValidationError::Malformed)
    }

    /// Signature check only; time windows are checked against the caller's clock.
    fn open<T: DeserializeOwned>(&self, token: &str) -> Result<T, TokenValidationError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        decode::<T>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| TokenValidationError::Malformed)
    }

    pub fn issue_session(
        &self,
        user_id: UserId,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<String, TokenValidationError> {
        let iat = now.timestamp();
        self.sign(&SessionClaims {
            user_id,
            username: username.to_string(),
            iat,
            exp: iat + SESSION_TTL_SECS,
        })
    }

    pub fn issue_signup_ticket(
        &self,
        email: &str,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<String, TokenValidationError> {
        let iat = now.timestamp();
        self.sign(&SignupTicket {
            email: email.to_string(),
            username: username.to_string(),
            iat,
            exp: iat + TICKET_TTL_SECS,
        })
    }

    pub fn verify_signup_ticket(&self, token: &str, now: DateTime<Utc>) -> Result<SignupTicket, TokenValidationError> {
        let ticket: SignupTicket = self.open(token)?;
        validate_window(ticket.iat, ticket.exp, now.timestamp())?;
        Ok(ticket)
    }

    pub fn issue_reset_ticket(
        &self,
        email: &str,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<String, TokenValidationError> {
        let iat = now.timestamp();
        self.sign(&ResetTicket {
            email: email.to_string(),
            user_id,
            purpose: ResetTicket::PURPOSE.to_string(),
            iat,
            exp: iat + TICKET_TTL_SECS,
        })
    }

    pub fn verify_reset_ticket(&self, token: &str, now: DateTime<Utc>) -> Result<ResetTicket, TokenValidationError> {
        let ticket: ResetTicket = self.open(token)?;
        if ticket.purpose != ResetTicket::PURPOSE {
            return Err(TokenValidationError::WrongPurpose);
        }
        validate_window(ticket.iat, ticket.exp, now.timestamp())?;
        Ok(ticket)
    }
}

impl JwtValidator for Hs256Jwt {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, TokenValidationError> {
        let claims: SessionClaims = self.open(token)?;
        validate_window(claims.iat, claims.exp, now.timestamp())?;
        if claims.username.is_empty() {
            return Err(TokenValidationError::Malformed);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn jwt() -> Hs256Jwt {
        Hs256Jwt::new(SECRET).unwrap()
    }

    #[test]
    fn short_secret_is_rejected() {
        assert!(Hs256Jwt::new("too-short").is_err());
    }

    #[test]
    fn session_round_trip_and_expiry() {
        let now = Utc::now();
        let user = UserId::new();
        let token = jwt().issue_session(user, "alice", now).unwrap();

        let claims = jwt().validate(&token, now).unwrap();
        assert_eq!(claims.user_id, user);
        assert_eq!(claims.username, "alice");

        let later = now + Duration::days(8);
        assert_eq!(jwt().validate(&token, later), Err(TokenValidationError::Expired));
    }

    #[test]
    fn token_signed_with_other_key_is_malformed() {
        let other = Hs256Jwt::new("ffffffffffffffffffffffffffffffff").unwrap();
        let token = other.issue_session(UserId::new(), "bob", Utc::now()).unwrap();
        assert_eq!(jwt().validate(&token, Utc::now()), Err(TokenValidationError::Malformed));
    }

    #[test]
    fn signup_ticket_cannot_be_used_for_reset() {
        let now = Utc::now();
        let ticket = jwt().issue_signup_ticket("a@b.io", "alice", now).unwrap();
        assert!(jwt().verify_signup_ticket(&ticket, now).is_ok());
        assert!(jwt().verify_reset_ticket(&ticket, now).is_err());
    }

    #[test]
    fn reset_ticket_expires_after_ten_minutes() {
        let now = Utc::now();
        let ticket = jwt().issue_reset_ticket("a@b.io", UserId::new(), now).unwrap();
        assert!(jwt().verify_reset_ticket(&ticket, now + Duration::seconds(599)).is_ok());
        assert_eq!(
            jwt().verify_reset_ticket(&ticket, now + Duration::seconds(600)),
            Err(TokenValidationError::Expired)
        );
    }
}
