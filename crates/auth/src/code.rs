//! One-time email verification codes for signup and password reset.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use labinv_core::{CodeId, DomainError, UserId};

/// Codes expire sixty seconds after issue.
pub const CODE_TTL_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPurpose {
    Signup,
    Reset,
}

impl VerificationPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::Reset => "reset",
        }
    }
}

impl core::str::FromStr for VerificationPurpose {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signup" => Ok(Self::Signup),
            "reset" => Ok(Self::Reset),
            other => Err(DomainError::validation(format!("unknown code purpose: {other}"))),
        }
    }
}

/// A stored, hashed code. The plain code only ever exists in the email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationCode {
    pub id: CodeId,
    pub email: String,
    pub user_id: Option<UserId>,
    pub purpose: VerificationPurpose,
    pub code_hash: String,
    pub username: Option<String>,
    pub attempts: u32,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl VerificationCode {
    pub fn issue(
        email: &str,
        purpose: VerificationPurpose,
        code_hash: String,
        username: Option<String>,
        user_id: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CodeId::new(),
            email: email.to_string(),
            user_id,
            purpose,
            code_hash,
            username,
            attempts: 0,
            expires_at: now + Duration::seconds(CODE_TTL_SECS),
            consumed_at: None,
            created_at: now,
        }
    }

    /// Unconsumed and not yet expired.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.consumed_at.is_none() && now < self.expires_at
    }
}

/// Six-digit, zero-padded numeric code.
pub fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{n:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn code_expires_after_sixty_seconds() {
        let now = Utc::now();
        let code = VerificationCode::issue("a@b.io", VerificationPurpose::Signup, "h".into(), None, None, now);
        assert!(code.is_live(now + Duration::seconds(59)));
        assert!(!code.is_live(now + Duration::seconds(60)));
    }
}
