//! User accounts and the field rules of the signup/reset forms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use labinv_core::{DomainError, DomainResult, Entity, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// 3 to 50 characters after trimming.
pub fn validate_username(raw: &str) -> DomainResult<String> {
    let name = raw.trim();
    let len = name.chars().count();
    if !(3..=50).contains(&len) {
        return Err(DomainError::validation("username must be 3-50 characters"));
    }
    Ok(name.to_string())
}

/// Trimmed, lower-cased, shaped like `local@domain.tld`.
pub fn validate_email(raw: &str) -> DomainResult<String> {
    let email = raw.trim().to_lowercase();
    let valid = email.len() <= 254
        && !email.chars().any(char::is_whitespace)
        && match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.split('.').count() >= 2
                    && domain.split('.').all(|part| !part.is_empty())
            }
            None => false,
        };
    if !valid {
        return Err(DomainError::validation("invalid email address"));
    }
    Ok(email)
}

/// 8 to 200 characters, and the confirmation must match.
pub fn validate_password_pair(password: &str, confirm: &str) -> DomainResult<()> {
    let len = password.chars().count();
    if !(8..=200).contains(&len) {
        return Err(DomainError::validation("password must be 8-200 characters"));
    }
    if password != confirm {
        return Err(DomainError::validation("Passwords do not match"));
    }
    Ok(())
}

/// Exactly six characters.
pub fn validate_code_format(raw: &str) -> DomainResult<String> {
    let code = raw.trim();
    if code.chars().count() != 6 {
        return Err(DomainError::validation("code must be 6 characters"));
    }
    Ok(code.to_string())
}
