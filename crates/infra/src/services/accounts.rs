//! Login, signup and password reset.
//!
//! Signup and reset are three steps each: `init` mails a one-time code,
//! `verify` trades the code for a short-lived ticket, `complete` trades the
//! ticket for the account change. bcrypt work runs on the blocking pool.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use labinv_auth::{
    CODE_TTL_SECS, Hs256Jwt, JwtValidator, TICKET_TTL_SECS, PasswordHasher, SessionClaims, TokenValidationError, User,
    VerificationCode, VerificationPurpose, generate_code, validate_code_format, validate_email,
    validate_password_pair, validate_username,
};
use labinv_core::{DomainError, UserId};

use crate::mailer::{MailMessage, Mailer};
use crate::store::{LabStore, StoreError};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid credentials.")]
    InvalidCredentials,

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Username already exists")]
    UsernameTaken,

    #[error("Email already in use")]
    EmailTaken,

    #[error("Code expired. Please resend.")]
    CodeExpired,

    #[error("Invalid code. Please request a new one.")]
    CodeMismatch,

    #[error("Invalid ticket")]
    InvalidTicket(#[source] TokenValidationError),

    #[error("Account not found")]
    AccountMissing,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::UsernameTaken => "USERNAME_TAKEN",
            Self::EmailTaken => "EMAIL_TAKEN",
            Self::CodeExpired => "CODE_EXPIRED",
            Self::CodeMismatch => "CODE_MISMATCH",
            Self::InvalidTicket(_) => "INVALID_TICKET",
            Self::AccountMissing => "ACCOUNT_NOT_FOUND",
            Self::Store(StoreError::Conflict(_)) => "CONFLICT",
            Self::Store(_) | Self::Internal(_) => "INTERNAL",
        }
    }
}

impl From<DomainError> for AuthError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            other => Self::Internal(anyhow::anyhow!(other)),
        }
    }
}

/// The signed-in user as exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionUser {
    pub id: UserId,
    pub username: String,
}

/// Proof of a verified code, valid for [`TICKET_TTL_SECS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub ticket: String,
    pub ticket_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user: SessionUser,
}

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn LabStore>,
    jwt: Hs256Jwt,
    hasher: PasswordHasher,
    mailer: Arc<dyn Mailer>,
    app_name: String,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn LabStore>,
        jwt: Hs256Jwt,
        hasher: PasswordHasher,
        mailer: Arc<dyn Mailer>,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            jwt,
            hasher,
            mailer,
            app_name: app_name.into(),
        }
    }

    pub fn jwt(&self) -> &Hs256Jwt {
        &self.jwt
    }

    /// Resolve a session token.
    pub fn session(&self, token: &str) -> Result<SessionClaims, AuthError> {
        self.jwt
            .validate(token, Utc::now())
            .map_err(|_| AuthError::Unauthenticated)
    }

    /// `login` is a username or an email address.
    #[instrument(skip(self, password), err)]
    pub async fn login(&self, login: &str, password: &str) -> Result<Session, AuthError> {
        let login = login.trim();
        if login.is_empty() || password.is_empty() {
            return Err(AuthError::Validation("Missing username or password".into()));
        }
        let Some(user) = self.store.find_user(login).await? else {
            return Err(AuthError::InvalidCredentials);
        };
        if !self.verify(password, &user.password_hash).await? {
            warn!(user = %user.id, "login rejected");
            return Err(AuthError::InvalidCredentials);
        }
        let token = self
            .jwt
            .issue_session(user.id, &user.username, Utc::now())
            .map_err(|e| anyhow::anyhow!("session signing failed: {e}"))?;
        info!(user = %user.id, "login");
        Ok(Session {
            token,
            user: SessionUser {
                id: user.id,
                username: user.username,
            },
        })
    }

    /// Returns when the mailed code expires.
    #[instrument(skip(self), err)]
    pub async fn signup_init(&self, username: &str, email: &str) -> Result<DateTime<Utc>, AuthError> {
        let username = validate_username(username)?;
        let email = validate_email(email)?;
        let taken = self.store.identity_taken(&username, &email).await?;
        if taken.username {
            return Err(AuthError::UsernameTaken);
        }
        if taken.email {
            return Err(AuthError::EmailTaken);
        }
        self.send_code(&email, VerificationPurpose::Signup, Some(username), None)
            .await
    }

    #[instrument(skip(self, code), err)]
    pub async fn signup_verify(&self, email: &str, code: &str) -> Result<Ticket, AuthError> {
        let email = validate_email(email)?;
        let stored = self.check_code(&email, code, VerificationPurpose::Signup).await?;
        let username = stored
            .username
            .ok_or_else(|| anyhow::anyhow!("signup code {} carries no username", stored.id))?;
        let now = Utc::now();
        let ticket = self
            .jwt
            .issue_signup_ticket(&email, &username, now)
            .map_err(|e| anyhow::anyhow!("ticket signing failed: {e}"))?;
        Ok(Ticket {
            ticket,
            ticket_expires_at: now + Duration::seconds(TICKET_TTL_SECS),
        })
    }

    #[instrument(skip_all, err)]
    pub async fn signup_complete(
        &self,
        ticket: &str,
        password: &str,
        confirm: &str,
    ) -> Result<SessionUser, AuthError> {
        let ticket = self
            .jwt
            .verify_signup_ticket(ticket, Utc::now())
            .map_err(AuthError::InvalidTicket)?;
        validate_password_pair(password, confirm)?;
        let taken = self.store.identity_taken(&ticket.username, &ticket.email).await?;
        if taken.username {
            return Err(AuthError::UsernameTaken);
        }
        if taken.email {
            return Err(AuthError::EmailTaken);
        }
        let password_hash = self.hash(password).await?;
        let user = self
            .store
            .insert_user(User {
                id: UserId::new(),
                username: ticket.username,
                email: ticket.email,
                password_hash,
                created_at: Utc::now(),
            })
            .await?;
        info!(user = %user.id, "account created");
        Ok(SessionUser {
            id: user.id,
            username: user.username,
        })
    }

    /// Unknown addresses get the same answer, and no mail.
    #[instrument(skip(self), err)]
    pub async fn reset_init(&self, email: &str) -> Result<DateTime<Utc>, AuthError> {
        let email = validate_email(email)?;
        let Some(user) = self.store.find_user_by_email(&email).await? else {
            info!("reset requested for unknown email");
            return Ok(Utc::now() + Duration::seconds(CODE_TTL_SECS));
        };
        self.send_code(&email, VerificationPurpose::Reset, None, Some(user.id))
            .await
    }

    #[instrument(skip(self, code), err)]
    pub async fn reset_verify(&self, email: &str, code: &str) -> Result<Ticket, AuthError> {
        let email = validate_email(email)?;
        let stored = self.check_code(&email, code, VerificationPurpose::Reset).await?;
        let user_id = match stored.user_id {
            Some(id) => id,
            None => {
                self.store
                    .find_user_by_email(&email)
                    .await?
                    .ok_or(AuthError::AccountMissing)?
                    .id
            }
        };
        let now = Utc::now();
        let ticket = self
            .jwt
            .issue_reset_ticket(&email, user_id, now)
            .map_err(|e| anyhow::anyhow!("ticket signing failed: {e}"))?;
        Ok(Ticket {
            ticket,
            ticket_expires_at: now + Duration::seconds(TICKET_TTL_SECS),
        })
    }

    #[instrument(skip_all, err)]
    pub async fn reset_complete(&self, ticket: &str, password: &str, confirm: &str) -> Result<(), AuthError> {
        let ticket = self
            .jwt
            .verify_reset_ticket(ticket, Utc::now())
            .map_err(AuthError::InvalidTicket)?;
        validate_password_pair(password, confirm)?;
        let password_hash = self.hash(password).await?;
        match self.store.set_password_hash(ticket.user_id, &password_hash).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => return Err(AuthError::AccountMissing),
            Err(e) => return Err(e.into()),
        }
        info!(user = %ticket.user_id, "password reset");
        Ok(())
    }

    async fn send_code(
        &self,
        email: &str,
        purpose: VerificationPurpose,
        username: Option<String>,
        user_id: Option<UserId>,
    ) -> Result<DateTime<Utc>, AuthError> {
        let code = generate_code();
        let code_hash = self.hash(&code).await?;
        let stored = VerificationCode::issue(email, purpose, code_hash, username, user_id, Utc::now());
        let expires_at = stored.expires_at;
        self.store.replace_code(stored).await?;
        self.mailer.send(self.code_mail(email, purpose, &code)).await?;
        info!(purpose = purpose.as_str(), "verification code sent");
        Ok(expires_at)
    }

    /// Any check, right or wrong, consumes the code.
    async fn check_code(
        &self,
        email: &str,
        code: &str,
        purpose: VerificationPurpose,
    ) -> Result<VerificationCode, AuthError> {
        let code = validate_code_format(code)?;
        let now: DateTime<Utc> = Utc::now();
        let Some(stored) = self.store.latest_live_code(email, purpose, now).await? else {
            return Err(AuthError::CodeExpired);
        };
        let matches = self.verify(&code, &stored.code_hash).await?;
        self.store.consume_code(stored.id, now, !matches).await?;
        if !matches {
            return Err(AuthError::CodeMismatch);
        }
        Ok(stored)
    }

    fn code_mail(&self, to: &str, purpose: VerificationPurpose, code: &str) -> MailMessage {
        let action = match purpose {
            VerificationPurpose::Signup => "sign-up",
            VerificationPurpose::Reset => "password reset",
        };
        MailMessage {
            to: to.to_string(),
            subject: format!("[{}] Your {action} code", self.app_name),
            body: format!("Your {action} code is {code}. It expires in {CODE_TTL_SECS} seconds."),
        }
    }

    async fn hash(&self, secret: &str) -> Result<String, AuthError> {
        let hasher = self.hasher;
        let secret = secret.to_string();
        let hashed = tokio::task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .map_err(|e| anyhow::anyhow!("hashing task failed: {e}"))?;
        Ok(hashed.map_err(anyhow::Error::from)?)
    }

    async fn verify(&self, secret: &str, hash: &str) -> Result<bool, AuthError> {
        let hasher = self.hasher;
        let (secret, hash) = (secret.to_string(), hash.to_string());
        Ok(tokio::task::spawn_blocking(move || hasher.verify(&secret, &hash))
            .await
            .map_err(|e| anyhow::anyhow!("hashing task failed: {e}"))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::{MemoryMailer, extract_code};
    use crate::store::InMemoryStore;

    const SECRET: &str = "test-secret-test-secret-test-secret!";

    fn service() -> (AccountService, Arc<MemoryMailer>) {
        let mailer = Arc::new(MemoryMailer::new());
        let svc = AccountService::new(
            Arc::new(InMemoryStore::new()),
            Hs256Jwt::new(SECRET).unwrap(),
            PasswordHasher::fast(),
            mailer.clone(),
            "LabInv",
        );
        (svc, mailer)
    }

    fn mailed_code(mailer: &MemoryMailer, to: &str) -> String {
        extract_code(&mailer.last_to(to).unwrap().body).unwrap()
    }

    async fn sign_up(svc: &AccountService, mailer: &MemoryMailer, username: &str, email: &str) {
        svc.signup_init(username, email).await.unwrap();
        let ticket = svc.signup_verify(email, &mailed_code(mailer, email)).await.unwrap();
        svc.signup_complete(&ticket.ticket, "hunter2hunter2", "hunter2hunter2").await.unwrap();
    }

    #[tokio::test]
    async fn signup_then_login_by_name_or_email() {
        let (svc, mailer) = service();
        sign_up(&svc, &mailer, "alice", "alice@lab.io").await;

        let session = svc.login("alice", "hunter2hunter2").await.unwrap();
        assert_eq!(session.user.username, "alice");
        assert_eq!(svc.session(&session.token).unwrap().username, "alice");

        assert!(svc.login("ALICE@lab.io", "hunter2hunter2").await.is_ok());
        assert!(matches!(
            svc.login("alice", "wrong-password").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn duplicate_identity_is_refused_at_init() {
        let (svc, mailer) = service();
        sign_up(&svc, &mailer, "alice", "alice@lab.io").await;
        assert!(matches!(
            svc.signup_init("alice", "other@lab.io").await,
            Err(AuthError::UsernameTaken)
        ));
        assert!(matches!(
            svc.signup_init("bob", "Alice@Lab.io").await,
            Err(AuthError::EmailTaken)
        ));
    }

    #[tokio::test]
    async fn wrong_code_burns_it() {
        let (svc, mailer) = service();
        svc.signup_init("carol", "carol@lab.io").await.unwrap();
        let code = mailed_code(&mailer, "carol@lab.io");
        let wrong = if code == "000000" { "111111" } else { "000000" };
        assert!(matches!(
            svc.signup_verify("carol@lab.io", wrong).await,
            Err(AuthError::CodeMismatch)
        ));
        assert!(matches!(
            svc.signup_verify("carol@lab.io", &code).await,
            Err(AuthError::CodeExpired)
        ));
    }

    #[tokio::test]
    async fn reset_flow_changes_the_password() {
        let (svc, mailer) = service();
        sign_up(&svc, &mailer, "dave", "dave@lab.io").await;

        svc.reset_init("dave@lab.io").await.unwrap();
        let ticket = svc
            .reset_verify("dave@lab.io", &mailed_code(&mailer, "dave@lab.io"))
            .await
            .unwrap();
        svc.reset_complete(&ticket.ticket, "new-password-1", "new-password-1")
            .await
            .unwrap();

        assert!(svc.login("dave", "new-password-1").await.is_ok());
        assert!(svc.login("dave", "hunter2hunter2").await.is_err());
    }

    #[tokio::test]
    async fn reset_for_unknown_email_sends_nothing() {
        let (svc, mailer) = service();
        svc.reset_init("ghost@lab.io").await.unwrap();
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn signup_ticket_is_not_a_reset_ticket() {
        let (svc, mailer) = service();
        svc.signup_init("erin", "erin@lab.io").await.unwrap();
        let ticket = svc
            .signup_verify("erin@lab.io", &mailed_code(&mailer, "erin@lab.io"))
            .await
            .unwrap();
        assert!(matches!(
            svc.reset_complete(&ticket.ticket, "new-password-1", "new-password-1").await,
            Err(AuthError::InvalidTicket(_))
        ));
    }
}
