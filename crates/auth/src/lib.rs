//! `labinv-auth`: authentication building blocks.
//!
//! Session and ticket tokens (HS256 JWT), password and verification-code
//! hashing, and the account field rules. This crate is decoupled from HTTP
//! and storage.

pub mod account;
pub mod claims;
pub mod code;
pub mod jwt;
pub mod password;

pub use account::{User, validate_code_format, validate_email, validate_password_pair, validate_username};
pub use claims::{ResetTicket, SessionClaims, SignupTicket, TokenValidationError, validate_window};
pub use code::{CODE_TTL_SECS, VerificationCode, VerificationPurpose, generate_code};
pub use jwt::{Hs256Jwt, JwtValidator, MIN_SECRET_LEN, SESSION_TTL_SECS, TICKET_TTL_SECS};
pub use password::{PasswordError, PasswordHasher};
