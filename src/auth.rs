use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::Utc;
use rusqlite::Connection;
use thiserror::Error;

use crate::db;
use crate::models::User;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no account matches that email")]
    UserNotFound,
    #[error("email or password is incorrect")]
    InvalidCredentials,
    #[error("password hashing failed")]
    Hashing,
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("an account with that email already exists")]
    EmailTaken,
    #[error("password hashing failed")]
    Hashing,
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

/// An externally verified identity assertion. Whoever constructs one is
/// responsible for having checked it with the provider first.
#[derive(Debug, Clone)]
pub struct FederatedAssertion {
    pub email: String,
    pub subject: String,
}

pub enum Credentials {
    Local { email: String, password: String },
    Federated(FederatedAssertion),
}

pub fn authenticate(conn: &Connection, credentials: Credentials) -> Result<User, AuthError> {
    match credentials {
        Credentials::Local { email, password } => authenticate_local(conn, &email, &password),
        Credentials::Federated(assertion) => authenticate_federated(conn, &assertion),
    }
}

fn authenticate_local(conn: &Connection, email: &str, password: &str) -> Result<User, AuthError> {
    let Some((_, hash)) = db::user_credentials(conn, email)? else {
        return Err(AuthError::UserNotFound);
    };
    // Accounts created through a federated identity have no stored
    // hash and can never log in with a password.
    let Some(hash) = hash else {
        return Err(AuthError::InvalidCredentials);
    };
    if !verify_password(&hash, password) {
        return Err(AuthError::InvalidCredentials);
    }
    db::user_by_email(conn, email)?.ok_or(AuthError::UserNotFound)
}

/// Email is the sole identity key: an assertion whose email matches an
/// existing local account logs into that account.
fn authenticate_federated(
    conn: &Connection,
    assertion: &FederatedAssertion,
) -> Result<User, AuthError> {
    if let Some(user) = db::user_by_email(conn, &assertion.email)? {
        return Ok(user);
    }
    let created_at = Utc::now().to_rfc3339();
    let id = db::insert_user(conn, &assertion.email, None, &created_at)?;
    Ok(User {
        id,
        email: assertion.email.clone(),
    })
}

pub fn register(conn: &Connection, email: &str, password: &str) -> Result<User, RegisterError> {
    if db::user_by_email(conn, email)?.is_some() {
        return Err(RegisterError::EmailTaken);
    }
    let password_hash = hash_password(password).map_err(|_| RegisterError::Hashing)?;
    let created_at = Utc::now().to_rfc3339();
    let id = db::insert_user(conn, email, Some(&password_hash), &created_at)?;
    Ok(User {
        id,
        email: email.to_string(),
    })
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes())
        .map_err(|_| AuthError::Hashing)?;
    Ok(hash.to_string())
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
