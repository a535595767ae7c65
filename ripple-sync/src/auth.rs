//! Session establishment: user registry and handshake proof tokens.
//!
//! Splits authentication into two steps so raw credentials never reach
//! the websocket layer:
//!
//! 1. [`Authenticator::login`] checks a username/password against the
//!    registry (SHA-256 password hashes) and issues a [`ProofToken`].
//! 2. The Feed Authority calls [`Authenticator::verify`] on the token
//!    carried in the upgrade request headers before accepting the
//!    connection.
//!
//! ## Token format
//!
//! Hex-encoded `timestamp || signature`:
//! - 8 bytes: issue time (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 over `identity || timestamp`
//!
//! Tokens expire after [`AuthConfig::token_expiry`].

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_LEN: usize = 40; // 8-byte timestamp + 32-byte signature

/// Authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("username already exists")]
    UserExists,
    #[error("user not found")]
    UnknownUser,
    #[error("invalid password")]
    InvalidPassword,
    #[error("invalid proof token")]
    InvalidToken,
    #[error("proof token expired")]
    Expired,
    #[error("user store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("user store is not valid JSON: {0}")]
    Malformed(String),
}

/// Authenticator configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC token signing.
    pub secret: Vec<u8>,
    /// How long an issued token stays valid.
    pub token_expiry: Duration,
}

impl AuthConfig {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// An opaque handshake credential, consumable by [`crate::session::Session::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofToken(String);

impl ProofToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    username: String,
    password_hash: String,
}

/// User registry and proof-token issuer/validator.
///
/// One instance is shared between the session-establishment surface and
/// the Feed Authority. The registry lock is synchronous so that
/// [`verify`](Self::verify) can run inside the websocket upgrade
/// callback.
pub struct Authenticator {
    config: AuthConfig,
    users: RwLock<HashMap<String, UserRecord>>,
}

impl Authenticator {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new user. Fails if the username is taken.
    pub fn register(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let mut users = self.users.write();
        if users.contains_key(username) {
            return Err(AuthError::UserExists);
        }
        users.insert(
            username.to_string(),
            UserRecord {
                username: username.to_string(),
                password_hash: hash_password(password),
            },
        );
        log::info!("registered user {username}");
        Ok(())
    }

    /// Check credentials and issue a proof token for the handshake.
    pub fn login(&self, username: &str, password: &str) -> Result<ProofToken, AuthError> {
        let users = self.users.read();
        let record = users.get(username).ok_or(AuthError::UnknownUser)?;
        if record.password_hash != hash_password(password) {
            return Err(AuthError::InvalidPassword);
        }
        let timestamp = unix_millis();
        let mut token = Vec::with_capacity(TOKEN_LEN);
        token.extend_from_slice(&timestamp.to_be_bytes());
        token.extend_from_slice(&self.sign(username, timestamp));
        Ok(ProofToken(hex::encode(token)))
    }

    /// Validate a proof token presented at upgrade time for `identity`.
    pub fn verify(&self, identity: &str, token: &str) -> Result<(), AuthError> {
        let bytes = hex::decode(token).map_err(|_| AuthError::InvalidToken)?;
        if bytes.len() != TOKEN_LEN {
            return Err(AuthError::InvalidToken);
        }
        let timestamp_bytes: [u8; 8] = bytes[0..8].try_into().map_err(|_| AuthError::InvalidToken)?;
        let timestamp = u64::from_be_bytes(timestamp_bytes);

        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|_| AuthError::InvalidToken)?;
        mac.update(identity.as_bytes());
        mac.update(&timestamp_bytes);
        mac.verify_slice(&bytes[8..])
            .map_err(|_| AuthError::InvalidToken)?;

        let age = unix_millis().saturating_sub(timestamp);
        if age > self.config.token_expiry.as_millis() as u64 {
            return Err(AuthError::Expired);
        }
        Ok(())
    }

    /// Number of registered users.
    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }

    /// Load the user registry from a JSON file, replacing the current one.
    ///
    /// Returns the number of users loaded.
    pub async fn load_users(&self, path: impl AsRef<Path>) -> Result<usize, AuthError> {
        let contents = tokio::fs::read_to_string(path).await?;
        let loaded: HashMap<String, UserRecord> =
            serde_json::from_str(&contents).map_err(|e| AuthError::Malformed(e.to_string()))?;
        let count = loaded.len();
        *self.users.write() = loaded;
        log::info!("loaded {count} registered users");
        Ok(count)
    }

    /// Persist the user registry as JSON.
    pub async fn save_users(&self, path: impl AsRef<Path>) -> Result<(), AuthError> {
        let json = {
            let users = self.users.read();
            serde_json::to_string(&*users).map_err(|e| AuthError::Malformed(e.to_string()))?
        };
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    fn sign(&self, identity: &str, timestamp: u64) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .expect("HMAC accepts any key length");
        mac.update(identity.as_bytes());
        mac.update(&timestamp.to_be_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
