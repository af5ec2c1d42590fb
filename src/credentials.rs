//! Credential Store
//!
//! The user record itself lives outside this crate. The session orchestrator
//! reads and writes it only through [`CredentialStore`]: lookups by email and
//! by id, and whole-record saves after lockout transitions or password
//! changes.
//!
//! [`MemoryCredentialStore`] is suitable for single-instance deployments and
//! tests. For a database, implement the trait over your user table.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A user's credential and lockout state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Stable user identifier (token subject)
    pub user_id: String,
    /// Login email, stored normalized (trimmed, lowercase)
    pub email: String,
    /// Name shown in the user summary
    pub display_name: String,
    /// Authorization role carried in access tokens
    pub role: String,
    /// bcrypt hash of the password
    pub password_hash: String,
    /// Disabled accounts cannot sign in or refresh
    pub is_active: bool,
    /// Consecutive failed logins since the last success or unlock
    pub failed_login_attempts: u32,
    /// Time of the most recent failed login
    pub last_failed_login: Option<DateTime<Utc>>,
    /// Account is locked
    pub is_locked: bool,
    /// When the lock lapses
    pub locked_until: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    /// New active, unlocked record
    pub fn new(
        user_id: impl Into<String>,
        email: &str,
        display_name: impl Into<String>,
        role: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            email: normalize_email(email),
            display_name: display_name.into(),
            role: role.into(),
            password_hash: password_hash.into(),
            is_active: true,
            failed_login_attempts: 0,
            last_failed_login: None,
            is_locked: false,
            locked_until: None,
        }
    }

    /// Public view of the record, safe to return to clients
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            user_id: self.user_id.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            role: self.role.clone(),
        }
    }
}

/// User details returned at login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    pub role: String,
}

/// Normalize an email address for lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Credential store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or failing
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    /// A record with the same email already exists
    #[error("email already registered")]
    Conflict,
    /// Save targeted a record that does not exist
    #[error("no credential record for user {0}")]
    NotFound(String),
}

/// Access to persisted credential records
pub trait CredentialStore: Send + Sync {
    /// Look up a record by (normalized) email
    fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>, StoreError>;

    /// Look up a record by user id
    fn find_by_id(&self, user_id: &str) -> Result<Option<CredentialRecord>, StoreError>;

    /// Replace an existing record
    fn save(&self, record: &CredentialRecord) -> Result<(), StoreError>;

    /// Insert a new record, failing with [`StoreError::Conflict`] if the email is taken
    fn create(&self, record: &CredentialRecord) -> Result<(), StoreError>;
}

#[derive(Default)]
struct Tables {
    by_id: HashMap<String, CredentialRecord>,
    email_index: HashMap<String, String>,
}

/// In-memory credential store
#[derive(Default)]
pub struct MemoryCredentialStore {
    tables: RwLock<Tables>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.tables.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .email_index
            .get(&normalize_email(email))
            .and_then(|id| tables.by_id.get(id))
            .cloned())
    }

    fn find_by_id(&self, user_id: &str) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.tables.read().by_id.get(user_id).cloned())
    }

    fn save(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let previous_email = match tables.by_id.get(&record.user_id) {
            Some(existing) => existing.email.clone(),
            None => return Err(StoreError::NotFound(record.user_id.clone())),
        };

        let email = normalize_email(&record.email);
        if email != previous_email {
            if tables.email_index.contains_key(&email) {
                return Err(StoreError::Conflict);
            }
            tables.email_index.remove(&previous_email);
            tables.email_index.insert(email.clone(), record.user_id.clone());
        }

        let mut stored = record.clone();
        stored.email = email;
        tables.by_id.insert(stored.user_id.clone(), stored);
        Ok(())
    }

    fn create(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let email = normalize_email(&record.email);
        if tables.email_index.contains_key(&email) || tables.by_id.contains_key(&record.user_id) {
            return Err(StoreError::Conflict);
        }

        let mut stored = record.clone();
        stored.email = email.clone();
        tables.email_index.insert(email, stored.user_id.clone());
        tables.by_id.insert(stored.user_id.clone(), stored);
        Ok(())
    }
}
