//! In-memory identity directory
//!
//! Stands in for the external user pool: sign-up, email confirmation,
//! administrative attribute updates and password authentication. Usernames
//! are case-sensitive.

use crate::error::DirectoryError;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Longest attribute value accepted
const MAX_ATTRIBUTE_LEN: usize = 2048;

/// Identity status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityStatus {
    #[default]
    Active,
    Suspended,
}

/// A directory identity
#[derive(Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Stable subject identifier
    pub sub: String,
    /// Sign-in name (case-sensitive)
    pub username: String,
    /// Email address
    pub email: String,
    /// Whether the email has been verified (immutable afterwards)
    pub email_verified: bool,
    /// Custom attributes (e.g. `department`)
    pub attributes: BTreeMap<String, String>,
    /// Unix timestamp of creation
    pub created_at: u64,
    /// Identity status
    pub status: IdentityStatus,
    #[serde(skip)]
    password: PasswordDigest,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("sub", &self.sub)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("email_verified", &self.email_verified)
            .field("attributes", &self.attributes)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Identity {
    fn new(username: &str, email: &str, password: &str) -> Self {
        let created_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            sub: Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            email_verified: false,
            attributes: BTreeMap::new(),
            created_at,
            status: IdentityStatus::Active,
            password: PasswordDigest::new(password),
        }
    }

    /// Check if identity is active
    pub fn is_active(&self) -> bool {
        self.status == IdentityStatus::Active
    }

    /// Get a custom attribute
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Salted HMAC-SHA256 password digest
#[derive(Clone, Default)]
struct PasswordDigest {
    salt: [u8; 16],
    digest: Vec<u8>,
}

impl PasswordDigest {
    fn new(password: &str) -> Self {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let digest = Self::mac(&salt, password).finalize().into_bytes().to_vec();
        Self { salt, digest }
    }

    fn mac(salt: &[u8], password: &str) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(salt).expect("HMAC accepts any key length");
        mac.update(password.as_bytes());
        mac
    }

    fn verify(&self, password: &str) -> bool {
        Self::mac(&self.salt, password)
            .verify_slice(&self.digest)
            .is_ok()
    }
}

/// In-memory identity directory
///
/// In production this is the external identity provider's user pool
pub struct IdentityDirectory {
    /// Identities indexed by username
    identities: RwLock<HashMap<String, Identity>>,
}

impl Default for IdentityDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityDirectory {
    /// Create a new empty directory
    pub fn new() -> Self {
        Self {
            identities: RwLock::new(HashMap::new()),
        }
    }

    // =========== Self-service ===========

    /// Register a new identity with an unverified email
    pub fn sign_up(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Identity, DirectoryError> {
        if username.is_empty() || username.chars().any(char::is_whitespace) {
            return Err(DirectoryError::InvalidAttribute(format!(
                "invalid username: {username:?}"
            )));
        }
        validate_email(email)?;

        let mut identities = self.identities.write();
        if identities.contains_key(username) {
            return Err(DirectoryError::UserAlreadyExists(username.to_string()));
        }

        let identity = Identity::new(username, email, password);
        identities.insert(username.to_string(), identity.clone());
        Ok(identity)
    }

    /// Mark the email as verified
    pub fn confirm_email(&self, username: &str) -> Result<(), DirectoryError> {
        self.update(username, |identity| {
            identity.email_verified = true;
            Ok(())
        })
    }

    /// Change the email; fails once the current email is verified
    pub fn set_email(&self, username: &str, email: &str) -> Result<(), DirectoryError> {
        validate_email(email)?;
        self.update(username, |identity| {
            if identity.email_verified {
                return Err(DirectoryError::EmailImmutable);
            }
            identity.email = email.to_string();
            Ok(())
        })
    }

    /// Verify a username/password pair
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Identity, DirectoryError> {
        let identity = self
            .identities
            .read()
            .get(username)
            .cloned()
            .ok_or(DirectoryError::NotAuthorized)?;

        if !identity.password.verify(password) {
            return Err(DirectoryError::NotAuthorized);
        }
        if !identity.is_active() {
            return Err(DirectoryError::UserSuspended);
        }
        Ok(identity)
    }

    // =========== Administrative ===========

    /// Set a custom attribute
    pub fn set_attribute(
        &self,
        username: &str,
        name: &str,
        value: &str,
    ) -> Result<(), DirectoryError> {
        if name.is_empty() || name.len() > 32 {
            return Err(DirectoryError::InvalidAttribute(format!(
                "attribute name must be 1-32 characters: {name:?}"
            )));
        }
        if value.len() > MAX_ATTRIBUTE_LEN {
            return Err(DirectoryError::InvalidAttribute(format!(
                "value of {name} exceeds {MAX_ATTRIBUTE_LEN} characters"
            )));
        }
        self.update(username, |identity| {
            identity
                .attributes
                .insert(name.to_string(), value.to_string());
            Ok(())
        })
    }

    /// Remove a custom attribute
    pub fn remove_attribute(&self, username: &str, name: &str) -> Result<(), DirectoryError> {
        self.update(username, |identity| {
            identity.attributes.remove(name);
            Ok(())
        })
    }

    /// Update identity status
    pub fn set_status(&self, username: &str, status: IdentityStatus) -> Result<(), DirectoryError> {
        self.update(username, |identity| {
            identity.status = status;
            Ok(())
        })
    }

    // =========== Lookup ===========

    /// Get identity by username
    pub fn get(&self, username: &str) -> Result<Identity, DirectoryError> {
        self.identities
            .read()
            .get(username)
            .cloned()
            .ok_or_else(|| DirectoryError::UserNotFound(username.to_string()))
    }

    /// Get identity by subject
    pub fn get_by_sub(&self, sub: &str) -> Result<Identity, DirectoryError> {
        self.identities
            .read()
            .values()
            .find(|identity| identity.sub == sub)
            .cloned()
            .ok_or_else(|| DirectoryError::UserNotFound(sub.to_string()))
    }

    /// Number of identities
    pub fn len(&self) -> usize {
        self.identities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.read().is_empty()
    }

    fn update(
        &self,
        username: &str,
        f: impl FnOnce(&mut Identity) -> Result<(), DirectoryError>,
    ) -> Result<(), DirectoryError> {
        let mut identities = self.identities.write();
        let identity = identities
            .get_mut(username)
            .ok_or_else(|| DirectoryError::UserNotFound(username.to_string()))?;
        f(identity)
    }
}

fn validate_email(email: &str) -> Result<(), DirectoryError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(DirectoryError::InvalidEmail(email.to_string())),
    }
}
