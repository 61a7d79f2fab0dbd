//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for the identifiers exchanged with the remote
//! store. Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// ItemId
// ============================================================================

/// Remote store identifier of a file or folder
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId(String);

impl ItemId {
    /// Create a new ItemId
    ///
    /// # Errors
    /// Returns error if the ID is empty or contains whitespace
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidItemId(
                "Item ID cannot be empty".to_string(),
            ));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidItemId(format!(
                "Item ID contains whitespace: {id}"
            )));
        }
        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ItemId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

// ============================================================================
// ScopeId
// ============================================================================

/// Identifier of a watched subtree: a folder id, or the root sentinel
///
/// The sentinel value `root` doubles as the remote store's alias for the
/// top-level folder, so it can be passed straight to listing calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScopeId(String);

impl ScopeId {
    /// The sentinel used for the top of the watched tree
    pub const ROOT: &'static str = "root";

    /// Create a new ScopeId
    ///
    /// # Errors
    /// Returns error if the ID is empty or contains whitespace
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidScopeId(format!(
                "Scope ID must be non-empty without whitespace: {id:?}"
            )));
        }
        Ok(Self(id))
    }

    /// The root scope
    #[must_use]
    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    /// Scope rooted at the given folder
    #[must_use]
    pub fn folder(id: &ItemId) -> Self {
        Self(id.as_str().to_string())
    }

    /// Returns true for the root sentinel
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    /// The folder this scope is rooted at, or `None` for the root sentinel
    ///
    /// Items directly under the root carry no parent id, so this is also
    /// the `parent_id` that children of the scope are cached under.
    #[must_use]
    pub fn as_item_id(&self) -> Option<ItemId> {
        if self.is_root() {
            None
        } else {
            Some(ItemId(self.0.clone()))
        }
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ScopeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ScopeId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ScopeId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ScopeId> for String {
    fn from(id: ScopeId) -> Self {
        id.0
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

/// Client-chosen identifier of a push-notification channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Maximum length accepted by the remote store for channel ids
    const MAX_LEN: usize = 64;

    /// Create a SubscriptionId from an existing value
    ///
    /// # Errors
    /// Returns error if the value is empty, too long, or not URL-safe
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() || id.len() > Self::MAX_LEN {
            return Err(DomainError::InvalidSubscriptionId(format!(
                "Subscription ID must be 1..={} characters",
                Self::MAX_LEN
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '+' | '='))
        {
            return Err(DomainError::InvalidSubscriptionId(format!(
                "Subscription ID contains invalid characters: {id}"
            )));
        }
        Ok(Self(id))
    }

    /// Mint a fresh random subscription id
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubscriptionId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SubscriptionId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<SubscriptionId> for String {
    fn from(id: SubscriptionId) -> Self {
        id.0
    }
}

// ============================================================================
// Revision
// ============================================================================

/// Opaque revision marker supplied by the remote store
///
/// Only ever compared for equality; never ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Wrap a revision marker
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Revision {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SigningToken
// ============================================================================

/// Hex-encoded HMAC tag attached to a channel and echoed back by every
/// notification delivered on it
///
/// `Debug` only prints a short prefix so tokens never end up in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SigningToken(String);

impl SigningToken {
    /// Create a SigningToken from its hex encoding
    ///
    /// # Errors
    /// Returns error if the value is empty or not lowercase/uppercase hex
    pub fn new(token: impl Into<String>) -> Result<Self, DomainError> {
        let token = token.into();
        if token.is_empty() || token.len() % 2 != 0 {
            return Err(DomainError::InvalidSigningToken(
                "Signing token must be a non-empty even-length hex string".to_string(),
            ));
        }
        if !token.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidSigningToken(
                "Signing token must be hex-encoded".to_string(),
            ));
        }
        Ok(Self(token))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex-encode a freshly computed MAC tag
    pub(crate) fn from_tag(tag: &[u8]) -> Self {
        Self(hex::encode(tag))
    }
}

impl fmt::Debug for SigningToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let preview = &self.0[..self.0.len().min(8)];
        write!(f, "SigningToken({preview}...)")
    }
}

impl TryFrom<String> for SigningToken {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<SigningToken> for String {
    fn from(token: SigningToken) -> Self {
        token.0
    }
}
