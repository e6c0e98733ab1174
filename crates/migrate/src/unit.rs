//! Migration units
//!
//! A [`MigrationUnit`] is built once per run from a file stem and its body,
//! and never changes afterwards.

use once_cell::sync::Lazy;
use regex::Regex;
use sha1::{Digest, Sha1};

use crate::error::{MigrationError, MigrationResult};

static ORDINAL_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(-?\d+)[-_]?").expect("valid regex"));

/// One migration to potentially apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationUnit {
    pub id: u32,
    pub name: String,
    pub hash: String,
    pub body: String,
}

impl MigrationUnit {
    /// Build a unit from a source identity such as `1_create_users`
    ///
    /// The leading ordinal becomes the id and the rest of the identity,
    /// after an optional `_` or `-` separator, becomes the name.
    pub fn parse(identity: &str, body: impl Into<String>) -> MigrationResult<Self> {
        let malformed = |reason: &str| MigrationError::MalformedUnit {
            identity: identity.to_string(),
            reason: reason.to_string(),
        };

        let captures = ORDINAL_PREFIX
            .captures(identity)
            .ok_or_else(|| malformed("name must start with a numeric id"))?;
        let prefix = captures.get(0).map_or("", |m| m.as_str());
        let ordinal = captures.get(1).map_or("", |m| m.as_str());

        // Ledger ids are PostgreSQL `integer` columns
        let id: i32 = ordinal
            .parse()
            .map_err(|_| malformed("id does not fit a 32-bit integer"))?;
        let id = u32::try_from(id).map_err(|_| malformed("id must not be negative"))?;

        let name = &identity[prefix.len()..];
        if name.is_empty() {
            return Err(malformed("name after the id is empty"));
        }

        Ok(Self::raw(id, name, body))
    }

    /// Build a unit from literal parts, without parsing
    pub fn raw(id: u32, name: impl Into<String>, body: impl Into<String>) -> Self {
        let name = name.into();
        let body = body.into();
        let hash = hash_unit(&name, &body);

        Self { id, name, hash, body }
    }
}

/// Content fingerprint of a unit: SHA-1 over `name` then `body`, as 40 lowercase hex chars
///
/// Changing this for an existing deployment invalidates every recorded hash.
pub fn hash_unit(name: &str, body: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(name.as_bytes());
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}
