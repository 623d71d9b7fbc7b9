//! Claim to principal-tag mapping
//!
//! A [`TagMappingConfig`] is validated when it is applied, never at request
//! time. The [`TagMappingTable`] keeps one version-stamped snapshot per
//! (pool, provider) target; readers clone an `Arc` and never observe a
//! partially written mapping.

use async_trait::async_trait;
use federa_common::{IssuerId, PoolId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Maximum number of mappings per target
pub const MAX_MAPPINGS: usize = 50;

/// Maximum tag name length
pub const MAX_TAG_NAME_LEN: usize = 128;

/// One claim to tag pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagMapping {
    /// Token claim to read
    pub claim: String,
    /// Principal tag to write
    pub tag: String,
}

impl TagMapping {
    pub fn new(claim: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            tag: tag.into(),
        }
    }
}

/// Desired mapping for one federation target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMappingConfig {
    /// Identity pool (idempotency key together with `provider`)
    pub pool_id: PoolId,
    /// Provider whose tokens the mapping reads
    pub provider: IssuerId,
    /// Ordered claim to tag list
    pub mappings: Vec<TagMapping>,
    /// Prepend the provider's default tag set
    #[serde(default)]
    pub use_defaults: bool,
}

/// Mapping validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingValidationError {
    #[error("too many mappings: {0} (max {MAX_MAPPINGS})")]
    TooMany(usize),

    #[error("claim name must not be empty")]
    EmptyClaim,

    #[error("invalid tag name {0:?}")]
    InvalidTagName(String),

    #[error("claim {0} is mapped more than once")]
    DuplicateClaim(String),

    #[error("tag {0} is written by more than one mapping")]
    DuplicateTag(String),
}

fn is_tag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || " _.:/=+-@".contains(c)
}

impl TagMappingConfig {
    pub fn new(pool_id: PoolId, provider: IssuerId, mappings: Vec<TagMapping>) -> Self {
        Self {
            pool_id,
            provider,
            mappings,
            use_defaults: false,
        }
    }

    pub fn with_defaults(mut self, use_defaults: bool) -> Self {
        self.use_defaults = use_defaults;
        self
    }

    /// The provider default tag set
    pub fn default_mappings() -> Vec<TagMapping> {
        vec![TagMapping::new("aud", "client"), TagMapping::new("sub", "sub")]
    }

    /// Check the explicit mappings
    pub fn validate(&self) -> Result<(), MappingValidationError> {
        if self.mappings.len() > MAX_MAPPINGS {
            return Err(MappingValidationError::TooMany(self.mappings.len()));
        }

        let mut claims = HashSet::new();
        let mut tags = HashSet::new();
        for mapping in &self.mappings {
            if mapping.claim.is_empty() {
                return Err(MappingValidationError::EmptyClaim);
            }
            if mapping.tag.is_empty()
                || mapping.tag.len() > MAX_TAG_NAME_LEN
                || !mapping.tag.chars().all(is_tag_char)
            {
                return Err(MappingValidationError::InvalidTagName(mapping.tag.clone()));
            }
            if !claims.insert(mapping.claim.as_str()) {
                return Err(MappingValidationError::DuplicateClaim(mapping.claim.clone()));
            }
            if !tags.insert(mapping.tag.as_str()) {
                return Err(MappingValidationError::DuplicateTag(mapping.tag.clone()));
            }
        }
        Ok(())
    }

    /// Mappings the broker applies: defaults first (when enabled), explicit
    /// entries after; an explicit entry replaces a default writing the same tag.
    pub fn effective_mappings(&self) -> Vec<TagMapping> {
        if !self.use_defaults {
            return self.mappings.clone();
        }
        let mut effective: Vec<TagMapping> = Self::default_mappings()
            .into_iter()
            .filter(|d| !self.mappings.iter().any(|m| m.tag == d.tag))
            .collect();
        effective.extend(self.mappings.iter().cloned());
        effective
    }
}

/// Outcome of one apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Result reported by a mapping target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMapping {
    pub pool_id: PoolId,
    pub provider: IssuerId,
    pub version: u64,
    pub outcome: ApplyOutcome,
}

/// Active mapping for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMappingSnapshot {
    /// Bumped on every effective change, starting at 1
    pub version: u64,
    /// Config as applied
    pub config: TagMappingConfig,
    /// Resolved mapping list
    pub active: Vec<TagMapping>,
}

/// Errors reported by a mapping target
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// Store unavailable; the same request may be retried
    #[error("mapping store unavailable: {0}")]
    Transient(String),

    /// The store refused the mapping
    #[error("mapping rejected: {0}")]
    Rejected(String),
}

/// Configuration store the tag mapper writes to
#[async_trait]
pub trait TagMappingTarget: Send + Sync {
    /// Target name for logging
    fn name(&self) -> &str;

    /// Replace the mapping for `config.pool_id`/`config.provider`
    async fn set_principal_tag_map(
        &self,
        config: &TagMappingConfig,
    ) -> Result<AppliedMapping, TargetError>;
}

type TargetKey = (PoolId, IssuerId);

/// In-process mapping store read by the broker
#[derive(Debug, Default)]
pub struct TagMappingTable {
    entries: RwLock<HashMap<TargetKey, Arc<TagMappingSnapshot>>>,
}

impl TagMappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot for a target
    pub fn snapshot(&self, pool_id: &PoolId, provider: &IssuerId) -> Option<Arc<TagMappingSnapshot>> {
        self.entries
            .read()
            .get(&(pool_id.clone(), provider.clone()))
            .cloned()
    }

    /// Validate and swap in a new snapshot
    pub fn replace(&self, config: &TagMappingConfig) -> Result<AppliedMapping, MappingValidationError> {
        config.validate()?;
        let key = (config.pool_id.clone(), config.provider.clone());

        let mut entries = self.entries.write();
        let (version, outcome) = match entries.get(&key) {
            Some(current) if current.config == *config => {
                return Ok(AppliedMapping {
                    pool_id: key.0,
                    provider: key.1,
                    version: current.version,
                    outcome: ApplyOutcome::Unchanged,
                });
            }
            Some(current) => (current.version + 1, ApplyOutcome::Updated),
            None => (1, ApplyOutcome::Created),
        };

        let snapshot = TagMappingSnapshot {
            version,
            config: config.clone(),
            active: config.effective_mappings(),
        };
        entries.insert(key.clone(), Arc::new(snapshot));
        drop(entries);

        info!(
            pool_id = %key.0,
            provider = %key.1,
            version,
            ?outcome,
            "Principal tag mapping applied"
        );
        Ok(AppliedMapping {
            pool_id: key.0,
            provider: key.1,
            version,
            outcome,
        })
    }

    /// Delete a target's mapping; returns whether one existed
    pub fn remove(&self, pool_id: &PoolId, provider: &IssuerId) -> bool {
        self.entries
            .write()
            .remove(&(pool_id.clone(), provider.clone()))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl TagMappingTarget for TagMappingTable {
    fn name(&self) -> &str {
        "local"
    }

    async fn set_principal_tag_map(
        &self,
        config: &TagMappingConfig,
    ) -> Result<AppliedMapping, TargetError> {
        self.replace(config)
            .map_err(|e| TargetError::Rejected(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> PoolId {
        PoolId::new("us-east-1:pool").unwrap()
    }

    fn provider() -> IssuerId {
        IssuerId::new("idp.example.com/pool-1").unwrap()
    }

    fn department() -> TagMappingConfig {
        TagMappingConfig::new(
            pool(),
            provider(),
            vec![TagMapping::new("department", "department")],
        )
    }

    #[test]
    fn test_validate_accepts_department() {
        assert!(department().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let mut config = department();
        config.mappings.push(TagMapping::new("dept", "department"));
        assert_eq!(
            config.validate(),
            Err(MappingValidationError::DuplicateTag("department".to_string()))
        );

        let mut config = department();
        config.mappings.push(TagMapping::new("department", "team"));
        assert_eq!(
            config.validate(),
            Err(MappingValidationError::DuplicateClaim("department".to_string()))
        );

        let config = TagMappingConfig::new(pool(), provider(), vec![TagMapping::new("", "x")]);
        assert_eq!(config.validate(), Err(MappingValidationError::EmptyClaim));

        let long = "x".repeat(129);
        for tag in ["", "dept#1", long.as_str()] {
            let config =
                TagMappingConfig::new(pool(), provider(), vec![TagMapping::new("c", tag)]);
            assert!(matches!(
                config.validate(),
                Err(MappingValidationError::InvalidTagName(_))
            ));
        }

        let many = (0..51)
            .map(|i| TagMapping::new(format!("c{i}"), format!("t{i}")))
            .collect();
        let config = TagMappingConfig::new(pool(), provider(), many);
        assert_eq!(config.validate(), Err(MappingValidationError::TooMany(51)));
    }

    #[test]
    fn test_effective_mappings_without_defaults() {
        assert_eq!(
            department().effective_mappings(),
            vec![TagMapping::new("department", "department")]
        );
    }

    #[test]
    fn test_effective_mappings_with_defaults() {
        let mut config = department().with_defaults(true);
        config.mappings.push(TagMapping::new("email", "sub"));

        assert_eq!(
            config.effective_mappings(),
            vec![
                TagMapping::new("aud", "client"),
                TagMapping::new("department", "department"),
                TagMapping::new("email", "sub"),
            ]
        );
    }

    #[test]
    fn test_replace_is_idempotent() {
        let table = TagMappingTable::new();

        let first = table.replace(&department()).unwrap();
        assert_eq!(first.outcome, ApplyOutcome::Created);
        assert_eq!(first.version, 1);
        let before = table.snapshot(&pool(), &provider()).unwrap();

        for _ in 0..3 {
            let again = table.replace(&department()).unwrap();
            assert_eq!(again.outcome, ApplyOutcome::Unchanged);
            assert_eq!(again.version, 1);
        }

        let after = table.snapshot(&pool(), &provider()).unwrap();
        assert_eq!(*before, *after);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_replace_supersedes_whole_mapping() {
        let table = TagMappingTable::new();
        table.replace(&department()).unwrap();
        let held = table.snapshot(&pool(), &provider()).unwrap();

        let update = TagMappingConfig::new(pool(), provider(), vec![TagMapping::new("team", "team")]);
        let applied = table.replace(&update).unwrap();
        assert_eq!(applied.outcome, ApplyOutcome::Updated);
        assert_eq!(applied.version, 2);

        let current = table.snapshot(&pool(), &provider()).unwrap();
        assert_eq!(current.active, vec![TagMapping::new("team", "team")]);
        // Readers holding the old snapshot keep a consistent view
        assert_eq!(held.active, vec![TagMapping::new("department", "department")]);
    }

    #[test]
    fn test_invalid_config_leaves_state_untouched() {
        let table = TagMappingTable::new();
        table.replace(&department()).unwrap();

        let bad = TagMappingConfig::new(pool(), provider(), vec![TagMapping::new("a", "bad#tag")]);
        assert!(table.replace(&bad).is_err());
        assert_eq!(table.snapshot(&pool(), &provider()).unwrap().version, 1);
    }

    #[test]
    fn test_remove() {
        let table = TagMappingTable::new();
        table.replace(&department()).unwrap();
        assert!(table.remove(&pool(), &provider()));
        assert!(!table.remove(&pool(), &provider()));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_table_as_target_rejects_invalid() {
        let table = TagMappingTable::new();
        let bad = TagMappingConfig::new(pool(), provider(), vec![TagMapping::new("", "x")]);
        let err = table.set_principal_tag_map(&bad).await.unwrap_err();
        assert!(matches!(err, TargetError::Rejected(_)));
        assert_eq!(table.name(), "local");
    }
}
