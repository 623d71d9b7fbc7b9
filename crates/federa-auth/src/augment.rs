//! Claim augmentation
//!
//! Runs synchronously right before the issuer signs a token and copies
//! selected identity attributes into the claim set. The augmenter is a pure
//! function of (claims, attributes): it never touches the directory.

use crate::claims::{ClaimSet, is_reserved_claim};
use crate::error::AugmentationError;
use federa_common::config::AugmentRuleConfig;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Longest attribute value copied into a claim
pub const MAX_CLAIM_VALUE_LEN: usize = 2048;

/// One attribute to claim rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AugmentRule {
    /// Identity attribute to read
    pub attribute: String,
    /// Claim to write
    pub claim: String,
    /// Fail the sign-in instead of failing open
    pub required: bool,
}

impl AugmentRule {
    /// Optional rule copying `attribute` into a claim of the same name
    pub fn optional(attribute: impl Into<String>) -> Self {
        let attribute = attribute.into();
        Self {
            claim: attribute.clone(),
            attribute,
            required: false,
        }
    }

    /// Required rule copying `attribute` into a claim of the same name
    pub fn required(attribute: impl Into<String>) -> Self {
        Self {
            required: true,
            ..Self::optional(attribute)
        }
    }

    /// Write to a differently named claim
    pub fn into_claim(mut self, claim: impl Into<String>) -> Self {
        self.claim = claim.into();
        self
    }
}

impl From<&AugmentRuleConfig> for AugmentRule {
    fn from(config: &AugmentRuleConfig) -> Self {
        Self {
            attribute: config.attribute.clone(),
            claim: config.claim.clone(),
            required: config.required,
        }
    }
}

/// Pre-token-generation hook
#[derive(Debug, Clone, Default)]
pub struct ClaimAugmenter {
    rules: Vec<AugmentRule>,
}

impl ClaimAugmenter {
    /// Create an augmenter, rejecting rules that target reserved claims
    pub fn new(rules: Vec<AugmentRule>) -> Result<Self, AugmentationError> {
        for rule in &rules {
            if rule.attribute.is_empty() || rule.claim.is_empty() {
                return Err(AugmentationError::EmptyName);
            }
            if is_reserved_claim(&rule.claim) {
                return Err(AugmentationError::ReservedClaim(rule.claim.clone()));
            }
        }
        Ok(Self { rules })
    }

    /// Build from configuration
    pub fn from_config(rules: &[AugmentRuleConfig]) -> Result<Self, AugmentationError> {
        Self::new(rules.iter().map(AugmentRule::from).collect())
    }

    pub fn rules(&self) -> &[AugmentRule] {
        &self.rules
    }

    /// Return the claim set with the configured attributes injected.
    ///
    /// An attribute that is not set leaves its claim absent. A rule that
    /// cannot be applied fails the call when it is required; otherwise the
    /// input claims are returned unmodified.
    pub fn augment(
        &self,
        claims: ClaimSet,
        attributes: &BTreeMap<String, String>,
    ) -> Result<ClaimSet, AugmentationError> {
        let mut augmented = claims.clone();

        for rule in &self.rules {
            let Some(value) = attributes.get(&rule.attribute) else {
                if rule.required {
                    return Err(AugmentationError::MissingAttribute(rule.attribute.clone()));
                }
                continue;
            };

            if let Err(err) = validate_value(&rule.attribute, value) {
                if rule.required {
                    return Err(err);
                }
                warn!(
                    attribute = %rule.attribute,
                    error = %err,
                    "Claim augmentation failed, issuing token without augmented claims"
                );
                return Ok(claims);
            }

            debug!(attribute = %rule.attribute, claim = %rule.claim, "Injecting claim");
            augmented.insert(rule.claim.clone(), Value::String(value.clone()));
        }

        Ok(augmented)
    }
}

fn validate_value(attribute: &str, value: &str) -> Result<(), AugmentationError> {
    let invalid = |reason: &str| AugmentationError::InvalidValue {
        attribute: attribute.to_string(),
        reason: reason.to_string(),
    };

    if value.is_empty() {
        return Err(invalid("empty value"));
    }
    if value.len() > MAX_CLAIM_VALUE_LEN {
        return Err(invalid("value too long"));
    }
    if value.chars().any(char::is_control) {
        return Err(invalid("control characters"));
    }
    Ok(())
}
