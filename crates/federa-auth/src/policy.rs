//! Storage access policy and ABAC evaluation
//!
//! Rules compare one attribute of the requested object key with one
//! principal tag. Evaluation is deny-overrides: any matching Deny wins,
//! otherwise any matching Allow allows, otherwise the request is implicitly
//! denied. The evaluator is immutable once built.

use crate::credential::PrincipalTagSource;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Action used by object listing
pub const LIST_BUCKET: &str = "s3:ListBucket";

/// Condition key comparing the leading path segment
pub const PREFIX_KEY: &str = "s3:prefix";

/// Condition key comparing the whole prefix
pub const WHOLE_PREFIX_KEY: &str = "federa:WholePrefix";

/// Policy effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// Attribute derived from a resource key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceAttribute {
    /// Text before the first `/`
    LeadingSegment,
    /// The key with trailing `/` trimmed
    WholePrefix,
}

impl ResourceAttribute {
    /// Extract the attribute; an empty result means the key has none
    pub fn extract(self, key: &str) -> &str {
        match self {
            ResourceAttribute::LeadingSegment => key.split('/').next().unwrap_or_default(),
            ResourceAttribute::WholePrefix => key.trim_end_matches('/'),
        }
    }
}

/// Equality test between a resource attribute and a principal tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCondition {
    pub attribute: ResourceAttribute,
    /// Principal tag compared against the attribute
    pub tag: String,
    /// Match keys without an extractable attribute
    #[serde(default)]
    pub allow_empty: bool,
}

impl TagCondition {
    pub fn leading_segment(tag: impl Into<String>) -> Self {
        Self {
            attribute: ResourceAttribute::LeadingSegment,
            tag: tag.into(),
            allow_empty: false,
        }
    }

    pub fn whole_prefix(tag: impl Into<String>) -> Self {
        Self {
            attribute: ResourceAttribute::WholePrefix,
            tag: tag.into(),
            allow_empty: false,
        }
    }

    pub fn allowing_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }

    /// A principal without the tag never matches
    pub fn matches<P: PrincipalTagSource + ?Sized>(&self, principal: &P, key: &str) -> bool {
        let Some(tag_value) = principal.principal_tag(&self.tag) else {
            return false;
        };
        let attribute = self.attribute.extract(key);
        if attribute.is_empty() {
            return self.allow_empty;
        }
        attribute == tag_value
    }
}

/// One policy rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub sid: Option<String>,
    pub effect: Effect,
    /// Resource class pattern, `*` wildcards allowed
    pub resource_class: String,
    /// Action patterns, `*` wildcards allowed
    pub actions: Vec<String>,
    /// `None` matches every key
    pub condition: Option<TagCondition>,
}

impl PolicyRule {
    /// Create a new Allow rule
    pub fn allow() -> PolicyRuleBuilder {
        PolicyRuleBuilder::new(Effect::Allow)
    }

    /// Create a new Deny rule
    pub fn deny() -> PolicyRuleBuilder {
        PolicyRuleBuilder::new(Effect::Deny)
    }
}

/// Builder for policy rules
pub struct PolicyRuleBuilder {
    effect: Effect,
    sid: Option<String>,
    resource_class: String,
    actions: Vec<String>,
    condition: Option<TagCondition>,
}

impl PolicyRuleBuilder {
    fn new(effect: Effect) -> Self {
        Self {
            effect,
            sid: None,
            resource_class: "*".to_string(),
            actions: Vec::new(),
            condition: None,
        }
    }

    pub fn sid(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    pub fn resource_class(mut self, resource_class: impl Into<String>) -> Self {
        self.resource_class = resource_class.into();
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    pub fn condition(mut self, condition: TagCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn build(self) -> PolicyRule {
        PolicyRule {
            sid: self.sid,
            effect: self.effect,
            resource_class: self.resource_class,
            actions: self.actions,
            condition: self.condition,
        }
    }
}

/// Policy loading errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("invalid policy document: {0}")]
    Json(String),

    #[error("statement {0} has no actions")]
    NoActions(String),

    #[error("unsupported condition operator: {0}")]
    UnsupportedOperator(String),

    #[error("unsupported condition key: {0}")]
    UnsupportedKey(String),

    #[error("unsupported condition value: {0:?}")]
    UnsupportedValue(String),

    #[error("invalid pattern {0:?}")]
    InvalidPattern(String),
}

/// An ordered set of rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    pub rules: Vec<PolicyRule>,
}

impl AccessPolicy {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self { rules }
    }

    /// Allow listing a prefix whose leading segment equals the principal's `tag`
    pub fn department_prefix(resource_class: impl Into<String>, tag: impl Into<String>) -> Self {
        Self::new(vec![
            PolicyRule::allow()
                .sid("AllowListOwnPrefix")
                .resource_class(resource_class)
                .action(LIST_BUCKET)
                .condition(TagCondition::leading_segment(tag))
                .build(),
        ])
    }

    /// Parse an IAM-style policy document.
    ///
    /// A statement carries at most one condition, written as
    /// `{"StringEquals": {"s3:prefix": "${aws:PrincipalTag/<tag>}"}}`. A
    /// list value may also contain `""` to let keys without a prefix match.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let document: PolicyDocument =
            serde_json::from_str(json).map_err(|e| PolicyError::Json(e.to_string()))?;

        let mut rules = Vec::new();
        for (index, statement) in document.statements.into_iter().enumerate() {
            let label = statement.sid.clone().unwrap_or_else(|| format!("#{index}"));
            let actions = statement.action.into_vec();
            if actions.is_empty() {
                return Err(PolicyError::NoActions(label));
            }
            let condition = statement.condition.map(parse_condition).transpose()?;

            for resource_class in statement.resource.into_vec() {
                rules.push(PolicyRule {
                    sid: statement.sid.clone(),
                    effect: statement.effect,
                    resource_class,
                    actions: actions.clone(),
                    condition: condition.clone(),
                });
            }
        }
        Ok(Self { rules })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyDocument {
    #[serde(rename = "Statement")]
    statements: Vec<PolicyStatement>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyStatement {
    #[serde(default)]
    sid: Option<String>,
    effect: Effect,
    action: StringOrList,
    resource: StringOrList,
    #[serde(default)]
    condition: Option<HashMap<String, HashMap<String, StringOrList>>>,
}

/// String or list of strings
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    Single(String),
    List(Vec<String>),
}

impl StringOrList {
    fn into_vec(self) -> Vec<String> {
        match self {
            StringOrList::Single(s) => vec![s],
            StringOrList::List(v) => v,
        }
    }
}

fn parse_condition(
    condition: HashMap<String, HashMap<String, StringOrList>>,
) -> Result<TagCondition, PolicyError> {
    let mut operators = condition.into_iter();
    let (operator, keys) = match (operators.next(), operators.next()) {
        (Some(only), None) => only,
        (None, _) => return Err(PolicyError::UnsupportedOperator(String::new())),
        (Some(_), Some((extra, _))) => return Err(PolicyError::UnsupportedOperator(extra)),
    };
    if operator != "StringEquals" {
        return Err(PolicyError::UnsupportedOperator(operator));
    }

    let mut keys = keys.into_iter();
    let (key, values) = match (keys.next(), keys.next()) {
        (Some(only), None) => only,
        (None, _) => return Err(PolicyError::UnsupportedKey(String::new())),
        (Some(_), Some((extra, _))) => return Err(PolicyError::UnsupportedKey(extra)),
    };
    let attribute = match key.as_str() {
        PREFIX_KEY => ResourceAttribute::LeadingSegment,
        WHOLE_PREFIX_KEY => ResourceAttribute::WholePrefix,
        _ => return Err(PolicyError::UnsupportedKey(key)),
    };

    let mut tag = None;
    let mut allow_empty = false;
    for value in values.into_vec() {
        if value.is_empty() {
            allow_empty = true;
        } else if let Some(name) = principal_tag_variable(&value)
            && tag.is_none()
        {
            tag = Some(name.to_string());
        } else {
            return Err(PolicyError::UnsupportedValue(value));
        }
    }

    let tag = tag.ok_or_else(|| PolicyError::UnsupportedValue(String::new()))?;
    Ok(TagCondition {
        attribute,
        tag,
        allow_empty,
    })
}

/// `${aws:PrincipalTag/name}` or `${federa:PrincipalTag/name}` -> `name`
fn principal_tag_variable(value: &str) -> Option<&str> {
    let inner = value.strip_prefix("${")?.strip_suffix('}')?;
    let name = inner
        .strip_prefix("aws:PrincipalTag/")
        .or_else(|| inner.strip_prefix("federa:PrincipalTag/"))?;
    (!name.is_empty()).then_some(name)
}

/// Policy evaluation result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PolicyDecision {
    /// Explicitly allowed
    Allow,
    /// Explicitly denied
    Deny,
    /// No matching rule (implicit deny)
    ImplicitDeny,
}

impl PolicyDecision {
    pub fn is_allowed(self) -> bool {
        self == PolicyDecision::Allow
    }
}

/// Decision plus the rule that caused it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyExplanation {
    pub decision: PolicyDecision,
    /// `None` for implicit deny or an unnamed rule
    pub sid: Option<String>,
}

struct CompiledRule {
    rule: PolicyRule,
    resource_class: Regex,
    actions: Vec<Regex>,
}

impl CompiledRule {
    fn applies_to(&self, resource_class: &str, action: &str) -> bool {
        self.resource_class.is_match(resource_class)
            && self.actions.iter().any(|a| a.is_match(action))
    }
}

/// Evaluates an [`AccessPolicy`] against principal tags
pub struct PolicyEvaluator {
    rules: Vec<CompiledRule>,
}

impl std::fmt::Debug for PolicyEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEvaluator")
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl PolicyEvaluator {
    /// Compile the rule patterns
    pub fn new(policy: AccessPolicy) -> Result<Self, PolicyError> {
        let rules = policy
            .rules
            .into_iter()
            .map(|rule| {
                let resource_class = compile_pattern(&rule.resource_class)?;
                let actions = rule
                    .actions
                    .iter()
                    .map(|a| compile_pattern(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(CompiledRule {
                    rule,
                    resource_class,
                    actions,
                })
            })
            .collect::<Result<Vec<_>, PolicyError>>()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> impl Iterator<Item = &PolicyRule> {
        self.rules.iter().map(|c| &c.rule)
    }

    /// Decide whether `principal` may perform `action` on `key`
    pub fn authorize<P: PrincipalTagSource + ?Sized>(
        &self,
        principal: &P,
        resource_class: &str,
        key: &str,
        action: &str,
    ) -> PolicyDecision {
        self.authorize_explained(principal, resource_class, key, action)
            .decision
    }

    /// Like [`authorize`](Self::authorize), also naming the deciding rule
    pub fn authorize_explained<P: PrincipalTagSource + ?Sized>(
        &self,
        principal: &P,
        resource_class: &str,
        key: &str,
        action: &str,
    ) -> PolicyExplanation {
        let mut allow_rule: Option<&PolicyRule> = None;

        for compiled in &self.rules {
            if !compiled.applies_to(resource_class, action) {
                continue;
            }
            let rule = &compiled.rule;
            let matched = rule
                .condition
                .as_ref()
                .is_none_or(|c| c.matches(principal, key));
            if !matched {
                continue;
            }

            match rule.effect {
                Effect::Deny => {
                    return PolicyExplanation {
                        decision: PolicyDecision::Deny,
                        sid: rule.sid.clone(),
                    };
                }
                Effect::Allow => {
                    if allow_rule.is_none() {
                        allow_rule = Some(rule);
                    }
                }
            }
        }

        match allow_rule {
            Some(rule) => PolicyExplanation {
                decision: PolicyDecision::Allow,
                sid: rule.sid.clone(),
            },
            None => PolicyExplanation {
                decision: PolicyDecision::ImplicitDeny,
                sid: None,
            },
        }
    }
}

/// Convert an IAM wildcard pattern to an anchored regex
fn compile_pattern(pattern: &str) -> Result<Regex, PolicyError> {
    let regex_pattern = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{regex_pattern}$"))
        .map_err(|_| PolicyError::InvalidPattern(pattern.to_string()))
}
