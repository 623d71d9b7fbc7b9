//! Federa Authentication and Authorization
//!
//! This crate provides:
//! - An identity directory and token issuer with claim augmentation
//! - Identity token verification against registered providers
//! - Claim to principal-tag mapping with an idempotent, retrying apply
//! - The federation broker exchanging identity tokens for credentials
//! - Request signing with the credential's secret key
//! - Attribute-based storage policy evaluation
//!
//! # Example
//!
//! ```rust,ignore
//! use federa_auth::{FederationBroker, PolicyEvaluator, AccessPolicy, LIST_BUCKET};
//!
//! let session = issuer.sign_in("alice", "password")?;
//! let credential = broker.exchange(&session.id_token, &issuer_id).await?;
//!
//! let evaluator = PolicyEvaluator::new(AccessPolicy::department_prefix(bucket, "department"))?;
//! let decision = evaluator.authorize(&credential, bucket, "Engineering/", LIST_BUCKET);
//! ```

// Identity and tokens
pub mod augment;
pub mod claims;
pub mod directory;
pub mod error;
pub mod issuer;
pub mod provider;
pub mod token;

// Federation
pub mod broker;
pub mod credential;
pub mod mapper;
pub mod mapping;
pub mod session;
pub mod signing;

// Authorization
pub mod policy;

// Re-export core types
pub use augment::{AugmentRule, ClaimAugmenter};
pub use claims::{ClaimSet, Claims, TokenUse};
pub use directory::{Identity, IdentityDirectory, IdentityStatus};
pub use error::{AugmentationError, DirectoryError, FederationError, TokenError};
pub use issuer::{IssuerSettings, Session, TokenIssuer};
pub use provider::{ProviderRegistry, RegisteredProvider};
pub use token::{TokenVerifier, VerifiedToken};

// Re-export federation types
pub use broker::{BrokerSettings, FederationBroker};
pub use credential::{
    CredentialMinter, FederatedCredential, LocalMinter, MintError, MintRequest, MintedKeys,
    PrincipalTagSource, PrincipalTags,
};
pub use mapper::{MappingAck, RetryPolicy, TagMapper};
pub use mapping::{
    AppliedMapping, ApplyOutcome, MappingValidationError, TagMapping, TagMappingConfig,
    TagMappingTable, TagMappingTarget, TargetError,
};
pub use session::{SessionClaims, SessionSealer, SessionTokenError};
pub use signing::{SignatureError, StorageRequest};

// Re-export policy types
pub use policy::{
    AccessPolicy, Effect, LIST_BUCKET, PolicyDecision, PolicyError, PolicyEvaluator,
    PolicyExplanation, PolicyRule, ResourceAttribute, TagCondition,
};
