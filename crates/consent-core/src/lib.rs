//! # consent-core
//!
//! Pure domain model for the consent resolution engine: framework
//! identifiers, the normalized [`ConsentData`] produced by one
//! resolution cycle, the TCF v2 core-string bit decoder, and the
//! total [`local_storage_grant`] decision function that gates every
//! storage-touching subsystem.
//!
//! This crate is runtime-free by design: no async, no frame access, no
//! I/O. The async detection machinery lives in `consent-engine` and
//! feeds its merged results into the types defined here.
//!
//! ## Modules
//!
//! - [`api`]: framework identifiers and provenance tags
//! - [`consent_data`]: the normalized per-cycle consent model
//! - [`tcf_string`]: fallback decoder for the TCF v2 core segment
//! - [`grant`]: the local-storage grant decision table
//! - [`config`]: engine configuration with fail-closed validation

pub mod api;
pub mod config;
pub mod consent_data;
pub mod grant;
pub mod tcf_string;

pub use api::{ApiType, ConsentSource, GVL_VENDOR_ID};
pub use config::{ConfigError, ConsentConfig, SOURCE_IAB, SOURCE_STATIC};
pub use consent_data::{
    ConsentData, GppData, GppVersion, TcfSectionConsent, GPP_SECTION_TCF_CA, GPP_SECTION_TCF_EU,
};
pub use grant::{local_storage_grant, GrantType, LocalStorageGrant, PrivacyMetadata};
pub use tcf_string::{purpose_consent, TcfStringError};
