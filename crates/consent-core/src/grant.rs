//! Local-storage grant decision.
//!
//! [`local_storage_grant`] is a total pure function: every combination of
//! consent data, stored privacy metadata, and override flags maps to a
//! well-defined grant. It never returns an unresolved state and never
//! panics.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::api::{ApiType, GVL_VENDOR_ID};
use crate::consent_data::{ConsentData, TcfSectionConsent};

/// Jurisdictions whose stored metadata requires explicit prior consent
/// before local storage may be used.
const CONSENT_REQUIRED_JURISDICTIONS: &[&str] = &["gdpr"];

/// Why a grant was allowed or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// A configuration override bypassed consent evaluation.
    ForceAllowedByConfig,
    /// No framework and no stored metadata; optimistic first-visit grant.
    Provisional,
    /// Stored, server-confirmed metadata records explicit prior consent.
    Id5Consent,
    /// Stored jurisdiction decided the grant (either direction).
    Jurisdiction,
    /// A consent framework's own signals decided the grant.
    ConsentApi,
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ForceAllowedByConfig => "force_allowed_by_config",
            Self::Provisional => "provisional",
            Self::Id5Consent => "id5_consent",
            Self::Jurisdiction => "jurisdiction",
            Self::ConsentApi => "consent_api",
        };
        write!(f, "{name}")
    }
}

/// Storage-access verdict for one resolution cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalStorageGrant {
    /// Whether persistent storage may be read and written.
    pub allowed: bool,
    /// Which rule of the decision table produced the verdict.
    pub grant_type: GrantType,
    /// The framework that produced the deciding signal, or
    /// [`ApiType::None`] when no framework was involved.
    pub api: ApiType,
}

impl LocalStorageGrant {
    /// Creates a grant.
    #[must_use]
    pub const fn new(allowed: bool, grant_type: GrantType, api: ApiType) -> Self {
        Self {
            allowed,
            grant_type,
            api,
        }
    }
}

impl fmt::Display for LocalStorageGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LocalStorageGrant(allowed={}, type={}, api={})",
            self.allowed, self.grant_type, self.api
        )
    }
}

/// Server-confirmed privacy metadata persisted by the external cache
/// collaborator across page loads. Consulted only when no framework
/// contributed anything to the current cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrivacyMetadata {
    /// Jurisdiction the server associated with this visitor, when known
    /// (for example `"gdpr"`).
    #[serde(default)]
    pub jurisdiction: Option<String>,
    /// Whether the visitor previously gave explicit consent to this
    /// library's vendor.
    #[serde(default)]
    pub id5_consent: bool,
}

/// Loose string/number membership test for the vendor allow-list.
///
/// Some integrators encode numeric vendor ids as strings, so `"131"`
/// and `131` must both match.
fn allow_list_contains_vendor(allowed_vendors: &[String]) -> bool {
    allowed_vendors.iter().any(|v| {
        let v = v.trim();
        v == GVL_VENDOR_ID.to_string() || v.parse::<u32>() == Ok(GVL_VENDOR_ID)
    })
}

/// Gate for a TCF-style jurisdiction (native TCF v2).
///
/// Passes outright when the jurisdiction does not apply. Otherwise the
/// purpose-1 bit must be affirmatively `true` (unknown denies), and when
/// the jurisdiction affirmatively applies, an explicitly withdrawn
/// vendor consent denies. An absent vendor map does not deny: many CMPs
/// omit vendor data entirely, and only the purpose bit is authoritative
/// for them.
fn tcf_gate(applies: Option<bool>, purpose: Option<bool>, vendor: Option<bool>) -> bool {
    match applies {
        Some(false) => true,
        Some(true) => purpose == Some(true) && vendor != Some(false),
        None => purpose == Some(true),
    }
}

/// Gate for an embedded TCF-style GPP section. The section is only
/// interpreted when its id appears in the host's applicable-sections
/// list, so the jurisdiction is known to apply here.
fn gpp_section_gate(section: &TcfSectionConsent) -> bool {
    section.local_storage_purpose_consent == Some(true) && section.vendor_consent != Some(false)
}

/// Per-framework gate for one contributing [`ApiType`].
fn api_gate(api: ApiType, consent: &ConsentData) -> bool {
    match api {
        // USP never gates storage; CCPA has no purpose-1 analogue.
        ApiType::UspV1 => true,
        ApiType::TcfV2 => tcf_gate(
            consent.gdpr_applies,
            consent.local_storage_purpose_consent,
            consent.vendors_consent_granted,
        ),
        ApiType::GppV1_0 | ApiType::GppV1_1 => consent.gpp.as_ref().is_none_or(|gpp| {
            let eu = gpp.eu_tcf_section.as_ref().map_or(true, gpp_section_gate);
            let ca = gpp
                .canada_tcf_section
                .as_ref()
                .map_or(true, gpp_section_gate);
            eu && ca
        }),
        // The allow-list is handled before per-framework gates; treat a
        // stray membership here the same way.
        ApiType::Id5AllowedVendors => consent
            .allowed_vendors
            .as_deref()
            .is_some_and(allow_list_contains_vendor),
        ApiType::None => true,
    }
}

/// Computes the storage-access verdict for a resolved [`ConsentData`].
///
/// Rules are evaluated in order; the first matching rule decides:
///
/// 1. Any override (config flags or a forced-grant data instance) allows
///    unconditionally.
/// 2. With no contributing framework, previously stored server-confirmed
///    metadata decides (optimistic `Provisional` on a first visit).
/// 3. An explicit vendor allow-list decides by membership of this
///    library's vendor id.
/// 4. Otherwise the verdict is the logical AND of every contributing
///    framework's own gate; the grant's `api` names the first failing
///    framework, or the first contributing one when all pass.
#[must_use]
pub fn local_storage_grant(
    consent: &ConsentData,
    stored: Option<&PrivacyMetadata>,
    allow_without_consent_api: bool,
    debug_bypass: bool,
) -> LocalStorageGrant {
    // Rule 1: overrides dominate everything else.
    if allow_without_consent_api || debug_bypass || consent.forced_grant {
        return LocalStorageGrant::new(true, GrantType::ForceAllowedByConfig, ApiType::None);
    }

    // Rule 2: nothing contributed; fall back to stored metadata.
    if consent.is_empty() {
        return match stored {
            None => LocalStorageGrant::new(true, GrantType::Provisional, ApiType::None),
            Some(meta) if meta.id5_consent => {
                LocalStorageGrant::new(true, GrantType::Id5Consent, ApiType::None)
            }
            Some(meta) => {
                let consent_required = meta
                    .jurisdiction
                    .as_deref()
                    .is_some_and(|j| CONSENT_REQUIRED_JURISDICTIONS.contains(&j));
                LocalStorageGrant::new(!consent_required, GrantType::Jurisdiction, ApiType::None)
            }
        };
    }

    // Rule 3: explicit allow-list bypasses purpose/vendor decoding.
    if let Some(allowed_vendors) = consent.allowed_vendors.as_deref() {
        return LocalStorageGrant::new(
            allow_list_contains_vendor(allowed_vendors),
            GrantType::ConsentApi,
            ApiType::Id5AllowedVendors,
        );
    }

    // Rule 4: AND across the contributing frameworks' own gates.
    let mut allowed = true;
    let mut deciding_api = ApiType::None;
    for &api in &consent.api_types {
        if deciding_api == ApiType::None {
            deciding_api = api;
        }
        if !api_gate(api, consent) {
            allowed = false;
            deciding_api = api;
            break;
        }
    }
    LocalStorageGrant::new(allowed, GrantType::ConsentApi, deciding_api)
}
