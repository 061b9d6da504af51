//! The normalized result of one consent resolution cycle.
//!
//! A [`ConsentData`] is created empty when a refresh is triggered,
//! populated by merging each adapter's partial contribution, and frozen
//! (handed out behind `Arc`) once the orchestrator resolves. It is never
//! mutated after resolution; the next refresh always builds a new
//! instance from scratch.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::api::{ApiType, ConsentSource};

/// GPP section id for the embedded EU TCF section (`tcfeuv2`).
pub const GPP_SECTION_TCF_EU: i32 = 2;

/// GPP section id for the embedded Canada TCF section (`tcfcav1`).
pub const GPP_SECTION_TCF_CA: i32 = 5;

/// GPP protocol version advertised by a host's ping answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GppVersion {
    /// GPP 1.0 (`gppVersion == "1.0"`).
    V1_0,
    /// GPP 1.1 (`gppVersion == "1.1"`).
    V1_1,
}

impl GppVersion {
    /// The [`ApiType`] contributed by this protocol version.
    #[must_use]
    pub const fn api_type(&self) -> ApiType {
        match self {
            Self::V1_0 => ApiType::GppV1_0,
            Self::V1_1 => ApiType::GppV1_1,
        }
    }
}

/// The two decoded booleans of an embedded TCF-style GPP section.
///
/// `None` means the host never supplied the value (unknown); the grant
/// decision treats unknown as not-consented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TcfSectionConsent {
    /// Purpose-1 (local storage) consent bit.
    pub local_storage_purpose_consent: Option<bool>,
    /// Consent bit for this library's vendor id.
    pub vendor_consent: Option<bool>,
}

/// GPP-specific portion of a [`ConsentData`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GppData {
    /// Protocol version the host advertised.
    pub version: GppVersion,
    /// Section ids the host declared applicable.
    pub applicable_sections: Vec<i32>,
    /// Raw GPP string as supplied by the host.
    pub gpp_string: String,
    /// Decoded EU TCF section, when applicable and present.
    pub eu_tcf_section: Option<TcfSectionConsent>,
    /// Decoded Canada TCF section, when applicable and present.
    pub canada_tcf_section: Option<TcfSectionConsent>,
}

/// Normalized consent state produced by one resolution cycle.
///
/// Each adapter only ever writes its own fields, so merging partial
/// results is a shallow union with no conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConsentData {
    /// Frameworks that contributed data to this instance.
    pub api_types: BTreeSet<ApiType>,
    /// Opaque GDPR consent string, present only if TCF contributed
    /// (directly or via GPP's embedded EU section).
    pub consent_string: Option<String>,
    /// Whether GDPR applies; `None` until a framework resolves it.
    pub gdpr_applies: Option<bool>,
    /// The single decoded bit that gates storage (TCF purpose 1).
    pub local_storage_purpose_consent: Option<bool>,
    /// Consent bit for this library's vendor id in the TCF vendor map.
    pub vendors_consent_granted: Option<bool>,
    /// USP (CCPA) privacy string.
    pub ccpa_string: Option<String>,
    /// GPP contribution, when a GPP host answered.
    pub gpp: Option<GppData>,
    /// Explicit vendor allow-list; bypasses purpose/vendor decoding.
    pub allowed_vendors: Option<Vec<String>>,
    /// Where this data came from.
    pub source: ConsentSource,
    /// True when a debug override bypassed all detection.
    pub forced_grant: bool,
}

impl ConsentData {
    /// Creates an empty instance with the given provenance.
    #[must_use]
    pub fn with_source(source: ConsentSource) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }

    /// Creates the bypass instance produced by the forced-grant strategy.
    #[must_use]
    pub fn forced_by_config() -> Self {
        Self {
            source: ConsentSource::Forced,
            forced_grant: true,
            ..Self::default()
        }
    }

    /// Returns `true` if a USP string was contributed.
    #[must_use]
    pub fn has_ccpa_string(&self) -> bool {
        self.ccpa_string.is_some()
    }

    /// Shallow union of another partial contribution into this one.
    ///
    /// Fields already set are only overwritten when the incoming partial
    /// carries a value; `api_types` is a set union. Each adapter writes
    /// only its own fields, so the order of merging is immaterial.
    pub fn merge(&mut self, partial: Self) {
        self.api_types.extend(partial.api_types);
        if partial.consent_string.is_some() {
            self.consent_string = partial.consent_string;
        }
        if partial.gdpr_applies.is_some() {
            self.gdpr_applies = partial.gdpr_applies;
        }
        if partial.local_storage_purpose_consent.is_some() {
            self.local_storage_purpose_consent = partial.local_storage_purpose_consent;
        }
        if partial.vendors_consent_granted.is_some() {
            self.vendors_consent_granted = partial.vendors_consent_granted;
        }
        if partial.ccpa_string.is_some() {
            self.ccpa_string = partial.ccpa_string;
        }
        if partial.gpp.is_some() {
            self.gpp = partial.gpp;
        }
        if partial.allowed_vendors.is_some() {
            self.allowed_vendors = partial.allowed_vendors;
        }
        self.forced_grant = self.forced_grant || partial.forced_grant;
    }

    /// Returns `true` if no framework contributed anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.api_types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_unions_api_types_and_keeps_disjoint_fields() {
        let mut tcf = ConsentData::default();
        tcf.api_types.insert(ApiType::TcfV2);
        tcf.consent_string = Some("COw".to_string());
        tcf.gdpr_applies = Some(true);

        let mut usp = ConsentData::default();
        usp.api_types.insert(ApiType::UspV1);
        usp.ccpa_string = Some("1YYN".to_string());

        tcf.merge(usp);
        assert_eq!(tcf.api_types.len(), 2);
        assert_eq!(tcf.consent_string.as_deref(), Some("COw"));
        assert_eq!(tcf.ccpa_string.as_deref(), Some("1YYN"));
        assert_eq!(tcf.gdpr_applies, Some(true));
        assert!(tcf.has_ccpa_string());
    }

    #[test]
    fn merge_does_not_erase_set_fields_with_empty_partial() {
        let mut data = ConsentData::default();
        data.api_types.insert(ApiType::TcfV2);
        data.gdpr_applies = Some(false);

        data.merge(ConsentData::default());
        assert_eq!(data.gdpr_applies, Some(false));
        assert!(!data.is_empty());
    }

    #[test]
    fn forced_by_config_is_marked() {
        let data = ConsentData::forced_by_config();
        assert!(data.forced_grant);
        assert_eq!(data.source, ConsentSource::Forced);
        assert!(data.is_empty());
    }
}
