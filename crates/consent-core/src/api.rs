//! Consent framework identifiers and provenance tags.

use std::fmt;

use serde::{Deserialize, Serialize};

/// This library's registered vendor identifier in the IAB Global Vendor
/// List. Vendor-consent lookups in TCF payloads and GPP sections are keyed
/// by this id, and an explicit allow-list grants storage access iff it
/// contains this id.
pub const GVL_VENDOR_ID: u32 = 131;

/// A consent framework that can contribute data to a resolution cycle.
///
/// The ordering of the variants is meaningful: when several frameworks
/// contribute to one [`crate::ConsentData`] and every per-framework gate
/// passes, the grant names the first contributing framework in this order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ApiType {
    /// No framework contributed.
    #[default]
    None,
    /// IAB Transparency & Consent Framework, version 2.
    TcfV2,
    /// US Privacy API, version 1.
    UspV1,
    /// IAB Global Privacy Platform, version 1.0.
    GppV1_0,
    /// IAB Global Privacy Platform, version 1.1.
    GppV1_1,
    /// Caller-supplied explicit vendor allow-list.
    Id5AllowedVendors,
}

impl ApiType {
    /// Returns a stable identifier string for logs and telemetry.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::TcfV2 => "tcf_v2",
            Self::UspV1 => "usp_v1",
            Self::GppV1_0 => "gpp_v1.0",
            Self::GppV1_1 => "gpp_v1.1",
            Self::Id5AllowedVendors => "id5_allowed_vendors",
        }
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provenance of a resolved [`crate::ConsentData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsentSource {
    /// Nothing has been resolved yet.
    #[default]
    None,
    /// Live detection against a CMP on the page.
    Cmp,
    /// Partner-supplied static consent object.
    Partner,
    /// Debug override forced the grant without any detection.
    Forced,
}

impl fmt::Display for ConsentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Cmp => "cmp",
            Self::Partner => "partner",
            Self::Forced => "forced",
        };
        write!(f, "{name}")
    }
}
