use serde::Deserialize;

use crate::identifier::{Identifier, IdentifierKind};

/// A customer row as it comes out of a data source. No field is guaranteed to be present.
///
/// Column aliases cover the headers used by older CSV exports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RawCustomerRow {
    #[serde(alias = "cust_no")]
    pub customer_number: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(alias = "contact_guid")]
    pub external_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(alias = "zip")]
    pub postal_code: Option<String>,
    #[serde(alias = "state")]
    pub region_code: Option<String>,
    pub brand: Option<String>,
}

impl RawCustomerRow {
    /// The brand label in the form used for filtering, if the row carries one.
    pub fn brand_label(&self) -> Option<String> {
        self.brand
            .as_deref()
            .map(str::trim)
            .filter(|brand| !brand.is_empty())
            .map(str::to_lowercase)
    }
}

/// One customer's hashed identifiers plus the metadata we carry along for diagnostics.
/// A `MatchRecord` always holds at least one identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRecord {
    customer_number: Option<String>,
    external_id: Option<String>,
    brand: Option<String>,
    identifiers: Vec<Identifier>,
}

impl MatchRecord {
    /// Returns `None` when there are no identifiers: such a record has nothing to match on.
    pub fn new(
        customer_number: Option<String>,
        external_id: Option<String>,
        brand: Option<String>,
        identifiers: Vec<Identifier>,
    ) -> Option<Self> {
        if identifiers.is_empty() {
            return None;
        }

        Some(Self {
            customer_number,
            external_id,
            brand,
            identifiers,
        })
    }

    pub fn identifiers(&self) -> &[Identifier] {
        &self.identifiers
    }

    pub fn customer_number(&self) -> Option<&str> {
        self.customer_number.as_deref()
    }

    pub fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }

    pub fn brand(&self) -> Option<&str> {
        self.brand.as_deref()
    }

    pub fn has(&self, kind: IdentifierKind) -> bool {
        self.identifiers.iter().any(|id| id.kind() == kind)
    }
}
