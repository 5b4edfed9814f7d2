use std::fmt;

use phonenumber::country;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::normalize::{self, Normalized};
use crate::record::{MatchRecord, RawCustomerRow};

/// Lowercase hex SHA-256 digest of a normalized field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct HashedValue(String);

impl HashedValue {
    pub fn of(normalized: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        HashedValue(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HashedValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Names are hashed, country and postal code travel in plain text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInfo {
    pub hashed_first_name: HashedValue,
    pub hashed_last_name: HashedValue,
    pub country_code: String,
    pub postal_code: String,
}

/// A single match key. Serializes to the `UserIdentifier` shape of the audience API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Identifier {
    #[serde(rename = "hashedEmail")]
    Email(HashedValue),
    #[serde(rename = "hashedPhoneNumber")]
    Phone(HashedValue),
    #[serde(rename = "addressInfo")]
    Address(AddressInfo),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    Email,
    Phone,
    Address,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Email => "email",
            IdentifierKind::Phone => "phone",
            IdentifierKind::Address => "address",
        }
    }
}

impl Identifier {
    pub fn kind(&self) -> IdentifierKind {
        match self {
            Identifier::Email(_) => IdentifierKind::Email,
            Identifier::Phone(_) => IdentifierKind::Phone,
            Identifier::Address(_) => IdentifierKind::Address,
        }
    }
}

/// Turns raw rows into `MatchRecord`s.
#[derive(Debug, Clone, Copy)]
pub struct IdentifierBuilder {
    default_region: country::Id,
}

impl Default for IdentifierBuilder {
    fn default() -> Self {
        Self::new(country::Id::US)
    }
}

impl IdentifierBuilder {
    pub fn new(default_region: country::Id) -> Self {
        Self { default_region }
    }

    /// Every identifier the row supports, in email, phone, address order.
    pub fn identifiers(&self, row: &RawCustomerRow) -> Vec<Identifier> {
        let mut identifiers = Vec::with_capacity(3);

        if let Normalized::Valid(email) = normalize::email(row.email.as_deref()) {
            identifiers.push(Identifier::Email(HashedValue::of(&email)));
        }

        if let Normalized::Valid(phone) = normalize::phone(row.phone.as_deref(), self.default_region)
        {
            identifiers.push(Identifier::Phone(HashedValue::of(&phone)));
        }

        if let Some(address) = self.address(row) {
            identifiers.push(Identifier::Address(address));
        }

        identifiers
    }

    /// Build the record for a row, or `None` if nothing in it can be matched on.
    pub fn build(&self, row: RawCustomerRow) -> Option<MatchRecord> {
        let identifiers = self.identifiers(&row);
        let brand = row.brand_label();

        MatchRecord::new(row.customer_number, row.external_id, brand, identifiers)
    }

    // All four components or nothing: a partial address would match the wrong people.
    fn address(&self, row: &RawCustomerRow) -> Option<AddressInfo> {
        let first_name = normalize::name(row.first_name.as_deref());
        let last_name = normalize::name(row.last_name.as_deref());
        let country_code = normalize::country_code(row.region_code.as_deref());
        let postal_code = normalize::postal_code(row.postal_code.as_deref());

        match (first_name, last_name, country_code, postal_code) {
            (
                Normalized::Valid(first_name),
                Normalized::Valid(last_name),
                Normalized::Valid(country_code),
                Normalized::Valid(postal_code),
            ) => Some(AddressInfo {
                hashed_first_name: HashedValue::of(&first_name),
                hashed_last_name: HashedValue::of(&last_name),
                country_code,
                postal_code,
            }),
            (first_name, last_name, country_code, postal_code) => {
                debug!(
                    ?first_name,
                    ?last_name,
                    ?country_code,
                    ?postal_code,
                    "address identifier unusable"
                );
                None
            }
        }
    }
}
