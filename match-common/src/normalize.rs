//! # Normalize
//!
//! Pure functions turning raw PII strings into the canonical forms that get hashed.
//! Every function returns a `Normalized` value: malformed input is an `Invalid` outcome,
//! never an error, so one bad field cannot take down the row it belongs to.
use phonenumber::{country, Mode};
use thiserror::Error;

/// Characters that make a name unusable for address matching.
const NAME_BLACKLIST: [char; 7] = ['/', '&', '"', ';', ':', '#', '*'];
const MIN_EMAIL_LENGTH: usize = 6;
const MIN_NAME_LENGTH: usize = 2;
const MIN_PHONE_DIGITS: usize = 7;
const POSTAL_CODE_DIGITS: usize = 5;

/// Only US addresses are supported, so a valid region code always implies this country.
pub const US_COUNTRY_CODE: &str = "US";

/// Outcome of normalizing a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Valid(String),
    Missing,
    Invalid(InvalidReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    Malformed,
    TooShort,
    ForbiddenCharacter,
    NotAValidPhoneNumber,
}

impl Normalized {
    pub fn valid(&self) -> Option<&str> {
        match self {
            Normalized::Valid(value) => Some(value.as_str()),
            Normalized::Missing | Normalized::Invalid(_) => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Normalized::Valid(_))
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0} is not a known phone number region")]
pub struct UnknownRegion(pub String);

/// Parse an ISO 3166-1 alpha-2 region code to use as the default when parsing phone numbers.
pub fn parse_region(code: &str) -> Result<country::Id, UnknownRegion> {
    code.trim()
        .to_ascii_uppercase()
        .parse::<country::Id>()
        .map_err(|_| UnknownRegion(code.to_owned()))
}

fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|value| !value.is_empty())
}

fn digits(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

/// Trim and lowercase. Requires exactly one `@`, a `.` in the domain, and at least 6 characters.
pub fn email(raw: Option<&str>) -> Normalized {
    let Some(trimmed) = non_blank(raw) else {
        return Normalized::Missing;
    };
    let email = trimmed.to_lowercase();

    if email.chars().count() < MIN_EMAIL_LENGTH {
        return Normalized::Invalid(InvalidReason::TooShort);
    }

    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(domain), None) if domain.contains('.') => Normalized::Valid(email),
        _ => Normalized::Invalid(InvalidReason::Malformed),
    }
}

/// Strip everything but digits, parse against `default_region` and format as E.164.
///
/// Digit strings that look internationally formatted (a leading `1` and more than ten digits)
/// get a second chance as an explicit `+` prefixed number when the regional parse does not
/// produce a valid number.
pub fn phone(raw: Option<&str>, default_region: country::Id) -> Normalized {
    let Some(trimmed) = non_blank(raw) else {
        return Normalized::Missing;
    };
    let digits = digits(trimmed);

    if digits.len() < MIN_PHONE_DIGITS {
        return Normalized::Invalid(InvalidReason::TooShort);
    }

    let regional = phonenumber::parse(Some(default_region), &digits)
        .ok()
        .filter(|number| number.is_valid());

    let parsed = regional.or_else(|| {
        if digits.starts_with('1') && digits.len() > 10 {
            phonenumber::parse(None, format!("+{digits}"))
                .ok()
                .filter(|number| number.is_valid())
        } else {
            None
        }
    });

    match parsed {
        Some(number) => Normalized::Valid(number.format().mode(Mode::E164).to_string()),
        None => Normalized::Invalid(InvalidReason::NotAValidPhoneNumber),
    }
}

/// Trim and lowercase a first or last name.
pub fn name(raw: Option<&str>) -> Normalized {
    let Some(trimmed) = non_blank(raw) else {
        return Normalized::Missing;
    };
    let name = trimmed.to_lowercase();

    if name.contains(NAME_BLACKLIST) {
        Normalized::Invalid(InvalidReason::ForbiddenCharacter)
    } else if name.chars().count() < MIN_NAME_LENGTH {
        Normalized::Invalid(InvalidReason::TooShort)
    } else {
        Normalized::Valid(name)
    }
}

/// A two letter state code is the only accepted region, and it maps to the US.
pub fn country_code(region: Option<&str>) -> Normalized {
    let Some(region) = non_blank(region) else {
        return Normalized::Missing;
    };

    if region.len() == 2 && region.chars().all(|c| c.is_ascii_alphabetic()) {
        Normalized::Valid(US_COUNTRY_CODE.to_owned())
    } else {
        Normalized::Invalid(InvalidReason::Malformed)
    }
}

/// First five digits of a US zip code, with or without the +4 suffix.
pub fn postal_code(raw: Option<&str>) -> Normalized {
    let Some(trimmed) = non_blank(raw) else {
        return Normalized::Missing;
    };
    let digits = digits(trimmed);

    if digits.len() < POSTAL_CODE_DIGITS {
        Normalized::Invalid(InvalidReason::TooShort)
    } else {
        Normalized::Valid(digits[..POSTAL_CODE_DIGITS].to_owned())
    }
}
