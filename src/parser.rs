// 🏷️ Field Parsers - parcel identifiers, sale dates, verification codes
// Every external identifier format collapses onto one canonical PARID

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Canonical PARID width (county format, zero padded)
pub const CANONICAL_PARID_LEN: usize = 12;

// ============================================================================
// PARCEL IDENTIFIER FORMATS
// ============================================================================

/// ParcelIdFormat - which external format an identifier arrived in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParcelIdFormat {
    /// "110394004000" - county PARID, already canonical
    Canonical,

    /// "110-39-4004-000" - APN with dashes (AVM vendors)
    Dashed,

    /// "110 39 4004 000" - APN with spaces or other separators
    Separated,

    /// "123456" - numeric id with leading zeros dropped
    Short,

    /// Longer than the canonical width; kept as-is after stripping
    Extended,
}

impl ParcelIdFormat {
    pub fn name(&self) -> &str {
        match self {
            ParcelIdFormat::Canonical => "canonical",
            ParcelIdFormat::Dashed => "dashed",
            ParcelIdFormat::Separated => "separated",
            ParcelIdFormat::Short => "short",
            ParcelIdFormat::Extended => "extended",
        }
    }
}

/// Detect the format of a raw parcel identifier.
/// Returns None when the input carries no digits at all.
pub fn detect_parcel_format(raw: &str) -> Option<ParcelIdFormat> {
    let trimmed = raw.trim();
    let digits = trimmed.chars().filter(|c| c.is_ascii_digit()).count();

    if digits == 0 {
        return None;
    }

    if trimmed.contains('-') {
        return Some(ParcelIdFormat::Dashed);
    }

    if digits != trimmed.chars().count() {
        return Some(ParcelIdFormat::Separated);
    }

    Some(match digits.cmp(&CANONICAL_PARID_LEN) {
        std::cmp::Ordering::Equal => ParcelIdFormat::Canonical,
        std::cmp::Ordering::Less => ParcelIdFormat::Short,
        std::cmp::Ordering::Greater => ParcelIdFormat::Extended,
    })
}

/// Normalize any known parcel identifier format to the canonical PARID.
///
/// Strips every non-digit and left-pads with zeros to 12 digits.
/// "110-39-4004-000" → "110394004000", "123456" → "000000123456".
pub fn normalize_parcel_id(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.is_empty() {
        return None;
    }

    Some(format!("{:0>width$}", digits, width = CANONICAL_PARID_LEN))
}

// ============================================================================
// SALE DATES
// ============================================================================

/// Parse a sale date (supports YYYY-MM-DD, MM/DD/YYYY, and timestamps
/// whose first ten characters are YYYY-MM-DD)
pub fn parse_sale_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%m/%d/%Y") {
        return Some(date);
    }

    // "2023-05-01 00:00:00" / "2023-05-01T00:00:00Z"
    trimmed
        .get(..10)
        .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
}

// ============================================================================
// VERIFICATION CODES
// ============================================================================

/// Codes that mark a reliable market (arms-length) transaction
pub const ARMS_LENGTH_CODES: [&str; 4] = ["1", "2", "5", "V"];

/// Known non-market codes (foreclosure, related party, estate, ...)
pub const NON_ARMS_LENGTH_CODES: [&str; 9] = ["0", "3", "5B", "7", "Z", "F", "K", "N", "C"];

/// Leading code token: "1:MARKET SALE" → "1", "z" → "Z"
pub fn verification_token(code: &str) -> String {
    code.split(':')
        .next()
        .unwrap_or("")
        .trim()
        .to_uppercase()
}

/// Whether a verification code describes an arms-length sale.
/// Unknown codes are treated as non-market.
pub fn is_arms_length_code(code: &str) -> bool {
    let token = verification_token(code);
    ARMS_LENGTH_CODES.contains(&token.as_str())
}

// ============================================================================
// TESTS
// ============================================================================
