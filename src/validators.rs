//! Input-boundary checks for documents, phones, emails and usernames.
//!
//! Everything here is a pure, total function: invalid input yields `false`
//! (or a `ValidationError` from the `normalize_*` helpers), never a panic.
//! Sensitive values are normalized to digits before they reach hashing or
//! encryption, so `111.444.777-35` and `11144477735` share one search hash.

use regex::Regex;

const NATIONAL_ID_LEN: usize = 11;
const SECONDARY_ID_LEN: usize = 14;
const SECONDARY_ID_WEIGHTS_FIRST: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const SECONDARY_ID_WEIGHTS_SECOND: [u32; 12] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3];
const MIN_AREA_CODE: u32 = 11;
const MAX_AREA_CODE: u32 = 99;
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid national id")]
    NationalId,
    #[error("invalid secondary id")]
    SecondaryId,
    #[error("invalid phone number")]
    Phone,
    #[error("invalid email address")]
    Email,
    #[error("invalid username")]
    Username,
    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    Password,
}

/// Document families that share the strip/format/mask helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    NationalId,
    SecondaryId,
    Phone,
}

impl DocumentKind {
    #[must_use]
    pub fn validate(self, raw: &str) -> bool {
        match self {
            Self::NationalId => validate_national_id(raw),
            Self::SecondaryId => validate_secondary_id(raw),
            Self::Phone => validate_phone(raw),
        }
    }
}

/// Keep only ASCII digits.
#[must_use]
pub fn strip_formatting(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

fn digits_of(raw: &str) -> Vec<u32> {
    raw.chars().filter_map(|c| c.to_digit(10)).collect()
}

fn all_same(digits: &[u32]) -> bool {
    digits.windows(2).all(|pair| pair[0] == pair[1])
}

/// Mod-11 check digit: remainder below 2 maps to 0.
fn mod11_digit(sum: u32) -> u32 {
    let remainder = sum % 11;
    if remainder < 2 {
        0
    } else {
        11 - remainder
    }
}

/// Validate an 11-digit national id (CPF layout). Formatting characters are ignored.
#[must_use]
pub fn validate_national_id(raw: &str) -> bool {
    let digits = digits_of(raw);
    if digits.len() != NATIONAL_ID_LEN || all_same(&digits) {
        return false;
    }

    let first: u32 = digits[..9]
        .iter()
        .zip((2..=10_u32).rev())
        .map(|(d, w)| d * w)
        .sum();
    let dv1 = mod11_digit(first);
    if digits[9] != dv1 {
        return false;
    }

    let second: u32 = digits[..10]
        .iter()
        .zip((2..=11_u32).rev())
        .map(|(d, w)| d * w)
        .sum();
    digits[10] == mod11_digit(second)
}

/// Validate a 14-digit secondary id (CNPJ layout).
#[must_use]
pub fn validate_secondary_id(raw: &str) -> bool {
    let digits = digits_of(raw);
    if digits.len() != SECONDARY_ID_LEN || all_same(&digits) {
        return false;
    }

    let base = &digits[..12];
    let first: u32 = base
        .iter()
        .zip(SECONDARY_ID_WEIGHTS_FIRST)
        .map(|(d, w)| d * w)
        .sum();
    let dv1 = mod11_digit(first);
    if digits[12] != dv1 {
        return false;
    }

    let second: u32 = base
        .iter()
        .zip(SECONDARY_ID_WEIGHTS_SECOND)
        .map(|(d, w)| d * w)
        .sum::<u32>()
        + dv1 * 2;
    digits[13] == mod11_digit(second)
}

/// Validate a 10 or 11 digit phone number with a plausible area code.
#[must_use]
pub fn validate_phone(raw: &str) -> bool {
    let digits = digits_of(raw);
    if !(10..=11).contains(&digits.len()) {
        return false;
    }
    if digits.iter().all(|d| *d == 0) {
        return false;
    }
    let area_code = digits[0] * 10 + digits[1];
    (MIN_AREA_CODE..=MAX_AREA_CODE).contains(&area_code)
}

/// Format digits for display. Input with an unexpected length comes back as bare digits.
#[must_use]
pub fn apply_formatting(kind: DocumentKind, raw: &str) -> String {
    let d = strip_formatting(raw);
    match (kind, d.len()) {
        (DocumentKind::NationalId, 11) => {
            format!("{}.{}.{}-{}", &d[..3], &d[3..6], &d[6..9], &d[9..])
        }
        (DocumentKind::SecondaryId, 14) => format!(
            "{}.{}.{}/{}-{}",
            &d[..2],
            &d[2..5],
            &d[5..8],
            &d[8..12],
            &d[12..]
        ),
        (DocumentKind::Phone, 11) => format!("({}) {}-{}", &d[..2], &d[2..7], &d[7..]),
        (DocumentKind::Phone, 10) => format!("({}) {}-{}", &d[..2], &d[2..6], &d[6..]),
        _ => d,
    }
}

/// Show only the last two digits of a national id.
#[must_use]
pub fn mask_national_id(raw: &str) -> String {
    let d = strip_formatting(raw);
    if d.len() < NATIONAL_ID_LEN {
        return "***.***.***-**".to_string();
    }
    format!("***.***.***-{}", &d[d.len() - 2..])
}

/// Show only the last four digits of a phone number.
#[must_use]
pub fn mask_phone(raw: &str) -> String {
    let d = strip_formatting(raw);
    if d.len() < 8 {
        return "(**) ****-****".to_string();
    }
    format!("(**) ****-{}", &d[d.len() - 4..])
}

/// Validate and return the digits-only national id.
///
/// # Errors
/// Returns `ValidationError::NationalId` when the check digits do not match.
pub fn normalize_national_id(raw: &str) -> Result<String, ValidationError> {
    if validate_national_id(raw) {
        Ok(strip_formatting(raw))
    } else {
        Err(ValidationError::NationalId)
    }
}

/// Validate and return the digits-only secondary id.
///
/// # Errors
/// Returns `ValidationError::SecondaryId` when the check digits do not match.
pub fn normalize_secondary_id(raw: &str) -> Result<String, ValidationError> {
    if validate_secondary_id(raw) {
        Ok(strip_formatting(raw))
    } else {
        Err(ValidationError::SecondaryId)
    }
}

/// Validate and return the digits-only phone number.
///
/// # Errors
/// Returns `ValidationError::Phone` for bad length, all zeros or an out-of-range area code.
pub fn normalize_phone(raw: &str) -> Result<String, ValidationError> {
    if validate_phone(raw) {
        Ok(strip_formatting(raw))
    } else {
        Err(ValidationError::Phone)
    }
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Usernames are 3 to 64 characters of `[a-z0-9._-]`, compared case-insensitively.
#[must_use]
pub fn valid_username(username: &str) -> bool {
    Regex::new(r"^[a-z0-9._-]{3,64}$").is_ok_and(|regex| regex.is_match(&username.to_lowercase()))
}

#[must_use]
pub fn valid_password(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_LEN
}
