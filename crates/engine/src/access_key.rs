//! The 49-digit SRI access key (`claveAcceso`).
//!
//! Layout, positions counted from 1:
//!
//! | positions | width | content |
//! |---|---|---|
//! | 1-8 | 8 | emission date `ddmmyyyy` |
//! | 9-10 | 2 | document type (`01` invoice) |
//! | 11-23 | 13 | issuer RUC |
//! | 24 | 1 | environment |
//! | 25-27 | 3 | establishment |
//! | 28-30 | 3 | emission point |
//! | 31-39 | 9 | sequential, zero padded |
//! | 40-47 | 8 | numeric code |
//! | 48 | 1 | emission type |
//! | 49 | 1 | modulo-11 check digit |

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{EmissionType, EngineError, Environment, ResultEngine};

pub const ACCESS_KEY_LEN: usize = 49;
pub const INVOICE_DOCUMENT_TYPE: &str = "01";
pub const MAX_SEQUENTIAL: i64 = 999_999_999;

/// Everything an access key is derived from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessKeyFields<'a> {
    pub emission_date: NaiveDate,
    pub document_type: &'a str,
    pub issuer_ruc: &'a str,
    pub environment: Environment,
    pub establishment: &'a str,
    pub emission_point: &'a str,
    pub sequential: i64,
    pub numeric_code: u32,
    pub emission_type: EmissionType,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessKey(String);

impl AccessKey {
    /// Builds the key from its fields. Pure: the same fields always give the
    /// same key.
    pub fn build(fields: &AccessKeyFields<'_>) -> ResultEngine<Self> {
        require_digits("document type", fields.document_type, 2)?;
        require_digits("issuer RUC", fields.issuer_ruc, 13)?;
        require_digits("establishment", fields.establishment, 3)?;
        require_digits("emission point", fields.emission_point, 3)?;
        if !(1..=MAX_SEQUENTIAL).contains(&fields.sequential) {
            return Err(EngineError::Validation(format!(
                "sequential {} out of range 1..={MAX_SEQUENTIAL}",
                fields.sequential
            )));
        }
        if fields.numeric_code > 99_999_999 {
            return Err(EngineError::Validation(format!(
                "numeric code {} has more than 8 digits",
                fields.numeric_code
            )));
        }

        let mut key = String::with_capacity(ACCESS_KEY_LEN);
        key.push_str(&fields.emission_date.format("%d%m%Y").to_string());
        key.push_str(fields.document_type);
        key.push_str(fields.issuer_ruc);
        key.push_str(fields.environment.code());
        key.push_str(fields.establishment);
        key.push_str(fields.emission_point);
        key.push_str(&format!("{:09}", fields.sequential));
        key.push_str(&format!("{:08}", fields.numeric_code));
        key.push_str(fields.emission_type.code());

        let digit = modulo11_check_digit(&key).ok_or_else(|| {
            EngineError::Validation("access key base must be numeric".to_string())
        })?;
        key.push(char::from(b'0' + digit));
        Ok(Self(key))
    }

    /// Validates an existing key, including its check digit.
    pub fn parse(value: &str) -> ResultEngine<Self> {
        let value = value.trim();
        if value.len() != ACCESS_KEY_LEN || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(EngineError::Validation(format!(
                "access key must be {ACCESS_KEY_LEN} digits"
            )));
        }
        let (base, check) = value.split_at(ACCESS_KEY_LEN - 1);
        let expected = modulo11_check_digit(base)
            .ok_or_else(|| EngineError::Validation("access key must be numeric".to_string()))?;
        if check.as_bytes()[0] - b'0' != expected {
            return Err(EngineError::Validation(format!(
                "access key check digit mismatch: expected {expected}"
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn establishment(&self) -> &str {
        &self.0[24..27]
    }

    pub fn emission_point(&self) -> &str {
        &self.0[27..30]
    }

    pub fn sequential(&self) -> i64 {
        self.0[30..39].parse().unwrap_or_default()
    }

    pub fn numeric_code(&self) -> u32 {
        self.0[39..47].parse().unwrap_or_default()
    }

    pub fn check_digit(&self) -> u8 {
        self.0.as_bytes()[ACCESS_KEY_LEN - 1] - b'0'
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccessKey {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccessKey> for String {
    fn from(value: AccessKey) -> Self {
        value.0
    }
}

/// Modulo-11 check digit with weights 2..=7 cycling from the rightmost digit.
///
/// `11 - (sum mod 11)` where a result of 11 maps to 0 and 10 maps to 1.
/// Returns `None` if `digits` contains anything but ASCII digits.
pub fn modulo11_check_digit(digits: &str) -> Option<u8> {
    const WEIGHTS: [u32; 6] = [2, 3, 4, 5, 6, 7];

    let mut sum: u32 = 0;
    for (i, ch) in digits.chars().rev().enumerate() {
        let digit = ch.to_digit(10)?;
        sum += digit * WEIGHTS[i % WEIGHTS.len()];
    }

    match 11 - (sum % 11) {
        11 => Some(0),
        10 => Some(1),
        d => u8::try_from(d).ok(),
    }
}

pub(crate) fn require_digits(label: &str, value: &str, width: usize) -> ResultEngine<()> {
    if value.len() == width && value.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "{label} must be exactly {width} digits, got {value:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(sequential: i64) -> AccessKeyFields<'static> {
        AccessKeyFields {
            emission_date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            document_type: INVOICE_DOCUMENT_TYPE,
            issuer_ruc: "1790012345001",
            environment: Environment::Test,
            establishment: "001",
            emission_point: "002",
            sequential,
            numeric_code: 12_345_678,
            emission_type: EmissionType::Normal,
        }
    }

    #[test]
    fn check_digit_vectors() {
        assert_eq!(modulo11_check_digit("41261533"), Some(6));
        // remainder 1 -> 10 -> 1
        assert_eq!(modulo11_check_digit("6"), Some(1));
        // remainder 0 -> 11 -> 0
        assert_eq!(modulo11_check_digit("0"), Some(0));
        assert_eq!(modulo11_check_digit("1"), Some(9));
        assert_eq!(modulo11_check_digit("12a"), None);
    }

    #[test]
    fn build_lays_out_fields() {
        let key = AccessKey::build(&fields(42)).unwrap();
        let s = key.as_str();
        assert_eq!(s.len(), ACCESS_KEY_LEN);
        assert_eq!(&s[0..8], "01032026");
        assert_eq!(&s[8..10], "01");
        assert_eq!(&s[10..23], "1790012345001");
        assert_eq!(&s[23..24], "1");
        assert_eq!(key.establishment(), "001");
        assert_eq!(key.emission_point(), "002");
        assert_eq!(&s[30..39], "000000042");
        assert_eq!(key.sequential(), 42);
        assert_eq!(key.numeric_code(), 12_345_678);
        assert_eq!(&s[47..48], "1");
        assert_eq!(s, "0103202601179001234500110010020000000421234567812");
        assert_eq!(key.check_digit(), 2);
    }

    #[test]
    fn build_is_deterministic() {
        assert_eq!(
            AccessKey::build(&fields(7)).unwrap(),
            AccessKey::build(&fields(7)).unwrap()
        );
    }

    #[test]
    fn build_rejects_bad_widths() {
        let mut f = fields(1);
        f.establishment = "01";
        assert!(matches!(
            AccessKey::build(&f),
            Err(EngineError::Validation(_))
        ));

        let mut f = fields(1);
        f.issuer_ruc = "179001234500";
        assert!(AccessKey::build(&f).is_err());

        assert!(AccessKey::build(&fields(0)).is_err());
        assert!(AccessKey::build(&fields(1_000_000_000)).is_err());
    }

    #[test]
    fn parse_checks_the_check_digit() {
        let key = AccessKey::build(&fields(42)).unwrap();
        assert_eq!(AccessKey::parse(key.as_str()).unwrap(), key);

        let mut tampered = key.as_str().to_string();
        tampered.replace_range(48..49, "3");
        assert!(AccessKey::parse(&tampered).is_err());
        assert!(AccessKey::parse("123").is_err());
    }
}
