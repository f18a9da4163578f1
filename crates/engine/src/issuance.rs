//! Issuance parameters shared by every invoice the engine emits.

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// SRI environment the documents are issued in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Test,
    Production,
}

impl Environment {
    /// Single digit written into the access key and `<ambiente>`.
    pub fn code(self) -> &'static str {
        match self {
            Self::Test => "1",
            Self::Production => "2",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Production => "production",
        }
    }
}

impl TryFrom<&str> for Environment {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "test" | "pruebas" => Ok(Self::Test),
            "2" | "production" | "produccion" => Ok(Self::Production),
            other => Err(EngineError::InvalidConfig(format!(
                "invalid environment: {other}"
            ))),
        }
    }
}

/// Emission type digit (`tipoEmision`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmissionType {
    #[default]
    Normal,
    Contingency,
}

impl EmissionType {
    pub fn code(self) -> &'static str {
        match self {
            Self::Normal => "1",
            Self::Contingency => "2",
        }
    }
}

impl TryFrom<&str> for EmissionType {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "normal" => Ok(Self::Normal),
            "2" | "contingency" | "contingencia" => Ok(Self::Contingency),
            other => Err(EngineError::InvalidConfig(format!(
                "invalid emission type: {other}"
            ))),
        }
    }
}

/// Settings applied at generation time.
///
/// `numeric_code` pins the 8-digit numeric code of the access key; when it is
/// `None` a random code is drawn for every invoice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceSettings {
    pub environment: Environment,
    pub emission_type: EmissionType,
    pub numeric_code: Option<u32>,
}

impl IssuanceSettings {
    pub fn validate(&self) -> Result<(), EngineError> {
        match self.numeric_code {
            Some(code) if code > 99_999_999 => Err(EngineError::InvalidConfig(format!(
                "numeric code {code} has more than 8 digits"
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_accepts_codes_and_names() {
        assert_eq!(Environment::try_from("1").unwrap(), Environment::Test);
        assert_eq!(
            Environment::try_from("Production").unwrap(),
            Environment::Production
        );
        assert!(Environment::try_from("staging").is_err());
        assert_eq!(Environment::Production.code(), "2");
    }

    #[test]
    fn numeric_code_is_limited_to_eight_digits() {
        let mut settings = IssuanceSettings {
            numeric_code: Some(12_345_678),
            ..IssuanceSettings::default()
        };
        assert!(settings.validate().is_ok());
        settings.numeric_code = Some(123_456_789);
        assert!(settings.validate().is_err());
    }
}
