use std::{
    fmt,
    ops::{Add, AddAssign, Mul, Sub},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Money amount in US dollars, represented as **integer cents**.
///
/// Use this type for **all** monetary values of an invoice (unit prices,
/// discounts, taxes, totals).
///
/// `Display` renders the SRI decimal form with exactly two fractional
/// digits and no currency symbol:
///
/// ```rust
/// use engine::MoneyCents;
///
/// let amount = MoneyCents::new(12_34);
/// assert_eq!(amount.cents(), 1234);
/// assert_eq!(amount.to_string(), "12.34");
/// ```
///
/// Parsing from user input (accepts `.` or `,` as decimal separator; rejects >
/// 2 decimals):
///
/// ```rust
/// use engine::MoneyCents;
///
/// assert_eq!("10".parse::<MoneyCents>().unwrap().cents(), 1000);
/// assert_eq!("10,5".parse::<MoneyCents>().unwrap().cents(), 1050);
/// assert!("12.345".parse::<MoneyCents>().is_err());
/// ```
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct MoneyCents(i64);

impl MoneyCents {
    pub const ZERO: MoneyCents = MoneyCents(0);

    /// Creates a new amount from integer cents.
    #[must_use]
    pub const fn new(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the raw value in cents.
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Returns `true` if the amount is negative.
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Checked addition (returns `None` on overflow).
    #[must_use]
    pub fn checked_add(self, rhs: MoneyCents) -> Option<MoneyCents> {
        self.0.checked_add(rhs.0).map(MoneyCents)
    }

    /// Checked subtraction (returns `None` on overflow).
    #[must_use]
    pub fn checked_sub(self, rhs: MoneyCents) -> Option<MoneyCents> {
        self.0.checked_sub(rhs.0).map(MoneyCents)
    }

    /// Checked multiplication by a quantity (returns `None` on overflow).
    #[must_use]
    pub fn checked_mul(self, quantity: u32) -> Option<MoneyCents> {
        self.0.checked_mul(i64::from(quantity)).map(MoneyCents)
    }

    /// Applies a rate expressed in basis points (`1500` = 15%), rounding half
    /// away from zero to the nearest cent.
    #[must_use]
    pub fn apply_rate_bp(self, basis_points: u32) -> MoneyCents {
        let product = i128::from(self.0) * i128::from(basis_points);
        let rounded = if product >= 0 {
            (product + 5_000) / 10_000
        } else {
            (product - 5_000) / 10_000
        };
        // Saturates only for rates far above 100%.
        MoneyCents(i64::try_from(rounded).unwrap_or(i64::MAX))
    }

    /// Absolute distance between two amounts.
    #[must_use]
    pub fn abs_diff(self, other: MoneyCents) -> u64 {
        self.0.abs_diff(other.0)
    }
}

impl fmt::Display for MoneyCents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let dollars = abs / 100;
        let cents = abs % 100;
        write!(f, "{sign}{dollars}.{cents:02}")
    }
}

impl From<i64> for MoneyCents {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<MoneyCents> for i64 {
    fn from(value: MoneyCents) -> Self {
        value.0
    }
}

impl Add for MoneyCents {
    type Output = MoneyCents;

    fn add(self, rhs: MoneyCents) -> Self::Output {
        MoneyCents(self.0 + rhs.0)
    }
}

impl AddAssign for MoneyCents {
    fn add_assign(&mut self, rhs: MoneyCents) {
        self.0 += rhs.0;
    }
}

impl Sub for MoneyCents {
    type Output = MoneyCents;

    fn sub(self, rhs: MoneyCents) -> Self::Output {
        MoneyCents(self.0 - rhs.0)
    }
}

impl Mul<u32> for MoneyCents {
    type Output = MoneyCents;

    fn mul(self, rhs: u32) -> Self::Output {
        MoneyCents(self.0 * i64::from(rhs))
    }
}

impl FromStr for MoneyCents {
    type Err = EngineError;

    /// Parses a decimal string into cents.
    ///
    /// Accepts `.` or `,` as decimal separator and an optional leading `+`/`-`.
    ///
    /// Validation rules:
    /// - max 2 fractional digits (rejects `12.345`)
    /// - rejects empty/invalid strings
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let empty = || EngineError::Validation("empty amount".to_string());
        let invalid = || EngineError::Validation(format!("invalid amount: {s}"));
        let overflow = || EngineError::Validation("amount too large".to_string());

        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(empty());
        }

        let (negative, rest) = if let Some(stripped) = trimmed.strip_prefix('-') {
            (true, stripped)
        } else if let Some(stripped) = trimmed.strip_prefix('+') {
            (false, stripped)
        } else {
            (false, trimmed)
        };

        let rest = rest.trim().replace(',', ".");
        if rest.is_empty() {
            return Err(empty());
        }

        let (dollars_str, cents_str) = match rest.split_once('.') {
            Some((d, c)) => (d, Some(c)),
            None => (rest.as_str(), None),
        };

        if dollars_str.is_empty() || !dollars_str.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let dollars: i64 = dollars_str.parse().map_err(|_| invalid())?;

        let cents: i64 = match cents_str {
            None | Some("") => 0,
            Some(frac) if !frac.chars().all(|c| c.is_ascii_digit()) => return Err(invalid()),
            Some(frac) if frac.len() == 1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            Some(frac) if frac.len() == 2 => frac.parse::<i64>().map_err(|_| invalid())?,
            Some(_) => return Err(EngineError::Validation("too many decimals".to_string())),
        };

        let total = dollars
            .checked_mul(100)
            .and_then(|v| v.checked_add(cents))
            .ok_or_else(overflow)?;

        Ok(MoneyCents(if negative { -total } else { total }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_usd_decimal() {
        assert_eq!(MoneyCents::new(0).to_string(), "0.00");
        assert_eq!(MoneyCents::new(1).to_string(), "0.01");
        assert_eq!(MoneyCents::new(10).to_string(), "0.10");
        assert_eq!(MoneyCents::new(1050).to_string(), "10.50");
        assert_eq!(MoneyCents::new(-1050).to_string(), "-10.50");
    }

    #[test]
    fn parse_accepts_dot_or_comma() {
        assert_eq!("10".parse::<MoneyCents>().unwrap().cents(), 1000);
        assert_eq!("10.5".parse::<MoneyCents>().unwrap().cents(), 1050);
        assert_eq!("10,50".parse::<MoneyCents>().unwrap().cents(), 1050);
        assert_eq!("-0.01".parse::<MoneyCents>().unwrap().cents(), -1);
        assert_eq!("+1.00".parse::<MoneyCents>().unwrap().cents(), 100);
        assert_eq!("  2.30 ".parse::<MoneyCents>().unwrap().cents(), 230);
    }

    #[test]
    fn parse_rejects_more_than_two_decimals() {
        assert!("12.345".parse::<MoneyCents>().is_err());
        assert!("0.001".parse::<MoneyCents>().is_err());
        assert!("1.2.3".parse::<MoneyCents>().is_err());
    }

    #[test]
    fn rate_rounds_half_up() {
        // 15% of 10.00
        assert_eq!(MoneyCents::new(1000).apply_rate_bp(1500).cents(), 150);
        // 15% of 0.03 = 0.0045 -> 0.00
        assert_eq!(MoneyCents::new(3).apply_rate_bp(1500).cents(), 0);
        // 15% of 0.10 = 0.015 -> 0.02
        assert_eq!(MoneyCents::new(10).apply_rate_bp(1500).cents(), 2);
        // 12% of 8.33 = 0.9996 -> 1.00
        assert_eq!(MoneyCents::new(833).apply_rate_bp(1200).cents(), 100);
        assert_eq!(MoneyCents::new(1234).apply_rate_bp(0), MoneyCents::ZERO);
    }

    #[test]
    fn checked_arithmetic_reports_overflow() {
        let max = MoneyCents::new(i64::MAX);
        assert_eq!(max.checked_add(MoneyCents::new(1)), None);
        assert_eq!(MoneyCents::new(i64::MIN).checked_sub(MoneyCents::new(1)), None);
        assert_eq!(max.checked_mul(2), None);
        assert_eq!(
            MoneyCents::new(150).checked_sub(MoneyCents::new(200)),
            Some(MoneyCents::new(-50))
        );
    }
}
