//! Locale-aware number parsing without process-wide locale state.
//!
//! The listing renders prices and volumes with thousands separators
//! ("1,234.5"). A `NumberFormat` describes the separators explicitly and is
//! passed to every parse, so concurrent fetches cannot interfere.

use serde::{Deserialize, Serialize};

use super::provider::DataError;

/// Separator convention of a numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberFormat {
    pub thousands: char,
    pub decimal: char,
}

impl NumberFormat {
    /// `1,234.5`
    pub const EN_US: NumberFormat = NumberFormat {
        thousands: ',',
        decimal: '.',
    };

    /// `1.234,5`
    pub const DE_DE: NumberFormat = NumberFormat {
        thousands: '.',
        decimal: ',',
    };

    /// Parse a formatted number. Surrounding whitespace is ignored.
    pub fn parse(&self, text: &str) -> Result<f64, DataError> {
        let invalid = |reason: &str| DataError::InvalidNumber {
            text: text.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty field"));
        }

        let mut normalized = String::with_capacity(trimmed.len());
        let mut seen_decimal = false;
        for c in trimmed.chars() {
            if c == self.thousands {
                if seen_decimal {
                    return Err(invalid("thousands separator after decimal point"));
                }
                continue;
            }
            if c == self.decimal {
                if seen_decimal {
                    return Err(invalid("more than one decimal point"));
                }
                seen_decimal = true;
                normalized.push('.');
                continue;
            }
            if c.is_ascii_digit() || ((c == '-' || c == '+') && normalized.is_empty()) {
                normalized.push(c);
                continue;
            }
            return Err(invalid("unexpected character"));
        }

        let value: f64 = normalized.parse().map_err(|_| invalid("not a number"))?;
        if !value.is_finite() {
            return Err(invalid("not finite"));
        }
        Ok(value)
    }
}

impl Default for NumberFormat {
    fn default() -> Self {
        Self::EN_US
    }
}
