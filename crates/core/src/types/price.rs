//! Type-safe price representation using decimal arithmetic.

use core::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Errors that can occur when constructing a [`Price`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PriceError {
    /// The amount is below zero.
    #[error("price cannot be negative (got {0})")]
    Negative(Decimal),
}

/// A non-negative price with currency information.
///
/// Amounts are kept in the currency's standard unit (dollars, not cents) and
/// never go through floating point.
///
/// ```
/// use cartwheel_core::{CurrencyCode, Price};
/// use rust_decimal::Decimal;
///
/// let price = Price::new(Decimal::new(1999, 2), CurrencyCode::USD).unwrap();
/// assert_eq!(price.display(), "$19.99");
/// assert_eq!(price.times(3).display(), "$59.97");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    amount: Decimal,
    currency_code: CurrencyCode,
}

impl Price {
    /// Create a new price.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError::Negative`] if `amount` is below zero.
    pub fn new(amount: Decimal, currency_code: CurrencyCode) -> Result<Self, PriceError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(PriceError::Negative(amount));
        }
        Ok(Self {
            amount,
            currency_code,
        })
    }

    /// Create a price in the default currency.
    ///
    /// # Errors
    ///
    /// Returns [`PriceError::Negative`] if `amount` is below zero.
    pub fn usd(amount: Decimal) -> Result<Self, PriceError> {
        Self::new(amount, CurrencyCode::USD)
    }

    /// Zero in the given currency.
    #[must_use]
    pub const fn zero(currency_code: CurrencyCode) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency_code,
        }
    }

    /// The decimal amount.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.amount
    }

    /// The ISO 4217 currency code.
    #[must_use]
    pub const fn currency_code(&self) -> CurrencyCode {
        self.currency_code
    }

    /// This price multiplied by a line quantity.
    #[must_use]
    pub fn times(&self, quantity: u32) -> Self {
        Self {
            amount: self.amount * Decimal::from(quantity),
            currency_code: self.currency_code,
        }
    }

    /// Add another amount, keeping this price's currency.
    #[must_use]
    pub fn plus(&self, other: Self) -> Self {
        Self {
            amount: self.amount + other.amount,
            currency_code: self.currency_code,
        }
    }

    /// Format for display (e.g., "$19.99").
    #[must_use]
    pub fn display(&self) -> String {
        format!(
            "{}{:.2}",
            self.currency_code.symbol(),
            self.amount.round_dp(2)
        )
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// ISO 4217 currency codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    USD,
    EUR,
    GBP,
    CAD,
    AUD,
}

impl CurrencyCode {
    /// Display symbol for the currency.
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::USD | Self::CAD | Self::AUD => "$",
            Self::EUR => "€",
            Self::GBP => "£",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_price_rejected() {
        let result = Price::usd(Decimal::new(-1, 2));
        assert_eq!(result, Err(PriceError::Negative(Decimal::new(-1, 2))));
    }

    #[test]
    fn test_zero_price_allowed() {
        let price = Price::usd(Decimal::ZERO).unwrap();
        assert_eq!(price.display(), "$0.00");
    }

    #[test]
    fn test_display_pads_to_cents() {
        let price = Price::usd(Decimal::new(5, 0)).unwrap();
        assert_eq!(price.display(), "$5.00");

        let price = Price::new(Decimal::new(1250, 2), CurrencyCode::EUR).unwrap();
        assert_eq!(price.to_string(), "€12.50");
    }

    #[test]
    fn test_times_and_plus() {
        let price = Price::usd(Decimal::new(250, 2)).unwrap();
        let total = price.times(4).plus(Price::usd(Decimal::new(1, 0)).unwrap());
        assert_eq!(total.amount(), Decimal::new(11, 0));
    }
}
