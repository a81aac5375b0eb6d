use std::fmt;

/// Fixed-point price in pips: `10000` pips == `1.0`.
///
/// Prediction-market prices are probabilities in `[0.0, 1.0]`; pips give an
/// exact integer representation so order matching and fill arithmetic never
/// drift the way floating point would across thousands of partial fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Price(pub i32);

pub const PIPS_PER_UNIT: i32 = 10_000;
pub const MAX_PRICE_PIPS: i32 = 10_000;
pub const MIN_PRICE_PIPS: i32 = 0;

impl Price {
    pub const ZERO: Price = Price(0);
    pub const ONE: Price = Price(PIPS_PER_UNIT);

    pub fn from_pips(pips: i32) -> Self {
        Price(pips.clamp(MIN_PRICE_PIPS, MAX_PRICE_PIPS))
    }

    /// Builds a `Price` from a decimal dollar value (e.g. `0.50` -> 5000 pips).
    /// Rounds to the nearest pip.
    pub fn from_decimal(value: f64) -> Self {
        let pips = (value * PIPS_PER_UNIT as f64).round() as i32;
        Price::from_pips(pips)
    }

    /// Builds a `Price` from a whole-cent value (e.g. `50` cents -> 5000 pips).
    pub fn from_cents(cents: i32) -> Self {
        Price::from_pips(cents * 100)
    }

    pub fn as_decimal(self) -> f64 {
        self.0 as f64 / PIPS_PER_UNIT as f64
    }

    pub fn as_cents(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_valid(self) -> bool {
        (MIN_PRICE_PIPS..=MAX_PRICE_PIPS).contains(&self.0)
    }

    /// `1.0 - self`, the complementary outcome's price on a binary market.
    pub fn complement(self) -> Price {
        Price(PIPS_PER_UNIT - self.0)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.as_decimal())
    }
}

impl std::ops::Add for Price {
    type Output = Price;
    fn add(self, rhs: Price) -> Price {
        Price(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Price {
    type Output = Price;
    fn sub(self, rhs: Price) -> Price {
        Price(self.0 - rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_round_trip() {
        let p = Price::from_decimal(0.50);
        assert_eq!(p.0, 5000);
        assert_eq!(p.as_decimal(), 0.50);
    }

    #[test]
    fn clamps_out_of_range() {
        assert_eq!(Price::from_pips(-10).0, 0);
        assert_eq!(Price::from_pips(20_000).0, MAX_PRICE_PIPS);
    }

    #[test]
    fn cents_conversion() {
        assert_eq!(Price::from_cents(60).0, 6000);
        assert_eq!(Price::from_cents(1).0, 100);
    }

    #[test]
    fn complement_sums_to_one() {
        let p = Price::from_cents(65);
        assert_eq!((p + p.complement()).0, PIPS_PER_UNIT);
    }

    #[test]
    fn weighted_average_pip_precision() {
        // 4@0.50 + 6@0.52 -> 0.512 -> 5120 pips
        let total_size = 10.0;
        let weighted = (4.0 * 0.50 + 6.0 * 0.52) / total_size;
        assert_eq!(Price::from_decimal(weighted).0, 5120);
    }
}
