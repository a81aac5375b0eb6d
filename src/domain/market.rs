use serde::{Deserialize, Serialize};

use super::order::{AssetId, MarketSlug};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub slug: MarketSlug,
    pub yes_asset_id: AssetId,
    pub no_asset_id: AssetId,
    pub condition_id: String,
    pub question: String,
    /// Cycle timestamp: when this market's trading window started, used as
    /// part of generation derivation (`tokenFromSlug`) and for audit.
    pub timestamp: i64,
}

/// Extracts the trailing integer after the last `-` in a market slug, used
/// by `TradingService::set_current_market` to derive a stable cross-restart
/// cycle token. Returns 0 if nothing parseable is found.
pub fn token_from_slug(slug: &str) -> i64 {
    slug.rsplit('-')
        .next()
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_trailing_integer() {
        assert_eq!(token_from_slug("x-15m-1000"), 1000);
        assert_eq!(token_from_slug("b-2000"), 2000);
    }

    #[test]
    fn falls_back_to_zero_when_not_parseable() {
        assert_eq!(token_from_slug("no-trailing-digits-here"), 0);
        assert_eq!(token_from_slug(""), 0);
    }
}
