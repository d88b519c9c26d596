/// Spot USD price oracle
///
/// Source order per lookup:
/// 1. Primary: Jupiter price API for the mint
/// 2. Derived: fill-implied price from (sol_spent / amount) x SOL-USD when
///    the caller supplies both — covers mints the oracle has not listed yet
/// 3. Secondary: DexScreener pair price when the fallback is enabled
///
/// Every path is best-effort with a short timeout and returns None instead
/// of throwing.

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::Config;
use crate::core::WSOL_MINT;

const PROVIDER_TIMEOUT_MS: u64 = 2_500;
const SOL_CACHE_SECS: u64 = 30;
const DEXSCREENER_API: &str = "https://api.dexscreener.com/latest/dex/tokens";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Primary,
    Derived,
    Secondary,
}

#[derive(Debug, Clone)]
pub struct PriceQuote {
    pub price_usd: f64,
    pub source: PriceSource,
}

/// Optional hints enabling the derived price path
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceHints {
    /// Token amount from the triggering event (UI-normalized)
    pub amount: Option<f64>,
    /// SOL the origin wallet spent acquiring that amount
    pub sol_spent: Option<f64>,
}

pub struct PriceOracle {
    http: Client,
    price_url: String,
    dexscreener_fallback: bool,
    sol_cache: Mutex<Option<(f64, Instant)>>,
}

#[derive(Deserialize)]
struct DexScreenerPairs {
    pairs: Option<Vec<DexScreenerPair>>,
}

#[derive(Deserialize)]
struct DexScreenerPair {
    #[serde(rename = "priceUsd")]
    price_usd: Option<String>,
}

impl PriceOracle {
    pub fn new(cfg: &Config) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_millis(PROVIDER_TIMEOUT_MS))
                .build()
                .expect("oracle http client"),
            price_url: cfg.jupiter_price_url.clone(),
            dexscreener_fallback: cfg.dexscreener_fallback,
            sol_cache: Mutex::new(None),
        }
    }

    /// Spot USD price for a mint, or None when every source came up dry.
    pub async fn spot_price_usd(&self, mint: &str, hints: PriceHints) -> Option<PriceQuote> {
        if let Some(price) = self.fetch_primary(mint).await {
            return Some(PriceQuote {
                price_usd: price,
                source: PriceSource::Primary,
            });
        }

        if let (Some(amount), Some(sol_spent)) = (hints.amount, hints.sol_spent) {
            if amount > 0.0 && sol_spent > 0.0 {
                if let Some(sol_usd) = self.sol_usd().await {
                    let price = derived_price(sol_spent, amount, sol_usd);
                    if price.is_finite() && price > 0.0 {
                        debug!("derived price for {mint}: {price}");
                        return Some(PriceQuote {
                            price_usd: price,
                            source: PriceSource::Derived,
                        });
                    }
                }
            }
        }

        if self.dexscreener_fallback {
            if let Some(price) = self.fetch_dexscreener(mint).await {
                return Some(PriceQuote {
                    price_usd: price,
                    source: PriceSource::Secondary,
                });
            }
        }

        None
    }

    /// SOL-USD via the primary provider, cached briefly.
    pub async fn sol_usd(&self) -> Option<f64> {
        {
            let cache = self.sol_cache.lock().unwrap();
            if let Some((rate, at)) = *cache {
                if at.elapsed().as_secs() < SOL_CACHE_SECS {
                    return Some(rate);
                }
            }
        }

        let rate = self.fetch_primary(WSOL_MINT).await?;
        *self.sol_cache.lock().unwrap() = Some((rate, Instant::now()));
        Some(rate)
    }

    async fn fetch_primary(&self, mint: &str) -> Option<f64> {
        let url = format!("{}?ids={}", self.price_url, mint);
        let resp = self.http.get(&url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let data: Value = resp.json().await.ok()?;
        let price = data.get(mint)?.get("usdPrice")?.as_f64()?;
        (price.is_finite() && price > 0.0).then_some(price)
    }

    async fn fetch_dexscreener(&self, mint: &str) -> Option<f64> {
        let url = format!("{DEXSCREENER_API}/{mint}");
        let resp = self.http.get(&url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let data: DexScreenerPairs = resp.json().await.ok()?;
        let price: f64 = data
            .pairs?
            .first()?
            .price_usd
            .as_deref()?
            .parse()
            .ok()?;
        (price.is_finite() && price > 0.0).then_some(price)
    }
}

/// Fill-implied token price: SOL paid per token, converted to USD.
pub fn derived_price(sol_spent: f64, amount: f64, sol_usd: f64) -> f64 {
    (sol_spent / amount) * sol_usd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_price_math() {
        // 0.5 SOL for 1000 tokens at $200/SOL -> $0.10 per token
        let price = derived_price(0.5, 1_000.0, 200.0);
        assert!((price - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_derived_price_degenerate_amount_is_not_finite() {
        let price = derived_price(0.5, 0.0, 200.0);
        assert!(!price.is_finite());
    }
}
