/// Pump.fun venue fallback
///
/// For buys of venue-marked mints the aggregator cannot route yet, the
/// trade-local endpoint returns a pre-built transaction we sign and
/// broadcast like any other. Because the venue gives no fill data, the fill
/// is reconstructed after confirmation from the confirming endpoint's
/// transaction meta (pre/post token balances), falling back to a token
/// account poll when the meta is not indexed yet.

use reqwest::Client;
use serde_json::{json, Value};
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::{TradeError, TradeResult};
use crate::trading::chain::{owner_mint_delta, ChainReader};

const TRADE_LOCAL_URL: &str = "https://pumpportal.fun/api/trade-local";
const VENUE_TIMEOUT_SECS: u64 = 10;
const META_ATTEMPTS: usize = 4;
const META_WAIT_MS: u64 = 750;

#[derive(Debug, Clone)]
pub struct VenueTradeParams {
    pub slippage_percent: f64,
    pub priority_fee_sol: f64,
    pub pool: String,
}

/// Reconstructed venue fill
#[derive(Debug, Clone, Default)]
pub struct VenueFill {
    pub received_atoms: Option<u64>,
    pub decimals: Option<u8>,
    pub price_usd: Option<f64>,
}

pub struct PumpVenue {
    http: Client,
    params: VenueTradeParams,
}

impl PumpVenue {
    pub fn new(params: VenueTradeParams) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(VENUE_TIMEOUT_SECS))
                .build()
                .expect("venue http client"),
            params,
        }
    }

    /// Pre-built buy transaction, signed and ready to broadcast.
    pub async fn build_buy(
        &self,
        keypair: &Keypair,
        mint: &str,
        sol_amount: f64,
    ) -> TradeResult<VersionedTransaction> {
        self.trade_local(keypair, "buy", mint, json!(sol_amount), true)
            .await
    }

    /// Pre-built sell of the full balance ("100%"), signed.
    pub async fn build_sell_all(
        &self,
        keypair: &Keypair,
        mint: &str,
    ) -> TradeResult<VersionedTransaction> {
        self.trade_local(keypair, "sell", mint, json!("100%"), false)
            .await
    }

    async fn trade_local(
        &self,
        keypair: &Keypair,
        action: &str,
        mint: &str,
        amount: Value,
        denominated_in_sol: bool,
    ) -> TradeResult<VersionedTransaction> {
        let payload = json!({
            "publicKey": keypair.pubkey().to_string(),
            "action": action,
            "mint": mint,
            "amount": amount,
            "denominatedInSol": denominated_in_sol.to_string(),
            "slippage": self.params.slippage_percent,
            "priorityFee": self.params.priority_fee_sol,
            "pool": self.params.pool,
        });

        let resp = self
            .http
            .post(TRADE_LOCAL_URL)
            .json(&payload)
            .send()
            .await
            .map_err(TradeError::from)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TradeError::from_http(status, &body));
        }

        // trade-local answers with raw transaction bytes
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TradeError::Transient(format!("venue tx body: {e}")))?;
        let unsigned: VersionedTransaction = bincode::deserialize(&bytes)
            .map_err(|e| TradeError::Transient(format!("venue tx deserialize: {e}")))?;
        VersionedTransaction::try_new(unsigned.message, &[keypair])
            .map_err(|e| TradeError::Transient(format!("venue tx sign: {e}")))
    }
}

/// Rebuild the fill for a confirmed venue buy.
///
/// Meta is read on the endpoint that confirmed the signature; if it is not
/// indexed after the retry ladder, the wallet's parsed token accounts are
/// polled instead. `received_atoms` stays None only when both paths come up
/// empty — the signature is still authoritative.
pub async fn reconstruct_buy_fill(
    chain: &ChainReader,
    signature: &str,
    owner: &str,
    mint: &str,
    sol_sent: f64,
    sol_usd: Option<f64>,
) -> VenueFill {
    let mut received: Option<u64> = None;
    let mut decimals: Option<u8> = None;

    for attempt in 0..META_ATTEMPTS {
        match chain.transaction_meta(signature).await {
            Ok(Some(meta)) => {
                let (r, d) = owner_mint_delta(&meta, owner, mint);
                received = r;
                decimals = d;
                break;
            }
            Ok(None) => debug!("meta not indexed yet for {signature} (attempt {attempt})"),
            Err(e) => debug!("meta read failed for {signature}: {e}"),
        }
        tokio::time::sleep(Duration::from_millis(META_WAIT_MS)).await;
    }

    if received.is_none() {
        match chain.largest_balance(owner, mint).await {
            Ok(Some(balance)) => {
                received = Some(balance.atoms);
                decimals = Some(balance.decimals);
            }
            Ok(None) => warn!("venue fill for {mint} not visible after balance poll"),
            Err(e) => warn!("venue balance poll failed for {mint}: {e}"),
        }
    }

    let price_usd = match (received, decimals, sol_usd) {
        (Some(atoms), Some(d), Some(rate)) => fill_implied_price(atoms, d, sol_sent, rate),
        _ => None,
    };

    VenueFill {
        received_atoms: received,
        decimals,
        price_usd,
    }
}

/// entry price = (SOL-USD x SOL sent) / UI tokens received
pub fn fill_implied_price(atoms: u64, decimals: u8, sol_sent: f64, sol_usd: f64) -> Option<f64> {
    if atoms == 0 {
        return None;
    }
    let ui = atoms as f64 / 10f64.powi(decimals as i32);
    let price = (sol_usd * sol_sent) / ui;
    (price.is_finite() && price > 0.0).then_some(price)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_implied_price() {
        // 0.05 SOL at $200 for 100 tokens (1e8 atoms, 6 decimals) -> $0.10
        let price = fill_implied_price(100_000_000, 6, 0.05, 200.0).unwrap();
        assert!((price - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_fill_implied_price_zero_atoms_is_none() {
        assert!(fill_implied_price(0, 6, 0.05, 200.0).is_none());
    }

    #[test]
    fn test_venue_fill_defaults_to_degraded() {
        let fill = VenueFill::default();
        assert!(fill.received_atoms.is_none());
        assert!(fill.price_usd.is_none());
    }
}
