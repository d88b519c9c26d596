/// Jupiter aggregator client: tiered quoting + swap transaction build
///
/// Quote tiers, first non-empty wins:
/// 1. direct-preferred — single-hop routes only
/// 2. any-route        — multi-hop allowed
/// 3. bridge           — intermediates restricted to WSOL + USDC
/// The whole ladder is retried up to 3 rounds with linear backoff so a
/// freshly indexed pool gets a chance to appear.

use base64::Engine as _;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::PriorityFee;
use crate::core::{RouteQuote, SwapStrategy, TradeError, TradeResult};

const QUOTE_TIMEOUT_SECS: u64 = 8;
const LADDER_ROUNDS: usize = 3;
const LADDER_BACKOFF_MS: u64 = 500;

/// Fallback compute-unit price when auto sampling fails
const DEFAULT_CU_PRICE_MICRO_LAMPORTS: u64 = 5_000;

#[derive(Debug, Clone, Copy)]
enum QuoteTier {
    DirectPreferred,
    AnyRoute,
    Bridge,
}

impl QuoteTier {
    const LADDER: [QuoteTier; 3] = [
        QuoteTier::DirectPreferred,
        QuoteTier::AnyRoute,
        QuoteTier::Bridge,
    ];

    fn strategy(self) -> SwapStrategy {
        match self {
            QuoteTier::DirectPreferred => SwapStrategy::DirectPreferred,
            QuoteTier::AnyRoute => SwapStrategy::AnyRoute,
            QuoteTier::Bridge => SwapStrategy::Bridge,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapBuildRequest<'a> {
    quote_response: &'a Value,
    user_public_key: String,
    wrap_and_unwrap_sol: bool,
    dynamic_compute_unit_limit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    compute_unit_price_micro_lamports: Option<u64>,
}

pub struct JupiterRouter {
    http: Client,
    base_url: String,
    slippage_bps: u16,
    priority_fee: PriorityFee,
    /// RPC used only for prioritization-fee sampling
    rpc: Arc<RpcClient>,
}

impl JupiterRouter {
    pub fn new(
        base_url: String,
        slippage_bps: u16,
        priority_fee: PriorityFee,
        rpc: Arc<RpcClient>,
    ) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(QUOTE_TIMEOUT_SECS))
                .build()
                .expect("jupiter http client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            slippage_bps,
            priority_fee,
            rpc,
        }
    }

    /// Resolve an exact-in quote through the tier ladder.
    pub async fn quote_exact_in(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
    ) -> TradeResult<RouteQuote> {
        let mut last_err: Option<TradeError> = None;

        for round in 0..LADDER_ROUNDS {
            for tier in QuoteTier::LADDER {
                match self.quote_tier(tier, input_mint, output_mint, amount).await {
                    Ok(quote) => return Ok(quote),
                    Err(e) => {
                        debug!("quote {:?} round {round} failed: {e}", tier.strategy());
                        last_err = Some(e);
                    }
                }
            }
            if round + 1 < LADDER_ROUNDS {
                tokio::time::sleep(Duration::from_millis(
                    LADDER_BACKOFF_MS * (round as u64 + 1),
                ))
                .await;
            }
        }

        Err(last_err.unwrap_or_else(|| {
            TradeError::NoRoute(format!("no quote for {input_mint} -> {output_mint}"))
        }))
    }

    async fn quote_tier(
        &self,
        tier: QuoteTier,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
    ) -> TradeResult<RouteQuote> {
        let amount_str = amount.to_string();
        let slippage_str = self.slippage_bps.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("inputMint", input_mint),
            ("outputMint", output_mint),
            ("amount", &amount_str),
            ("slippageBps", &slippage_str),
        ];
        match tier {
            QuoteTier::DirectPreferred => params.push(("onlyDirectRoutes", "true")),
            QuoteTier::AnyRoute => {}
            QuoteTier::Bridge => params.push(("restrictIntermediateTokens", "true")),
        }

        let url = format!("{}/quote", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(TradeError::from)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TradeError::from_http(status, &body));
        }

        let raw: Value = resp
            .json()
            .await
            .map_err(|e| TradeError::Transient(format!("quote decode: {e}")))?;

        parse_quote(raw, tier.strategy())
    }

    /// Build the unsigned swap transaction for a resolved quote and sign it.
    pub async fn build_signed_swap(
        &self,
        quote: &RouteQuote,
        keypair: &Keypair,
    ) -> TradeResult<VersionedTransaction> {
        let cu_price = self.compute_unit_price().await;

        let request = SwapBuildRequest {
            quote_response: &quote.raw,
            user_public_key: keypair.pubkey().to_string(),
            wrap_and_unwrap_sol: true,
            dynamic_compute_unit_limit: true,
            compute_unit_price_micro_lamports: Some(cu_price),
        };

        let url = format!("{}/swap", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(TradeError::from)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TradeError::from_http(status, &body));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| TradeError::Transient(format!("swap decode: {e}")))?;
        let encoded = body
            .get("swapTransaction")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TradeError::Transient("swap response missing transaction".into()))?;

        sign_swap_transaction(encoded, keypair)
    }

    /// Compute-unit price in micro-lamports: the configured override, or the
    /// 75th percentile of recent prioritization fees reported by RPC.
    async fn compute_unit_price(&self) -> u64 {
        match self.priority_fee {
            PriorityFee::Fixed(v) => v,
            PriorityFee::Auto => match self.rpc.get_recent_prioritization_fees(&[]).await {
                Ok(fees) => {
                    let sample: Vec<u64> =
                        fees.iter().map(|f| f.prioritization_fee).collect();
                    percentile(sample, 0.75).unwrap_or(DEFAULT_CU_PRICE_MICRO_LAMPORTS)
                }
                Err(e) => {
                    warn!("prioritization fee sample failed, using default: {e}");
                    DEFAULT_CU_PRICE_MICRO_LAMPORTS
                }
            },
        }
    }
}

fn parse_quote(raw: Value, strategy: SwapStrategy) -> TradeResult<RouteQuote> {
    let in_amount = raw
        .get("inAmount")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TradeError::NoRoute("quote missing inAmount".into()))?;
    let out_amount = raw
        .get("outAmount")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TradeError::NoRoute("quote missing outAmount".into()))?;
    let price_impact_pct = raw
        .get("priceImpactPct")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok());
    let context_slot = raw.get("contextSlot").and_then(|v| v.as_u64());

    Ok(RouteQuote {
        in_amount,
        out_amount,
        price_impact_pct,
        strategy,
        context_slot,
        raw,
    })
}

/// Deserialize a base64 VersionedTransaction and re-sign its message with
/// our keypair.
pub fn sign_swap_transaction(
    encoded: &str,
    keypair: &Keypair,
) -> TradeResult<VersionedTransaction> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| TradeError::Transient(format!("tx base64: {e}")))?;
    let unsigned: VersionedTransaction = bincode::deserialize(&bytes)
        .map_err(|e| TradeError::Transient(format!("tx deserialize: {e}")))?;
    VersionedTransaction::try_new(unsigned.message, &[keypair])
        .map_err(|e| TradeError::Transient(format!("tx sign: {e}")))
}

/// Nearest-rank percentile over an unsorted sample.
fn percentile(mut sample: Vec<u64>, p: f64) -> Option<u64> {
    if sample.is_empty() {
        return None;
    }
    sample.sort_unstable();
    let rank = ((sample.len() as f64) * p).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sample.len() - 1);
    Some(sample[idx])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_percentile_p75() {
        let sample = vec![10, 20, 30, 40, 50, 60, 70, 80];
        assert_eq!(percentile(sample, 0.75), Some(60));
    }

    #[test]
    fn test_percentile_single_and_empty() {
        assert_eq!(percentile(vec![42], 0.75), Some(42));
        assert_eq!(percentile(vec![], 0.75), None);
    }

    #[test]
    fn test_parse_quote_extracts_amounts() {
        let raw = json!({
            "inAmount": "50000000",
            "outAmount": "123456789",
            "priceImpactPct": "0.12",
            "contextSlot": 321u64,
            "routePlan": []
        });
        let quote = parse_quote(raw, SwapStrategy::AnyRoute).unwrap();
        assert_eq!(quote.in_amount, 50_000_000);
        assert_eq!(quote.out_amount, 123_456_789);
        assert_eq!(quote.price_impact_pct, Some(0.12));
        assert_eq!(quote.context_slot, Some(321));
        assert_eq!(quote.strategy, SwapStrategy::AnyRoute);
    }

    #[test]
    fn test_parse_quote_without_out_amount_is_no_route() {
        let err = parse_quote(json!({"inAmount": "1"}), SwapStrategy::Bridge).unwrap_err();
        assert!(matches!(err, TradeError::NoRoute(_)));
    }
}
