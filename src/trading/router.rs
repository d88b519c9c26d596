/// Swap router: one call per swap, state machine
/// Quote -> (retry ladder) -> Build -> Sign -> Broadcast -> Confirm -> Reconstruct
///
/// Failures before broadcast are retried inside the aggregator tier ladder;
/// once a signature exists it is authoritative and only reconstruction may
/// be degraded. Buys of venue-marked mints with no aggregator route fall
/// back to the Pump.fun trade-local path.

use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::{FillReport, SwapStrategy, TradeError, TradeResult, PUMP_MINT_SUFFIX, WSOL_MINT};
use crate::oracle::PriceOracle;
use crate::trading::broadcaster::Broadcaster;
use crate::trading::chain::ChainReader;
use crate::trading::jupiter::JupiterRouter;
use crate::trading::pump::{reconstruct_buy_fill, PumpVenue};

pub struct SwapRouter {
    jupiter: JupiterRouter,
    venue: PumpVenue,
    broadcaster: Arc<Broadcaster>,
    keypair: Arc<Keypair>,
    oracle: Arc<PriceOracle>,
    venue_enabled: bool,
    force_venue: bool,
}

impl SwapRouter {
    pub fn new(
        jupiter: JupiterRouter,
        venue: PumpVenue,
        broadcaster: Arc<Broadcaster>,
        keypair: Arc<Keypair>,
        oracle: Arc<PriceOracle>,
        venue_enabled: bool,
        force_venue: bool,
    ) -> Self {
        Self {
            jupiter,
            venue,
            broadcaster,
            keypair,
            oracle,
            venue_enabled,
            force_venue,
        }
    }

    /// A mint qualifies for the venue path when fallback is enabled and the
    /// mint carries the venue marker (or fallback is forced).
    pub fn venue_eligible(&self, mint: &str) -> bool {
        self.venue_enabled && (self.force_venue || mint.ends_with(PUMP_MINT_SUFFIX))
    }

    /// Exact-in buy: WSOL -> mint. Aggregator tiers first; venue fallback
    /// when no route exists and the mint qualifies.
    pub async fn buy_exact_in(
        &self,
        mint: &str,
        lamports: u64,
        sol_amount: f64,
    ) -> TradeResult<FillReport> {
        match self.aggregator_swap(WSOL_MINT, mint, lamports).await {
            Ok(fill) => Ok(fill),
            Err(TradeError::NoRoute(msg)) if self.venue_eligible(mint) => {
                info!("no aggregator route for {mint}, taking venue fallback");
                self.venue_buy(mint, sol_amount).await.map_err(|e| {
                    warn!("venue fallback failed after no-route ({msg}): {e}");
                    e
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Exact-in sell: mint -> WSOL through the aggregator tiers.
    pub async fn sell_exact_in(&self, mint: &str, qty_atoms: u64) -> TradeResult<FillReport> {
        self.aggregator_swap(mint, WSOL_MINT, qty_atoms).await
    }

    /// Full-balance sell through the venue path; fill size is not
    /// reconstructed (the caller already knows the balance it sold).
    pub async fn venue_sell_all(&self, mint: &str) -> TradeResult<FillReport> {
        let tx = self.venue.build_sell_all(&self.keypair, mint).await?;
        let receipt = self.broadcaster.broadcast_and_confirm(&tx).await?;
        Ok(FillReport {
            signature: receipt.signature,
            received_atoms: None,
            decimals: None,
            price_usd: None,
            strategy: SwapStrategy::VenueFallback,
            endpoint_used: receipt.endpoint_used,
        })
    }

    async fn aggregator_swap(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
    ) -> TradeResult<FillReport> {
        let quote = self
            .jupiter
            .quote_exact_in(input_mint, output_mint, amount)
            .await?;
        let tx = self.jupiter.build_signed_swap(&quote, &self.keypair).await?;
        let receipt = self.broadcaster.broadcast_and_confirm(&tx).await?;

        Ok(FillReport {
            signature: receipt.signature,
            received_atoms: Some(quote.out_amount),
            decimals: None,
            price_usd: None,
            strategy: quote.strategy,
            endpoint_used: receipt.endpoint_used,
        })
    }

    async fn venue_buy(&self, mint: &str, sol_amount: f64) -> TradeResult<FillReport> {
        let tx = self.venue.build_buy(&self.keypair, mint, sol_amount).await?;
        let receipt = self.broadcaster.broadcast_and_confirm(&tx).await?;

        // Reconstruction reads the endpoint that confirmed the signature.
        let chain = ChainReader::new(&receipt.endpoint_used);
        let sol_usd = self.oracle.sol_usd().await;
        let owner = self.keypair.pubkey().to_string();
        let fill = reconstruct_buy_fill(
            &chain,
            &receipt.signature,
            &owner,
            mint,
            sol_amount,
            sol_usd,
        )
        .await;

        Ok(FillReport {
            signature: receipt.signature,
            received_atoms: fill.received_atoms,
            decimals: fill.decimals,
            price_usd: fill.price_usd,
            strategy: SwapStrategy::VenueFallback,
            endpoint_used: receipt.endpoint_used,
        })
    }
}
