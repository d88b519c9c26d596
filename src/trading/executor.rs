/// Trade executor
///
/// Orchestrates buys and sells over the swap router. All trade calls
/// serialize through a process-wide throttle with jitter; paper mode
/// synthesizes fills from oracle prices and never touches the network.

use rand::Rng;
use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::core::{
    now_ms, sol_to_lamports, BuySignal, FillReport, SwapStrategy, TradeError, TradeMode,
    TradeResult,
};
use crate::oracle::{PriceHints, PriceOracle};
use crate::trading::broadcaster::Broadcaster;
use crate::trading::chain::ChainReader;
use crate::trading::router::SwapRouter;

/// Synthesized paper fills assume this many decimals
const PAPER_DECIMALS: u8 = 6;
const THROTTLE_JITTER_MS: u64 = 250;

/// Process-wide minimum inter-trade interval. Callers hold the lock through
/// the wait, which is what serializes the gate.
pub struct TradeThrottle {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl TradeThrottle {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval: Duration::from_millis(min_interval_ms),
            last: Mutex::new(None),
        }
    }

    pub async fn pace(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..THROTTLE_JITTER_MS));
            let next_at = prev + self.min_interval + jitter;
            let now = Instant::now();
            if next_at > now {
                tokio::time::sleep(next_at - now).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Clone, Default)]
pub struct SellRequest {
    pub mint: String,
    /// Atoms to sell; resolved from the chain when absent
    pub qty_atoms: Option<u64>,
    pub sell_all: bool,
    /// Percent of the balance to sell when not selling all
    pub percent: Option<f64>,
}

pub struct Executor {
    cfg: Arc<Config>,
    keypair: Arc<Keypair>,
    router: Arc<SwapRouter>,
    oracle: Arc<PriceOracle>,
    broadcaster: Arc<Broadcaster>,
    throttle: TradeThrottle,
}

impl Executor {
    pub fn new(
        cfg: Arc<Config>,
        keypair: Arc<Keypair>,
        router: Arc<SwapRouter>,
        oracle: Arc<PriceOracle>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        let throttle = TradeThrottle::new(cfg.min_trade_interval_ms);
        Self {
            cfg,
            keypair,
            router,
            oracle,
            broadcaster,
            throttle,
        }
    }

    pub fn operator(&self) -> String {
        self.keypair.pubkey().to_string()
    }

    /// Mirror a buy signal: convert the configured SOL size to lamports and
    /// swap exact-in for the mint. The entry price comes from the fill when
    /// the venue path reconstructed one, otherwise from the oracle.
    #[instrument(skip(self, signal), fields(mint = %signal.mint))]
    pub async fn execute_buy(&self, signal: &BuySignal) -> TradeResult<FillReport> {
        if self.cfg.trade_mode == TradeMode::Paper {
            return self.paper_buy(signal).await;
        }

        self.throttle.pace().await;

        let lamports = sol_to_lamports(self.cfg.buy_sol_amount);
        let mut fill = self
            .router
            .buy_exact_in(&signal.mint, lamports, self.cfg.buy_sol_amount)
            .await?;

        if fill.price_usd.is_none() {
            let hints = PriceHints {
                amount: Some(signal.amount as f64),
                sol_spent: signal.sol_spent,
            };
            fill.price_usd = self
                .oracle
                .spot_price_usd(&signal.mint, hints)
                .await
                .map(|q| q.price_usd);
        }

        info!(
            "🟢 buy filled | mint={} sig={} strategy={}",
            signal.mint, fill.signature, fill.strategy
        );
        Ok(fill)
    }

    /// Exit a position. Venue-marked mints try the venue's full-balance sell
    /// first and fall through to the aggregator; rate-limit failures are
    /// annotated as such on the way down.
    #[instrument(skip(self, req), fields(mint = %req.mint))]
    pub async fn execute_sell(&self, req: &SellRequest) -> TradeResult<FillReport> {
        if self.cfg.trade_mode == TradeMode::Paper {
            return self.paper_sell(req).await;
        }

        self.throttle.pace().await;

        if self.router.venue_eligible(&req.mint) {
            match self.router.venue_sell_all(&req.mint).await {
                Ok(mut fill) => {
                    fill.received_atoms = fill.received_atoms.or(req.qty_atoms);
                    info!("🔴 venue sell filled | mint={} sig={}", req.mint, fill.signature);
                    return Ok(fill);
                }
                Err(TradeError::RateLimit(msg)) => {
                    warn!("venue sell rate-limited for {}: {msg}; trying aggregator", req.mint);
                }
                Err(e) => {
                    warn!("venue sell failed for {}: {e}; trying aggregator", req.mint);
                }
            }
        }

        let qty = self.resolve_sell_qty(req).await?;
        if qty == 0 {
            return Err(TradeError::NoBalance(req.mint.clone()));
        }

        let fill = self.router.sell_exact_in(&req.mint, qty).await?;
        info!(
            "🔴 sell filled | mint={} qty={} sig={}",
            req.mint, qty, fill.signature
        );
        Ok(fill)
    }

    /// On-chain balance for the signer and a mint; paper positions have no
    /// chain footprint so the watcher passes its own quantity instead.
    pub async fn wallet_balance_atoms(&self, mint: &str) -> TradeResult<u64> {
        let chain = ChainReader::new(&self.broadcaster.endpoints()[0]);
        let owner = self.operator();
        Ok(chain
            .wallet_balance(&owner, mint)
            .await?
            .map(|b| b.atoms)
            .unwrap_or(0))
    }

    async fn resolve_sell_qty(&self, req: &SellRequest) -> TradeResult<u64> {
        if let Some(qty) = req.qty_atoms {
            return Ok(apply_percent(qty, req.sell_all, req.percent));
        }

        let chain = ChainReader::new(&self.broadcaster.endpoints()[0]);
        let owner = self.operator();
        let balance = chain
            .largest_balance(&owner, &req.mint)
            .await?
            .map(|b| b.atoms)
            .unwrap_or(0);
        if balance == 0 {
            return Err(TradeError::NoBalance(req.mint.clone()));
        }
        Ok(apply_percent(balance, req.sell_all, req.percent))
    }

    async fn paper_buy(&self, signal: &BuySignal) -> TradeResult<FillReport> {
        let hints = PriceHints {
            amount: Some(signal.amount as f64),
            sol_spent: signal.sol_spent,
        };
        let quote = self
            .oracle
            .spot_price_usd(&signal.mint, hints)
            .await
            .ok_or_else(|| TradeError::Transient("paper fill needs an oracle price".into()))?;
        let sol_usd = self
            .oracle
            .sol_usd()
            .await
            .ok_or_else(|| TradeError::Transient("paper fill needs SOL-USD".into()))?;

        let tokens_ui = self.cfg.buy_sol_amount * sol_usd / quote.price_usd;
        let atoms = (tokens_ui * 10f64.powi(PAPER_DECIMALS as i32)).round() as u64;

        info!(
            "📝 paper buy | mint={} price={} tokens={tokens_ui:.4}",
            signal.mint, quote.price_usd
        );
        Ok(FillReport {
            signature: format!("paper-buy-{}", now_ms()),
            received_atoms: Some(atoms),
            decimals: Some(PAPER_DECIMALS),
            price_usd: Some(quote.price_usd),
            strategy: SwapStrategy::Paper,
            endpoint_used: "paper".to_string(),
        })
    }

    async fn paper_sell(&self, req: &SellRequest) -> TradeResult<FillReport> {
        let quote = self
            .oracle
            .spot_price_usd(&req.mint, PriceHints::default())
            .await
            .ok_or_else(|| TradeError::Transient("paper fill needs an oracle price".into()))?;

        info!("📝 paper sell | mint={} price={}", req.mint, quote.price_usd);
        Ok(FillReport {
            signature: format!("paper-sell-{}", now_ms()),
            received_atoms: req.qty_atoms,
            decimals: Some(PAPER_DECIMALS),
            price_usd: Some(quote.price_usd),
            strategy: SwapStrategy::Paper,
            endpoint_used: "paper".to_string(),
        })
    }
}

fn apply_percent(balance: u64, sell_all: bool, percent: Option<f64>) -> u64 {
    if sell_all {
        return balance;
    }
    match percent {
        Some(p) if p > 0.0 && p < 100.0 => ((balance as f64) * p / 100.0).floor() as u64,
        _ => balance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_percent() {
        assert_eq!(apply_percent(1_000, true, Some(50.0)), 1_000);
        assert_eq!(apply_percent(1_000, false, Some(50.0)), 500);
        assert_eq!(apply_percent(1_000, false, None), 1_000);
        assert_eq!(apply_percent(1_000, false, Some(0.0)), 1_000);
        assert_eq!(apply_percent(1_000, false, Some(150.0)), 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_enforces_min_interval() {
        let throttle = TradeThrottle::new(1_500);

        let start = Instant::now();
        throttle.pace().await;
        throttle.pace().await;
        let elapsed = start.elapsed();

        // Second call must wait at least the interval (jitter adds to it)
        assert!(elapsed >= Duration::from_millis(1_500), "elapsed {elapsed:?}");
    }
}
