/// Event router: webhook events -> buy signals -> opened positions
///
/// `handle_event` is idempotent and never blocks on a mint that already has
/// a pending buy: an open position or an in-flight claim skips the signal.
/// The in-flight claim spans the whole buy -> open-position -> start-watcher
/// sequence and is released on every exit path.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::core::{now_ms, BuySignal, ClosedPosition, OpenPosition, TradeMode, REASON_MANUAL};
use crate::detector::{detect_buys, EnhancedTransaction};
use crate::notify::Notifier;
use crate::store::{PositionStore, SeenCache};
use crate::trading::{Executor, SellRequest};
use crate::wallets::TrackedWallets;
use crate::watcher::Watchers;

pub struct Pipeline {
    cfg: Arc<Config>,
    seen: Arc<SeenCache>,
    positions: Arc<PositionStore>,
    executor: Arc<Executor>,
    watchers: Arc<Watchers>,
    notifier: Notifier,
    tracked: Arc<TrackedWallets>,
    /// Mints with a pending buy-open sequence
    in_flight: DashMap<String, ()>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<Config>,
        seen: Arc<SeenCache>,
        positions: Arc<PositionStore>,
        executor: Arc<Executor>,
        watchers: Arc<Watchers>,
        notifier: Notifier,
        tracked: Arc<TrackedWallets>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            seen,
            positions,
            executor,
            watchers,
            notifier,
            tracked,
            in_flight: DashMap::new(),
        })
    }

    /// Process one pushed enhanced transaction. Signals from the same event
    /// are handled in emission order; failures never propagate to the
    /// webhook response.
    #[instrument(skip(self, tx), fields(sig = %tx.signature))]
    pub async fn handle_event(self: &Arc<Self>, tx: &EnhancedTransaction) {
        let tracked = self.tracked.snapshot();
        let signals = detect_buys(tx, &tracked, &self.seen, &self.cfg);

        for signal in signals {
            self.handle_signal(signal).await;
        }
    }

    async fn handle_signal(self: &Arc<Self>, signal: BuySignal) {
        info!(
            "🔔 buy signal | wallet={} mint={} tx={}",
            signal.wallet, signal.mint, signal.signature
        );

        // Best-effort notice; never gates the trade
        self.notifier.signal_detected(&signal).await;

        if !self.claim_mint(&signal.mint) {
            info!("mint {} already open or in flight, skipping", signal.mint);
            return;
        }

        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.open_from_signal(signal).await;
        });
    }

    /// Claim the mint for a buy-open sequence. False when a position is
    /// already open or another buy is pending.
    fn claim_mint(&self, mint: &str) -> bool {
        if self.positions.has_open(mint) {
            return false;
        }
        match self.in_flight.entry(mint.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(());
                true
            }
        }
    }

    fn release_mint(&self, mint: &str) {
        self.in_flight.remove(mint);
    }

    /// The spawned buy task: execute, persist, start the watcher, announce.
    /// Exactly one entry notice goes out, from here, after persistence.
    async fn open_from_signal(self: Arc<Self>, signal: BuySignal) {
        let mint = signal.mint.clone();

        match self.executor.execute_buy(&signal).await {
            Ok(fill) => {
                let position = OpenPosition {
                    mint: mint.clone(),
                    origin_wallet: signal.wallet.clone(),
                    entry_price_usd: fill.price_usd,
                    qty_atoms: fill.received_atoms,
                    decimals: fill.decimals,
                    sol_spent: Some(self.cfg.buy_sol_amount),
                    ts_open: now_ms(),
                    source_tx: fill.signature,
                    mode: self.cfg.trade_mode,
                    strategy: fill.strategy,
                };

                self.positions.open_position(position.clone());
                self.watchers.start(&mint);
                self.notifier.position_opened(&position).await;
            }
            Err(e) => {
                warn!("buy for {mint} failed: {e}");
            }
        }

        self.release_mint(&mint);
    }

    /// Admin-requested full exit with reason `manual`.
    pub async fn close_manual(&self, mint: &str) -> anyhow::Result<ClosedPosition> {
        let position = self
            .positions
            .get(mint)
            .ok_or_else(|| anyhow::anyhow!("no open position for {mint}"))?;

        let balance = if position.mode == TradeMode::Paper {
            position.qty_atoms.unwrap_or(0)
        } else {
            self.executor.wallet_balance_atoms(mint).await?
        };

        let exit = if balance > 0 {
            let fill = self
                .executor
                .execute_sell(&SellRequest {
                    mint: mint.to_string(),
                    qty_atoms: Some(balance),
                    sell_all: true,
                    percent: None,
                })
                .await?;
            (fill.price_usd, Some(fill.signature))
        } else {
            (None, None)
        };

        self.watchers.stop(mint);
        let closed = self
            .positions
            .close_position(mint, exit.0, exit.1, REASON_MANUAL)
            .ok_or_else(|| anyhow::anyhow!("position for {mint} vanished during close"))?;
        self.notifier.position_closed(&closed).await;
        Ok(closed)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{test_config, Config};
    use crate::core::SwapStrategy;
    use crate::oracle::PriceOracle;
    use crate::store::{PositionStore, SeenCache};
    use crate::trading::{
        Broadcaster, Executor, JupiterRouter, PumpVenue, SwapRouter, VenueTradeParams,
    };
    use std::path::PathBuf;

    fn temp(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("shadow-pipeline-{name}-{}.json", std::process::id()))
    }

    /// Fully wired pipeline with no network traffic issued at build time.
    fn offline_pipeline(name: &str) -> Arc<Pipeline> {
        let cfg = Arc::new(test_config());
        build_pipeline(cfg, name)
    }

    fn build_pipeline(cfg: Arc<Config>, name: &str) -> Arc<Pipeline> {
        let seen = Arc::new(SeenCache::load(temp(&format!("{name}-seen"))));
        let positions = Arc::new(PositionStore::load(temp(&format!("{name}-pos"))));
        let keypair = Arc::new(cfg.load_keypair().unwrap());
        let oracle = Arc::new(PriceOracle::new(&cfg));
        let broadcaster =
            Arc::new(Broadcaster::new(&cfg.rpc_endpoints, cfg.broadcast_max_wait_ms).unwrap());
        let jupiter = JupiterRouter::new(
            cfg.jupiter_base_url.clone(),
            cfg.jup_slippage_bps,
            cfg.jup_priority_fee,
            broadcaster.primary(),
        );
        let venue = PumpVenue::new(VenueTradeParams {
            slippage_percent: cfg.pump_slippage_bps as f64 / 100.0,
            priority_fee_sol: cfg.pump_priority_fee_sol,
            pool: cfg.pump_pool.clone(),
        });
        let router = Arc::new(SwapRouter::new(
            jupiter,
            venue,
            Arc::clone(&broadcaster),
            Arc::clone(&keypair),
            Arc::clone(&oracle),
            cfg.pump_fallback_enabled,
            cfg.force_pump_fallback,
        ));
        let executor = Arc::new(Executor::new(
            Arc::clone(&cfg),
            keypair,
            router,
            Arc::clone(&oracle),
            Arc::clone(&broadcaster),
        ));
        let notifier = Notifier::new(None, None);
        let watchers = Watchers::new(
            Arc::clone(&cfg),
            Arc::clone(&positions),
            oracle,
            Arc::clone(&executor),
            notifier.clone(),
        );
        let tracked = Arc::new(TrackedWallets::new());

        Pipeline::new(cfg, seen, positions, executor, watchers, notifier, tracked)
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_per_mint() {
        let pipeline = offline_pipeline("claim");

        assert!(pipeline.claim_mint("M"));
        assert!(!pipeline.claim_mint("M"), "second claim must lose");
        assert!(pipeline.claim_mint("N"), "other mints are independent");

        pipeline.release_mint("M");
        assert!(pipeline.claim_mint("M"), "released mint can be claimed again");
    }

    #[tokio::test]
    async fn test_open_position_blocks_claim() {
        let pipeline = offline_pipeline("openblock");
        pipeline.positions.open_position(OpenPosition {
            mint: "M".into(),
            origin_wallet: "W".into(),
            entry_price_usd: Some(0.01),
            qty_atoms: Some(1),
            decimals: Some(6),
            sol_spent: Some(0.05),
            ts_open: now_ms(),
            source_tx: "S".into(),
            mode: TradeMode::Paper,
            strategy: SwapStrategy::Paper,
        });

        assert!(!pipeline.claim_mint("M"));
        assert_eq!(pipeline.in_flight_count(), 0);
    }
}
