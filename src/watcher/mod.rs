/// Per-position watchers
///
/// One independent supervision loop per open mint: poll the oracle, compare
/// against the exit thresholds, resolve the wallet balance, and exit through
/// the executor with retries. Definitive sell failures schedule exponential
/// backoff; a balance that never settles closes the position after the
/// settlement timeout. Per-mint transitions are serial (the tick body runs
/// single-threaded per mint); different mints run independently.

use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::core::{
    now_ms, stop_loss_reason, take_profit_reason, OpenPosition, TradeMode,
    REASON_BUY_FAILED_NO_BALANCE,
};
use crate::notify::Notifier;
use crate::oracle::{PriceHints, PriceOracle};
use crate::store::PositionStore;
use crate::trading::{Executor, SellRequest};

const MIN_TICK_MS: u64 = 500;
const SELL_ATTEMPTS: usize = 4;
const BACKOFF_JITTER_MS: u64 = 250;

/// Outcome of one exit-threshold evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCheck {
    TakeProfit,
    StopLoss,
    Hold,
}

/// TP wins when both trip on the same tick (can only happen with inverted
/// thresholds; evaluation order keeps it deterministic).
pub fn evaluate_exit(change_pct: f64, take_profit_pct: f64, stop_loss_pct: f64) -> ExitCheck {
    if change_pct >= take_profit_pct {
        ExitCheck::TakeProfit
    } else if change_pct <= -stop_loss_pct.abs() {
        ExitCheck::StopLoss
    } else {
        ExitCheck::Hold
    }
}

/// Exponential backoff with jitter: base * 2^level, capped.
pub fn backoff_delay_ms(level: u32, base_ms: u64, cap_ms: u64, jitter_ms: u64) -> u64 {
    let exp = base_ms.saturating_mul(1u64 << level.min(16));
    let jitter = if jitter_ms > 0 {
        rand::thread_rng().gen_range(0..jitter_ms)
    } else {
        0
    };
    exp.min(cap_ms) + jitter
}

pub fn settlement_expired(ts_open: i64, now: i64, timeout_ms: i64) -> bool {
    now - ts_open >= timeout_ms
}

#[derive(Debug, Default)]
struct MintGuard {
    exiting: bool,
    cooldown_until: i64,
    backoff_level: u32,
}

enum Tick {
    Continue,
    Stop,
}

pub struct Watchers {
    cfg: Arc<Config>,
    positions: Arc<PositionStore>,
    oracle: Arc<PriceOracle>,
    executor: Arc<Executor>,
    notifier: Notifier,
    guards: DashMap<String, MintGuard>,
    handles: DashMap<String, JoinHandle<()>>,
}

impl Watchers {
    pub fn new(
        cfg: Arc<Config>,
        positions: Arc<PositionStore>,
        oracle: Arc<PriceOracle>,
        executor: Arc<Executor>,
        notifier: Notifier,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            positions,
            oracle,
            executor,
            notifier,
            guards: DashMap::new(),
            handles: DashMap::new(),
        })
    }

    pub fn watching(&self, mint: &str) -> bool {
        self.handles.contains_key(mint)
    }

    pub fn active_count(&self) -> usize {
        self.handles.len()
    }

    /// Start a supervision loop for the mint; idempotent.
    pub fn start(self: &Arc<Self>, mint: &str) {
        if self.watching(mint) {
            return;
        }

        let watchers = Arc::clone(self);
        let mint_owned = mint.to_string();
        let tick_ms = self.cfg.price_poll_ms.max(MIN_TICK_MS);

        let handle = tokio::spawn(async move {
            info!("👁️ watcher started | mint={mint_owned} tick={tick_ms}ms");
            let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
            loop {
                interval.tick().await;
                match watchers.tick(&mint_owned).await {
                    Tick::Continue => {}
                    Tick::Stop => break,
                }
            }
            watchers.guards.remove(&mint_owned);
            watchers.handles.remove(&mint_owned);
            info!("👁️ watcher stopped | mint={mint_owned}");
        });

        self.handles.insert(mint.to_string(), handle);
    }

    /// Cancel the loop and clear per-mint state.
    pub fn stop(&self, mint: &str) {
        if let Some((_, handle)) = self.handles.remove(mint) {
            handle.abort();
        }
        self.guards.remove(mint);
    }

    #[instrument(skip(self), fields(mint = %mint))]
    async fn tick(&self, mint: &str) -> Tick {
        // 1. Position gone -> watcher has no job
        let Some(position) = self.positions.get(mint) else {
            return Tick::Stop;
        };

        // 2. Backoff cooldown
        let now = now_ms();
        if self.guard_cooldown(mint) > now {
            return Tick::Continue;
        }

        // 3. Spot price (with fill-implied fallback hints)
        let hints = position_hints(&position);
        let price = match self.oracle.spot_price_usd(mint, hints).await {
            Some(q) => q.price_usd,
            None => {
                debug!("no usable price for {mint} this tick");
                return Tick::Continue;
            }
        };

        // 4-5. Threshold evaluation (needs a finite entry)
        let check = match position.entry_price_usd {
            Some(entry) if entry.is_finite() && entry > 0.0 => {
                let change_pct = (price - entry) / entry * 100.0;
                evaluate_exit(
                    change_pct,
                    self.cfg.take_profit_percent,
                    self.cfg.stop_loss_percent,
                )
            }
            _ => ExitCheck::Hold,
        };

        // 6. Wallet balance; paper positions have no chain footprint
        let balance = if position.mode == TradeMode::Paper {
            position.qty_atoms.unwrap_or(0)
        } else {
            match self.executor.wallet_balance_atoms(mint).await {
                Ok(atoms) => atoms,
                Err(e) => {
                    debug!("balance read failed for {mint}: {e}");
                    return Tick::Continue;
                }
            }
        };

        // 7. Never-settled buy
        if balance == 0 {
            if settlement_expired(position.ts_open, now, self.cfg.buy_settle_timeout_ms) {
                warn!("⏱️ buy for {mint} never settled, closing");
                if let Some(closed) =
                    self.positions
                        .close_position(mint, None, None, REASON_BUY_FAILED_NO_BALANCE)
                {
                    self.notifier.position_closed(&closed).await;
                }
                return Tick::Stop;
            }
            self.schedule_backoff(mint);
            return Tick::Continue;
        }

        // 8. Nothing to do
        if check == ExitCheck::Hold {
            return Tick::Continue;
        }

        // 9. Exit-in-progress latch
        if !self.try_set_exiting(mint) {
            return Tick::Continue;
        }

        // 10. Sell with bounded in-tick retries
        let reason = match check {
            ExitCheck::TakeProfit => take_profit_reason(self.cfg.take_profit_percent),
            ExitCheck::StopLoss => stop_loss_reason(self.cfg.stop_loss_percent),
            ExitCheck::Hold => unreachable!(),
        };
        info!("🎯 exit condition for {mint}: {reason} (price {price})");

        match self.sell_with_retries(mint, balance).await {
            Ok(fill) => {
                // 11. Clean close
                self.clear_backoff(mint);
                let exit_price = fill.price_usd.or(Some(price));
                if let Some(closed) = self.positions.close_position(
                    mint,
                    exit_price,
                    Some(fill.signature),
                    &reason,
                ) {
                    self.notifier.position_closed(&closed).await;
                }
                Tick::Stop
            }
            Err(e) => {
                // 12. Definitive failure: back off, keep the position
                warn!("exit attempt for {mint} failed: {e}");
                self.schedule_backoff(mint);
                self.clear_exiting(mint);
                Tick::Continue
            }
        }
    }

    async fn sell_with_retries(
        &self,
        mint: &str,
        balance: u64,
    ) -> crate::core::TradeResult<crate::core::FillReport> {
        let req = SellRequest {
            mint: mint.to_string(),
            qty_atoms: Some(balance),
            sell_all: true,
            percent: None,
        };

        let mut last_err = None;
        for attempt in 0..SELL_ATTEMPTS {
            match self.executor.execute_sell(&req).await {
                Ok(fill) => return Ok(fill),
                Err(e) if e.extends_backoff() => return Err(e),
                Err(e) => {
                    debug!("sell attempt {attempt} for {mint}: {e}");
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(600 + 500 * attempt as u64)).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| crate::core::TradeError::Transient("sell retries exhausted".into())))
    }

    fn guard_cooldown(&self, mint: &str) -> i64 {
        self.guards
            .get(mint)
            .map(|g| g.cooldown_until)
            .unwrap_or(0)
    }

    fn try_set_exiting(&self, mint: &str) -> bool {
        let mut guard = self.guards.entry(mint.to_string()).or_default();
        if guard.exiting {
            return false;
        }
        guard.exiting = true;
        true
    }

    fn clear_exiting(&self, mint: &str) {
        if let Some(mut guard) = self.guards.get_mut(mint) {
            guard.exiting = false;
        }
    }

    fn schedule_backoff(&self, mint: &str) {
        let mut guard = self.guards.entry(mint.to_string()).or_default();
        let delay = backoff_delay_ms(
            guard.backoff_level,
            self.cfg.watcher_base_backoff_ms,
            self.cfg.watcher_max_backoff_ms,
            BACKOFF_JITTER_MS,
        );
        guard.backoff_level = guard.backoff_level.saturating_add(1);
        guard.cooldown_until = now_ms() + delay as i64;
        debug!("backoff for {mint}: {delay}ms (level {})", guard.backoff_level);
    }

    fn clear_backoff(&self, mint: &str) {
        if let Some(mut guard) = self.guards.get_mut(mint) {
            guard.backoff_level = 0;
            guard.cooldown_until = 0;
        }
    }
}

fn position_hints(position: &OpenPosition) -> PriceHints {
    let amount_ui = match (position.qty_atoms, position.decimals) {
        (Some(atoms), Some(d)) => Some(atoms as f64 / 10f64.powi(d as i32)),
        _ => None,
    };
    PriceHints {
        amount: amount_ui,
        sol_spent: position.sol_spent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_profit_trips_at_threshold() {
        assert_eq!(evaluate_exit(20.0, 20.0, 12.0), ExitCheck::TakeProfit);
        assert_eq!(evaluate_exit(30.0, 20.0, 12.0), ExitCheck::TakeProfit);
        assert_eq!(evaluate_exit(19.99, 20.0, 12.0), ExitCheck::Hold);
    }

    #[test]
    fn test_stop_loss_trips_on_magnitude() {
        assert_eq!(evaluate_exit(-12.0, 20.0, 12.0), ExitCheck::StopLoss);
        // sign of the configured threshold must not matter
        assert_eq!(evaluate_exit(-12.0, 20.0, -12.0), ExitCheck::StopLoss);
        assert_eq!(evaluate_exit(-11.9, 20.0, 12.0), ExitCheck::Hold);
    }

    #[test]
    fn test_interior_change_holds() {
        assert_eq!(evaluate_exit(0.0, 20.0, 12.0), ExitCheck::Hold);
        assert_eq!(evaluate_exit(5.0, 20.0, 12.0), ExitCheck::Hold);
        assert_eq!(evaluate_exit(-5.0, 20.0, 12.0), ExitCheck::Hold);
    }

    #[test]
    fn test_tp_decision_for_thirty_percent_move() {
        // entry 0.01 -> price 0.013 is +30%, above a 20% threshold
        let change = (0.013 - 0.01) / 0.01 * 100.0;
        assert_eq!(evaluate_exit(change, 20.0, 12.0), ExitCheck::TakeProfit);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        // jitter disabled for determinism
        assert_eq!(backoff_delay_ms(0, 1_500, 60_000, 0), 1_500);
        assert_eq!(backoff_delay_ms(1, 1_500, 60_000, 0), 3_000);
        assert_eq!(backoff_delay_ms(2, 1_500, 60_000, 0), 6_000);
        assert_eq!(backoff_delay_ms(10, 1_500, 60_000, 0), 60_000);
        assert_eq!(backoff_delay_ms(32, 1_500, 60_000, 0), 60_000);
    }

    #[test]
    fn test_backoff_jitter_bounds() {
        for _ in 0..50 {
            let d = backoff_delay_ms(0, 1_500, 60_000, 250);
            assert!((1_500..1_750).contains(&d));
        }
    }

    #[test]
    fn test_settlement_timeout() {
        let open = 1_000_000;
        assert!(!settlement_expired(open, open + 44_999, 45_000));
        assert!(settlement_expired(open, open + 45_000, 45_000));
    }
}
