/// Durable position book
///
/// Open positions keyed by mint (at most one per mint), closed positions
/// append-only. A single writer mutates under the write lock; snapshot writes
/// are best-effort and never propagate errors into the pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, info, warn};

use crate::core::{now_ms, ClosedPosition, OpenPosition};
use crate::store::write_json_atomic;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PositionsSnapshot {
    open: HashMap<String, OpenPosition>,
    closed: Vec<ClosedPosition>,
}

pub struct PositionStore {
    state: RwLock<PositionsSnapshot>,
    path: PathBuf,
}

impl PositionStore {
    /// Load from disk; missing or corrupt snapshots start empty.
    pub fn load(path: PathBuf) -> Self {
        let state = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<PositionsSnapshot>(&raw) {
                Ok(s) => {
                    debug!(open = s.open.len(), closed = s.closed.len(), "positions loaded");
                    s
                }
                Err(e) => {
                    warn!("positions snapshot corrupt, starting empty: {e}");
                    PositionsSnapshot::default()
                }
            },
            Err(_) => PositionsSnapshot::default(),
        };
        Self {
            state: RwLock::new(state),
            path,
        }
    }

    pub fn get(&self, mint: &str) -> Option<OpenPosition> {
        self.state.read().unwrap().open.get(mint).cloned()
    }

    pub fn has_open(&self, mint: &str) -> bool {
        self.state.read().unwrap().open.contains_key(mint)
    }

    pub fn open_mints(&self) -> Vec<String> {
        self.state.read().unwrap().open.keys().cloned().collect()
    }

    pub fn open_count(&self) -> usize {
        self.state.read().unwrap().open.len()
    }

    pub fn closed_count(&self) -> usize {
        self.state.read().unwrap().closed.len()
    }

    /// Insert (or overwrite by mint) an open position and snapshot.
    pub fn open_position(&self, position: OpenPosition) {
        let mint = position.mint.clone();
        {
            let mut st = self.state.write().unwrap();
            st.open.insert(mint.clone(), position);
        }
        info!("📈 position opened | mint={mint}");
        self.persist();
    }

    /// Move an open position to the closed book. Returns the closed record,
    /// or None when no position exists for the mint. pnl_pct is computed only
    /// when both entry and exit prices are finite.
    pub fn close_position(
        &self,
        mint: &str,
        exit_price_usd: Option<f64>,
        exit_tx: Option<String>,
        reason: &str,
    ) -> Option<ClosedPosition> {
        let closed = {
            let mut st = self.state.write().unwrap();
            let open = st.open.remove(mint)?;

            let pnl_pct = match (open.entry_price_usd, exit_price_usd) {
                (Some(entry), Some(exit)) if entry.is_finite() && exit.is_finite() && entry != 0.0 => {
                    Some((exit - entry) / entry * 100.0)
                }
                _ => None,
            };

            let record = ClosedPosition {
                mint: open.mint,
                origin_wallet: open.origin_wallet,
                entry_price_usd: open.entry_price_usd,
                qty_atoms: open.qty_atoms,
                decimals: open.decimals,
                sol_spent: open.sol_spent,
                ts_open: open.ts_open,
                source_tx: open.source_tx,
                mode: open.mode,
                strategy: open.strategy,
                exit_price_usd,
                exit_tx,
                ts_close: now_ms(),
                pnl_pct,
                reason: reason.to_string(),
            };
            st.closed.push(record.clone());
            record
        };

        info!(
            "📉 position closed | mint={mint} reason={reason} pnl={:?}",
            closed.pnl_pct
        );
        self.persist();
        Some(closed)
    }

    /// Best-effort snapshot; failures are logged, never thrown.
    pub fn persist(&self) {
        let result = {
            let st = self.state.read().unwrap();
            write_json_atomic(&self.path, &*st)
        };
        if let Err(e) = result {
            warn!("positions snapshot write failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SwapStrategy, TradeMode};

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("shadow-pos-{name}-{}.json", std::process::id()))
    }

    fn sample_position(mint: &str, entry: Option<f64>) -> OpenPosition {
        OpenPosition {
            mint: mint.to_string(),
            origin_wallet: "W".to_string(),
            entry_price_usd: entry,
            qty_atoms: Some(100_000_000),
            decimals: Some(6),
            sol_spent: Some(0.05),
            ts_open: now_ms(),
            source_tx: "S1".to_string(),
            mode: TradeMode::Paper,
            strategy: SwapStrategy::AnyRoute,
        }
    }

    #[test]
    fn test_close_is_atomic_and_computes_pnl() {
        let store = PositionStore::load(temp_path("close"));
        store.open_position(sample_position("M", Some(0.01)));
        assert!(store.has_open("M"));

        let closed = store
            .close_position("M", Some(0.013), Some("X".to_string()), "take_profit_20%")
            .unwrap();

        assert!(!store.has_open("M"));
        assert_eq!(store.closed_count(), 1);
        assert_eq!(closed.mint, "M");
        let pnl = closed.pnl_pct.unwrap();
        assert!((pnl - 30.0).abs() < 1e-9, "pnl was {pnl}");
        let _ = std::fs::remove_file(temp_path("close"));
    }

    #[test]
    fn test_pnl_null_when_entry_missing() {
        let store = PositionStore::load(temp_path("nopnl"));
        store.open_position(sample_position("M", None));

        let closed = store
            .close_position("M", Some(0.02), None, "manual")
            .unwrap();
        assert!(closed.pnl_pct.is_none());
        let _ = std::fs::remove_file(temp_path("nopnl"));
    }

    #[test]
    fn test_open_overwrites_by_mint() {
        let store = PositionStore::load(temp_path("overwrite"));
        store.open_position(sample_position("M", Some(1.0)));
        store.open_position(sample_position("M", Some(2.0)));

        assert_eq!(store.open_count(), 1);
        assert_eq!(store.get("M").unwrap().entry_price_usd, Some(2.0));
        let _ = std::fs::remove_file(temp_path("overwrite"));
    }

    #[test]
    fn test_close_unknown_mint_is_none() {
        let store = PositionStore::load(temp_path("unknown"));
        assert!(store.close_position("nope", None, None, "manual").is_none());
        let _ = std::fs::remove_file(temp_path("unknown"));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let path = temp_path("reload");
        {
            let store = PositionStore::load(path.clone());
            store.open_position(sample_position("M", Some(0.5)));
            store.open_position(sample_position("N", Some(0.7)));
            store.close_position("N", Some(0.35), None, "stop_loss_50%");
        }

        let reloaded = PositionStore::load(path.clone());
        assert!(reloaded.has_open("M"));
        assert!(!reloaded.has_open("N"));
        assert_eq!(reloaded.closed_count(), 1);
        let _ = std::fs::remove_file(path);
    }
}
