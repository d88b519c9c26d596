/// Buy detector: enhanced transactions -> normalized buy signals
///
/// Parses one pushed enhanced-transaction record against the tracked wallet
/// snapshot. Webhook payloads vary across sources, so every field is
/// tolerated as missing; a malformed entry is skipped, never thrown. The
/// detector is total: the pipeline can feed it anything.

use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::config::Config;
use crate::core::{BuySignal, LAMPORTS_PER_SOL};
use crate::store::{buy_key, SeenCache};

/// One enhanced transaction as pushed by the event provider. Field names are
/// normalized here; unknown fields are ignored.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct EnhancedTransaction {
    pub signature: String,

    #[serde(rename = "type")]
    pub tx_type: Option<String>,

    #[serde(rename = "tokenTransfers", alias = "token_transfers")]
    pub token_transfers: Vec<TokenTransfer>,

    #[serde(rename = "nativeTransfers", alias = "native_transfers")]
    pub native_transfers: Vec<NativeTransfer>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct TokenTransfer {
    pub mint: Option<String>,

    /// UI-normalized amount (preferred when present)
    #[serde(rename = "tokenAmount", alias = "token_amount")]
    pub token_amount: Option<f64>,

    /// Raw atoms + decimals, provided by some payload variants
    #[serde(rename = "rawTokenAmount", alias = "raw_token_amount")]
    pub raw_token_amount: Option<RawTokenAmount>,

    /// Receiver owner; sources disagree on the field name
    #[serde(
        rename = "toUserAccount",
        alias = "toUserAccountOwner",
        alias = "to_user_account"
    )]
    pub to_user_account: Option<String>,

    #[serde(rename = "fromUserAccount", alias = "from_user_account")]
    pub from_user_account: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct RawTokenAmount {
    /// Atom count; arrives as a string in most variants
    #[serde(rename = "tokenAmount", alias = "amount")]
    pub token_amount: serde_json::Value,
    pub decimals: Option<u8>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct NativeTransfer {
    #[serde(rename = "fromUserAccount", alias = "from_user_account")]
    pub from_user_account: Option<String>,

    #[serde(rename = "toUserAccount", alias = "to_user_account")]
    pub to_user_account: Option<String>,

    /// Lamports
    pub amount: Option<u64>,
}

impl TokenTransfer {
    /// Event amount, preferring the UI-normalized field, then raw atoms.
    /// Returns None unless a positive numeric amount is present.
    fn resolve_amount(&self) -> Option<u64> {
        if let Some(ui) = self.token_amount {
            if ui > 0.0 && ui.is_finite() {
                return Some(ui.trunc() as u64);
            }
        }
        let raw = self.raw_token_amount.as_ref()?;
        let atoms = match &raw.token_amount {
            serde_json::Value::String(s) => s.parse::<u64>().ok()?,
            serde_json::Value::Number(n) => n.as_u64()?,
            _ => return None,
        };
        (atoms > 0).then_some(atoms)
    }

    /// UI amount for the dust filter, best-effort.
    fn ui_amount(&self) -> Option<f64> {
        if let Some(ui) = self.token_amount {
            return (ui > 0.0 && ui.is_finite()).then_some(ui);
        }
        let raw = self.raw_token_amount.as_ref()?;
        let atoms = match &raw.token_amount {
            serde_json::Value::String(s) => s.parse::<f64>().ok()?,
            serde_json::Value::Number(n) => n.as_f64()?,
            _ => return None,
        };
        let decimals = raw.decimals.unwrap_or(0) as i32;
        Some(atoms / 10f64.powi(decimals))
    }
}

/// Parse one event into buy signals, in transfer order.
///
/// A transfer qualifies when it carries a mint, a positive amount, and a
/// receiver owner that is tracked; the mint is not excluded; the amount
/// clears the dust filter; and the `(wallet, mint)` pair has not fired
/// within the debounce window.
pub fn detect_buys(
    tx: &EnhancedTransaction,
    tracked: &HashSet<String>,
    seen: &SeenCache,
    cfg: &Config,
) -> Vec<BuySignal> {
    let mut signals = Vec::new();
    let mut skipped_malformed = 0usize;
    let debounce_ms = cfg.buy_debounce_minutes * 60 * 1000;

    for transfer in &tx.token_transfers {
        let (Some(mint), Some(wallet)) = (
            transfer.mint.as_deref(),
            transfer.to_user_account.as_deref(),
        ) else {
            skipped_malformed += 1;
            continue;
        };

        let Some(amount) = transfer.resolve_amount() else {
            skipped_malformed += 1;
            continue;
        };

        if cfg.excluded_mints.contains(mint) {
            debug!("excluded mint {mint}, skipping");
            continue;
        }

        if !tracked.contains(wallet) {
            continue;
        }

        if cfg.min_token_amount > 0.0 {
            if let Some(ui) = transfer.ui_amount() {
                if ui < cfg.min_token_amount {
                    debug!("dust transfer of {mint} ({ui}), skipping");
                    continue;
                }
            }
        }

        if seen.check_and_mark(&buy_key(wallet, mint), debounce_ms) {
            debug!("debounced {wallet}/{mint}");
            continue;
        }

        let sol_spent = sol_spent_by(tx, wallet);

        signals.push(BuySignal {
            wallet: wallet.to_string(),
            mint: mint.to_string(),
            amount,
            signature: tx.signature.clone(),
            sol_spent,
            tx_type: tx.tx_type.clone(),
        });
    }

    if skipped_malformed > 0 {
        warn!(
            "skipped {skipped_malformed} malformed transfer(s) in tx {}",
            tx.signature
        );
    }

    signals
}

/// Total SOL the wallet sent in the same transaction, in canonical units.
fn sol_spent_by(tx: &EnhancedTransaction, wallet: &str) -> Option<f64> {
    let lamports: u64 = tx
        .native_transfers
        .iter()
        .filter(|t| t.from_user_account.as_deref() == Some(wallet))
        .filter_map(|t| t.amount)
        .sum();
    (lamports > 0).then(|| lamports as f64 / LAMPORTS_PER_SOL as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::core::USDC_MINT;
    use std::path::PathBuf;

    fn temp_seen(name: &str) -> SeenCache {
        SeenCache::load(PathBuf::from(std::env::temp_dir().join(format!(
            "shadow-detector-{name}-{}.json",
            std::process::id()
        ))))
    }

    fn tracked(wallets: &[&str]) -> HashSet<String> {
        wallets.iter().map(|w| w.to_string()).collect()
    }

    fn event(sig: &str, transfers: serde_json::Value) -> EnhancedTransaction {
        serde_json::from_value(serde_json::json!({
            "signature": sig,
            "type": "SWAP",
            "tokenTransfers": transfers,
            "nativeTransfers": [],
        }))
        .unwrap()
    }

    #[test]
    fn test_basic_buy_detection() {
        let cfg = test_config();
        let seen = temp_seen("basic");
        let tx = event(
            "S1",
            serde_json::json!([{
                "mint": "M",
                "tokenAmount": 10_000_000.0,
                "toUserAccount": "W",
            }]),
        );

        let signals = detect_buys(&tx, &tracked(&["W"]), &seen, &cfg);
        assert_eq!(signals.len(), 1);
        let s = &signals[0];
        assert_eq!(s.wallet, "W");
        assert_eq!(s.mint, "M");
        assert_eq!(s.amount, 10_000_000);
        assert_eq!(s.signature, "S1");
    }

    #[test]
    fn test_second_event_within_debounce_is_dropped() {
        let cfg = test_config();
        let seen = temp_seen("debounce");
        let wallets = tracked(&["W"]);
        let transfers = serde_json::json!([{
            "mint": "M",
            "tokenAmount": 10_000_000.0,
            "toUserAccount": "W",
        }]);

        let first = detect_buys(&event("S1", transfers.clone()), &wallets, &seen, &cfg);
        let second = detect_buys(&event("S2", transfers), &wallets, &seen, &cfg);
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn test_excluded_mint_is_ignored() {
        let cfg = test_config();
        let seen = temp_seen("excluded");
        let tx = event(
            "S1",
            serde_json::json!([{
                "mint": USDC_MINT,
                "tokenAmount": 5_000_000.0,
                "toUserAccount": "W",
            }]),
        );

        let signals = detect_buys(&tx, &tracked(&["W"]), &seen, &cfg);
        assert!(signals.is_empty());
    }

    #[test]
    fn test_untracked_wallet_is_ignored() {
        let cfg = test_config();
        let seen = temp_seen("untracked");
        let tx = event(
            "S1",
            serde_json::json!([{
                "mint": "M",
                "tokenAmount": 1_000.0,
                "toUserAccount": "stranger",
            }]),
        );

        assert!(detect_buys(&tx, &tracked(&["W"]), &seen, &cfg).is_empty());
    }

    #[test]
    fn test_raw_amount_variant_is_accepted() {
        let cfg = test_config();
        let seen = temp_seen("raw");
        let tx = event(
            "S1",
            serde_json::json!([{
                "mint": "M",
                "rawTokenAmount": {"tokenAmount": "42000000", "decimals": 6},
                "toUserAccountOwner": "W",
            }]),
        );

        let signals = detect_buys(&tx, &tracked(&["W"]), &seen, &cfg);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].amount, 42_000_000);
    }

    #[test]
    fn test_malformed_transfers_are_skipped_not_thrown() {
        let cfg = test_config();
        let seen = temp_seen("malformed");
        let tx = event(
            "S1",
            serde_json::json!([
                {"toUserAccount": "W"},
                {"mint": "M"},
                {"mint": "M2", "tokenAmount": -5.0, "toUserAccount": "W"},
                {"mint": "OK", "tokenAmount": 1_000.0, "toUserAccount": "W"},
            ]),
        );

        let signals = detect_buys(&tx, &tracked(&["W"]), &seen, &cfg);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].mint, "OK");
    }

    #[test]
    fn test_dust_filter() {
        let mut cfg = test_config();
        cfg.min_token_amount = 100.0;
        let seen = temp_seen("dust");
        let tx = event(
            "S1",
            serde_json::json!([{
                "mint": "M",
                "tokenAmount": 5.0,
                "toUserAccount": "W",
            }]),
        );

        assert!(detect_buys(&tx, &tracked(&["W"]), &seen, &cfg).is_empty());
    }

    #[test]
    fn test_sol_spent_sums_wallet_outflows() {
        let cfg = test_config();
        let seen = temp_seen("solspent");
        let tx: EnhancedTransaction = serde_json::from_value(serde_json::json!({
            "signature": "S1",
            "type": "SWAP",
            "tokenTransfers": [{
                "mint": "M",
                "tokenAmount": 1_000.0,
                "toUserAccount": "W",
            }],
            "nativeTransfers": [
                {"fromUserAccount": "W", "toUserAccount": "pool", "amount": 200_000_000u64},
                {"fromUserAccount": "W", "toUserAccount": "fee", "amount": 50_000_000u64},
                {"fromUserAccount": "other", "toUserAccount": "W", "amount": 999u64},
            ],
        }))
        .unwrap();

        let signals = detect_buys(&tx, &tracked(&["W"]), &seen, &cfg);
        assert_eq!(signals.len(), 1);
        let sol = signals[0].sol_spent.unwrap();
        assert!((sol - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_signals_preserve_transfer_order() {
        let cfg = test_config();
        let seen = temp_seen("order");
        let tx = event(
            "S1",
            serde_json::json!([
                {"mint": "A", "tokenAmount": 1.0, "toUserAccount": "W"},
                {"mint": "B", "tokenAmount": 2.0, "toUserAccount": "W"},
            ]),
        );

        let signals = detect_buys(&tx, &tracked(&["W"]), &seen, &cfg);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].mint, "A");
        assert_eq!(signals[1].mint, "B");
    }
}
