/// Smart-money wallet selection + webhook registration
///
/// The tracked set is an atomically replaced snapshot: readers clone an Arc
/// under a brief shared lock, the refresh task is the only writer. Wallet
/// quality comes from an external top-traders list, enriched with a
/// latest-signature recency probe when the tracker gives no activity hint,
/// then gated by win-rate and inactivity. Refresh re-upserts the Helius
/// enhanced-transaction webhook with the new address set.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde_json::{json, Value};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::now_ms;

const TRACKER_TIMEOUT_SECS: u64 = 10;
const TRACKER_CACHE_SECS: u64 = 600;
const HELIUS_API: &str = "https://api.helius.xyz/v0/webhooks";

/// Wallet set the detector matches receivers against. Replace-by-snapshot.
pub struct TrackedWallets {
    set: RwLock<Arc<HashSet<String>>>,
}

impl TrackedWallets {
    pub fn new() -> Self {
        Self {
            set: RwLock::new(Arc::new(HashSet::new())),
        }
    }

    pub fn snapshot(&self) -> Arc<HashSet<String>> {
        Arc::clone(&self.set.read().unwrap())
    }

    pub fn replace(&self, wallets: HashSet<String>) {
        *self.set.write().unwrap() = Arc::new(wallets);
    }

    pub fn len(&self) -> usize {
        self.set.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TrackedWallets {
    fn default() -> Self {
        Self::new()
    }
}

/// One candidate from the tracker, normalized
#[derive(Debug, Clone)]
pub struct TrackedWallet {
    pub address: String,
    pub win_rate_percent: f64,
    pub last_active_ms_ago: Option<i64>,
}

pub struct WalletSelector {
    http: Client,
    api_url: String,
    api_key: Option<String>,
    min_win_rate: f64,
    max_inactive_ms: i64,
    max_wallets: usize,
    rpc: Arc<RpcClient>,
    cache: Mutex<Option<(Vec<TrackedWallet>, Instant)>>,
}

impl WalletSelector {
    pub fn new(cfg: &Config, rpc: Arc<RpcClient>) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(TRACKER_TIMEOUT_SECS))
                .build()
                .expect("tracker http client"),
            api_url: cfg.tracker_api_url.clone(),
            api_key: cfg.tracker_api_key.clone(),
            min_win_rate: cfg.wallet_min_win_rate,
            max_inactive_ms: cfg.wallet_max_inactive_hours * 3_600 * 1_000,
            max_wallets: cfg.max_tracked_wallets,
            rpc,
            cache: Mutex::new(None),
        }
    }

    /// Current top wallets, filtered and capped. Cached briefly so the admin
    /// endpoint cannot hammer the tracker.
    pub async fn top_wallets(&self) -> Result<Vec<TrackedWallet>> {
        {
            let cache = self.cache.lock().unwrap();
            if let Some((wallets, at)) = cache.as_ref() {
                if at.elapsed().as_secs() < TRACKER_CACHE_SECS {
                    return Ok(wallets.clone());
                }
            }
        }

        let mut request = self.http.get(&self.api_url);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        let resp = request.send().await.context("tracker fetch")?;
        if !resp.status().is_success() {
            return Err(anyhow!("tracker responded {}", resp.status()));
        }
        let body: Value = resp.json().await.context("tracker decode")?;

        let mut candidates = parse_top_traders(&body);
        self.enrich_recency(&mut candidates).await;

        let selected = filter_wallets(
            candidates,
            self.min_win_rate,
            self.max_inactive_ms,
            self.max_wallets,
        );
        info!("👛 tracker returned {} qualified wallet(s)", selected.len());

        *self.cache.lock().unwrap() = Some((selected.clone(), Instant::now()));
        Ok(selected)
    }

    /// Fill missing recency with the wallet's latest signature block time.
    async fn enrich_recency(&self, wallets: &mut [TrackedWallet]) {
        for wallet in wallets.iter_mut() {
            if wallet.last_active_ms_ago.is_some() {
                continue;
            }
            let Ok(address) = Pubkey::from_str(&wallet.address) else {
                continue;
            };
            let config = GetConfirmedSignaturesForAddress2Config {
                limit: Some(1),
                ..GetConfirmedSignaturesForAddress2Config::default()
            };
            match self
                .rpc
                .get_signatures_for_address_with_config(&address, config)
                .await
            {
                Ok(sigs) => {
                    if let Some(block_time) = sigs.first().and_then(|s| s.block_time) {
                        wallet.last_active_ms_ago = Some(now_ms() - block_time * 1000);
                    }
                }
                Err(e) => debug!("recency probe failed for {}: {e}", wallet.address),
            }
        }
    }
}

/// Tolerant extraction: accepts `{wallets: [...]}` / `{traders: [...]}` /
/// a bare array, with per-row field-name variants.
pub fn parse_top_traders(body: &Value) -> Vec<TrackedWallet> {
    let rows = body
        .get("wallets")
        .or_else(|| body.get("traders"))
        .or_else(|| body.get("data"))
        .unwrap_or(body);
    let Some(rows) = rows.as_array() else {
        return Vec::new();
    };

    rows.iter()
        .filter_map(|row| {
            let address = row
                .get("wallet")
                .or_else(|| row.get("address"))
                .and_then(|v| v.as_str())?
                .to_string();
            let win_rate_percent = row
                .get("winPercentage")
                .or_else(|| row.get("win_rate"))
                .or_else(|| row.get("winRate"))
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            let last_active_ms_ago = row
                .get("lastActiveMsAgo")
                .and_then(|v| v.as_i64())
                .or_else(|| {
                    row.get("lastTradeTime")
                        .and_then(|v| v.as_i64())
                        .map(|ts| now_ms() - ts)
                });
            Some(TrackedWallet {
                address,
                win_rate_percent,
                last_active_ms_ago,
            })
        })
        .collect()
}

/// Win-rate + recency gate with a hard cap. Wallets with unknown recency
/// pass the inactivity gate (the probe is best-effort).
pub fn filter_wallets(
    candidates: Vec<TrackedWallet>,
    min_win_rate: f64,
    max_inactive_ms: i64,
    cap: usize,
) -> Vec<TrackedWallet> {
    let mut selected: Vec<TrackedWallet> = candidates
        .into_iter()
        .filter(|w| w.win_rate_percent >= min_win_rate)
        .filter(|w| match w.last_active_ms_ago {
            Some(ago) => ago <= max_inactive_ms,
            None => true,
        })
        .collect();
    selected.sort_by(|a, b| {
        b.win_rate_percent
            .partial_cmp(&a.win_rate_percent)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    selected.truncate(cap);
    selected
}

/// Idempotent Helius webhook upsert: match the existing webhook by callback
/// URL and edit it, create it otherwise. Returns the webhook id.
pub struct HeliusRegistrar {
    http: Client,
    api_key: String,
    callback_url: String,
    auth_header: Option<String>,
}

impl HeliusRegistrar {
    pub fn from_config(cfg: &Config) -> Option<Self> {
        let (api_key, callback_url) = match (&cfg.helius_api_key, &cfg.webhook_callback_url) {
            (Some(k), Some(u)) => (k.clone(), u.clone()),
            _ => return None,
        };
        Some(Self {
            http: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("registrar http client"),
            api_key,
            callback_url,
            auth_header: cfg.webhook_auth_token.clone(),
        })
    }

    pub async fn upsert(&self, addresses: &[String]) -> Result<String> {
        let listing: Value = self
            .http
            .get(format!("{HELIUS_API}?api-key={}", self.api_key))
            .send()
            .await
            .context("webhook listing")?
            .json()
            .await
            .context("webhook listing decode")?;

        let existing_id = listing
            .as_array()
            .into_iter()
            .flatten()
            .find(|w| w.get("webhookURL").and_then(|u| u.as_str()) == Some(&self.callback_url))
            .and_then(|w| w.get("webhookID").and_then(|id| id.as_str()))
            .map(|s| s.to_string());

        let mut payload = json!({
            "webhookURL": self.callback_url,
            "transactionTypes": ["SWAP", "TRANSFER"],
            "accountAddresses": addresses,
            "webhookType": "enhanced",
        });
        if let Some(auth) = &self.auth_header {
            payload["authHeader"] = json!(auth);
        }

        let resp = match &existing_id {
            Some(id) => {
                self.http
                    .put(format!("{HELIUS_API}/{id}?api-key={}", self.api_key))
                    .json(&payload)
                    .send()
                    .await
            }
            None => {
                self.http
                    .post(format!("{HELIUS_API}?api-key={}", self.api_key))
                    .json(&payload)
                    .send()
                    .await
            }
        }
        .context("webhook upsert")?;

        if !resp.status().is_success() {
            return Err(anyhow!("webhook upsert responded {}", resp.status()));
        }
        let body: Value = resp.json().await.context("webhook upsert decode")?;
        body.get("webhookID")
            .and_then(|id| id.as_str())
            .map(|s| s.to_string())
            .or(existing_id)
            .ok_or_else(|| anyhow!("webhook upsert returned no id"))
    }
}

/// Refresh operation: recompute the tracked set and update the webhook
/// registration in the same pass.
pub struct WalletService {
    selector: WalletSelector,
    registrar: Option<HeliusRegistrar>,
    tracked: Arc<TrackedWallets>,
}

impl WalletService {
    pub fn new(
        selector: WalletSelector,
        registrar: Option<HeliusRegistrar>,
        tracked: Arc<TrackedWallets>,
    ) -> Self {
        if registrar.is_none() {
            warn!("no Helius credentials; webhook registration disabled");
        }
        Self {
            selector,
            registrar,
            tracked,
        }
    }

    pub async fn refresh(&self) -> Result<Vec<String>> {
        let wallets = self.selector.top_wallets().await?;
        let addresses: Vec<String> = wallets.into_iter().map(|w| w.address).collect();

        self.tracked
            .replace(addresses.iter().cloned().collect::<HashSet<_>>());
        info!("👛 tracked set replaced: {} wallet(s)", addresses.len());

        if let Some(registrar) = &self.registrar {
            match registrar.upsert(&addresses).await {
                Ok(id) => info!("webhook upserted: {id}"),
                Err(e) => warn!("webhook upsert failed (will retry next refresh): {e}"),
            }
        }

        Ok(addresses)
    }

    pub fn tracked(&self) -> Arc<TrackedWallets> {
        Arc::clone(&self.tracked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_replacement_is_atomic_for_readers() {
        let tracked = TrackedWallets::new();
        let before = tracked.snapshot();

        tracked.replace(["W1".to_string(), "W2".to_string()].into_iter().collect());

        // The old snapshot is unchanged; a new one sees the replacement.
        assert!(before.is_empty());
        let after = tracked.snapshot();
        assert_eq!(after.len(), 2);
        assert!(after.contains("W1"));
    }

    #[test]
    fn test_parse_top_traders_variants() {
        let wrapped = json!({"wallets": [
            {"wallet": "A", "winPercentage": 72.5},
            {"address": "B", "win_rate": 61.0, "lastActiveMsAgo": 5_000},
        ]});
        let parsed = parse_top_traders(&wrapped);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].address, "A");
        assert_eq!(parsed[0].win_rate_percent, 72.5);
        assert_eq!(parsed[1].last_active_ms_ago, Some(5_000));

        let bare = json!([{"wallet": "C", "winRate": 50.0}]);
        assert_eq!(parse_top_traders(&bare).len(), 1);

        assert!(parse_top_traders(&json!({"nope": 1})).is_empty());
    }

    #[test]
    fn test_filter_wallets_gates_and_caps() {
        let candidates = vec![
            TrackedWallet { address: "low".into(), win_rate_percent: 10.0, last_active_ms_ago: Some(0) },
            TrackedWallet { address: "stale".into(), win_rate_percent: 90.0, last_active_ms_ago: Some(100_000_000) },
            TrackedWallet { address: "good1".into(), win_rate_percent: 70.0, last_active_ms_ago: Some(1_000) },
            TrackedWallet { address: "good2".into(), win_rate_percent: 80.0, last_active_ms_ago: None },
            TrackedWallet { address: "good3".into(), win_rate_percent: 60.0, last_active_ms_ago: Some(2_000) },
        ];

        let selected = filter_wallets(candidates, 55.0, 3_600_000, 2);
        assert_eq!(selected.len(), 2);
        // best win rates first
        assert_eq!(selected[0].address, "good2");
        assert_eq!(selected[1].address, "good1");
    }
}
