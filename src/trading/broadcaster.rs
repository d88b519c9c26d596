/// Multi-endpoint RPC broadcaster
///
/// Sends a signed transaction to every configured endpoint concurrently and
/// races confirmations: the first endpoint to see the signature at
/// "confirmed" wins and is returned (its identity matters — meta lookups
/// reuse it to avoid cross-endpoint visibility gaps). Losers keep running
/// until the race future is dropped and are allowed to fail silently. If
/// every endpoint fails, the first error surfaces.

use futures_util::stream::{FuturesUnordered, StreamExt};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::transaction::VersionedTransaction;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::{TradeError, TradeResult};

const CONFIRM_POLL_MS: u64 = 400;
const SEND_MAX_RETRIES: usize = 3;

#[derive(Debug, Clone)]
pub struct BroadcastReceipt {
    pub signature: String,
    pub endpoint_used: String,
}

pub struct Broadcaster {
    endpoints: Vec<String>,
    clients: Vec<Arc<RpcClient>>,
    max_wait: Duration,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("endpoints", &self.endpoints)
            .field("max_wait", &self.max_wait)
            .finish()
    }
}

/// Split, trim, dedupe, and keep only http(s) endpoints.
pub fn parse_endpoints(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for part in raw.split(',') {
        let candidate = part.trim().trim_end_matches('/');
        if candidate.is_empty() {
            continue;
        }
        match Url::parse(candidate) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                if seen.insert(candidate.to_string()) {
                    out.push(candidate.to_string());
                }
            }
            _ => warn!("ignoring non-http rpc endpoint: {candidate}"),
        }
    }
    out
}

impl Broadcaster {
    pub fn new(raw_endpoints: &str, max_wait_ms: u64) -> TradeResult<Self> {
        let endpoints = parse_endpoints(raw_endpoints);
        if endpoints.is_empty() {
            return Err(TradeError::Config(
                "RPC_ENDPOINTS yielded no usable http endpoints".into(),
            ));
        }

        let clients = endpoints
            .iter()
            .map(|e| {
                Arc::new(RpcClient::new_with_commitment(
                    e.clone(),
                    CommitmentConfig::confirmed(),
                ))
            })
            .collect();

        info!("📡 broadcaster ready with {} endpoint(s)", endpoints.len());
        Ok(Self {
            endpoints,
            clients,
            max_wait: Duration::from_millis(max_wait_ms),
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// First configured endpoint's client, for reads that don't need affinity.
    pub fn primary(&self) -> Arc<RpcClient> {
        Arc::clone(&self.clients[0])
    }

    pub fn client_for(&self, endpoint: &str) -> Option<Arc<RpcClient>> {
        self.endpoints
            .iter()
            .position(|e| e == endpoint)
            .map(|i| Arc::clone(&self.clients[i]))
    }

    /// Race send-and-confirm across all endpoints, bounded by max_wait.
    pub async fn broadcast_and_confirm(
        &self,
        tx: &VersionedTransaction,
    ) -> TradeResult<BroadcastReceipt> {
        let mut races = FuturesUnordered::new();
        for (endpoint, client) in self.endpoints.iter().zip(&self.clients) {
            races.push(send_and_confirm_one(
                endpoint.clone(),
                Arc::clone(client),
                tx.clone(),
            ));
        }

        let deadline = tokio::time::Instant::now() + self.max_wait;
        let mut first_err: Option<TradeError> = None;

        loop {
            match tokio::time::timeout_at(deadline, races.next()).await {
                Ok(Some(Ok(receipt))) => {
                    info!(
                        "✅ confirmed {} via {}",
                        receipt.signature, receipt.endpoint_used
                    );
                    return Ok(receipt);
                }
                Ok(Some(Err(e))) => {
                    debug!("endpoint race branch failed: {e}");
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Ok(None) => {
                    return Err(first_err
                        .unwrap_or_else(|| TradeError::Transient("all endpoints failed".into())));
                }
                Err(_) => {
                    return Err(first_err.unwrap_or_else(|| {
                        TradeError::Transient(format!(
                            "broadcast not confirmed within {:?}",
                            self.max_wait
                        ))
                    }));
                }
            }
        }
    }
}

async fn send_and_confirm_one(
    endpoint: String,
    client: Arc<RpcClient>,
    tx: VersionedTransaction,
) -> TradeResult<BroadcastReceipt> {
    let config = RpcSendTransactionConfig {
        skip_preflight: true,
        max_retries: Some(SEND_MAX_RETRIES),
        ..RpcSendTransactionConfig::default()
    };

    let signature = client
        .send_transaction_with_config(&tx, config)
        .await
        .map_err(|e| TradeError::Transient(format!("send via {endpoint}: {e}")))?;

    // Poll until this endpoint sees the signature confirmed. The outer race
    // deadline bounds this loop.
    loop {
        tokio::time::sleep(Duration::from_millis(CONFIRM_POLL_MS)).await;

        let statuses = match client.get_signature_statuses(&[signature]).await {
            Ok(resp) => resp.value,
            Err(e) => {
                debug!("status poll via {endpoint} failed: {e}");
                continue;
            }
        };

        if let Some(Some(status)) = statuses.into_iter().next() {
            if let Some(err) = status.err {
                return Err(TradeError::Transient(format!(
                    "transaction failed on-chain: {err:?}"
                )));
            }
            if status.satisfies_commitment(CommitmentConfig::confirmed()) {
                return Ok(BroadcastReceipt {
                    signature: signature.to_string(),
                    endpoint_used: endpoint,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoints_dedupes_and_filters() {
        let parsed = parse_endpoints(
            "https://a.example, https://a.example/, wss://ws.example, ftp://x, https://b.example,,",
        );
        assert_eq!(parsed, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn test_parse_endpoints_keeps_plain_http() {
        let parsed = parse_endpoints("http://127.0.0.1:8899");
        assert_eq!(parsed, vec!["http://127.0.0.1:8899"]);
    }

    #[test]
    fn test_empty_endpoint_list_is_config_error() {
        let err = Broadcaster::new("wss://only-websockets.example", 1_000).unwrap_err();
        assert!(matches!(err, TradeError::Config(_)));
    }

    #[test]
    fn test_client_affinity_lookup() {
        let b = Broadcaster::new("https://a.example,https://b.example", 1_000).unwrap();
        assert!(b.client_for("https://b.example").is_some());
        assert!(b.client_for("https://c.example").is_none());
    }
}
