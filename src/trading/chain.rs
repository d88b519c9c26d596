/// Raw JSON-RPC reads against a specific endpoint
///
/// The broadcaster owns typed clients for sending; reads that must stick to
/// the confirming endpoint (token balances, transaction meta) go through
/// this thin JSON-RPC reader so parsed payloads can be walked without
/// schema churn across RPC versions.

use reqwest::Client;
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use spl_associated_token_account::get_associated_token_address;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::core::{TradeError, TradeResult};

const READ_TIMEOUT_SECS: u64 = 10;
const LADDER_CONFIRMED_ATTEMPTS: usize = 3;
const LADDER_FINALIZED_ATTEMPTS: usize = 2;
const LADDER_WAIT_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBalance {
    pub atoms: u64,
    pub decimals: u8,
}

pub struct ChainReader {
    http: Client,
    endpoint: String,
}

impl ChainReader {
    pub fn new(endpoint: &str) -> Self {
        Self {
            http: Client::builder()
                .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
                .build()
                .expect("chain reader http client"),
            endpoint: endpoint.to_string(),
        }
    }

    async fn rpc_call(&self, method: &str, params: Value) -> TradeResult<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(TradeError::from)?;

        let status = resp.status();
        let v: Value = resp
            .json()
            .await
            .map_err(|e| TradeError::Transient(format!("{method} decode: {e}")))?;

        if !status.is_success() {
            return Err(TradeError::from_http(status, &v.to_string()));
        }
        if let Some(err) = v.get("error") {
            return Err(TradeError::Transient(format!("{method} rpc error: {err}")));
        }
        v.get("result")
            .cloned()
            .ok_or_else(|| TradeError::Transient(format!("{method} missing result")))
    }

    /// All of the owner's token accounts for a mint at a commitment tier.
    pub async fn token_accounts(
        &self,
        owner: &str,
        mint: &str,
        commitment: &str,
    ) -> TradeResult<Vec<TokenBalance>> {
        let result = self
            .rpc_call(
                "getTokenAccountsByOwner",
                json!([
                    owner,
                    {"mint": mint},
                    {"encoding": "jsonParsed", "commitment": commitment}
                ]),
            )
            .await?;
        Ok(parse_token_accounts(&result))
    }

    /// Largest token-account balance for (owner, mint), retried over two
    /// commitment tiers: confirmed first, then finalized. None when every
    /// attempt saw no account.
    pub async fn largest_balance(
        &self,
        owner: &str,
        mint: &str,
    ) -> TradeResult<Option<TokenBalance>> {
        let ladder = [
            ("confirmed", LADDER_CONFIRMED_ATTEMPTS),
            ("finalized", LADDER_FINALIZED_ATTEMPTS),
        ];

        let mut last_err = None;
        let mut saw_read = false;
        for (commitment, attempts) in ladder {
            for attempt in 0..attempts {
                match self.token_accounts(owner, mint, commitment).await {
                    Ok(accounts) => {
                        saw_read = true;
                        if let Some(best) = accounts.into_iter().max_by_key(|b| b.atoms) {
                            if best.atoms > 0 {
                                return Ok(Some(best));
                            }
                        }
                    }
                    Err(e) => {
                        debug!("token account read ({commitment} #{attempt}) failed: {e}");
                        last_err = Some(e);
                    }
                }
                tokio::time::sleep(Duration::from_millis(LADDER_WAIT_MS)).await;
            }
        }

        // Only claim "no balance" when at least one read actually succeeded
        match (saw_read, last_err) {
            (false, Some(e)) => Err(e),
            _ => Ok(None),
        }
    }

    /// Fast-path balance read via the associated token account; falls back
    /// to the largest-account scan when the ATA is missing.
    pub async fn wallet_balance(&self, owner: &str, mint: &str) -> TradeResult<Option<TokenBalance>> {
        if let (Ok(owner_pk), Ok(mint_pk)) = (Pubkey::from_str(owner), Pubkey::from_str(mint)) {
            let ata = get_associated_token_address(&owner_pk, &mint_pk);
            if let Ok(result) = self
                .rpc_call(
                    "getTokenAccountBalance",
                    json!([ata.to_string(), {"commitment": "confirmed"}]),
                )
                .await
            {
                if let Some(balance) = parse_ui_token_amount(result.get("value")) {
                    return Ok(Some(balance));
                }
            }
        }
        self.largest_balance(owner, mint).await
    }

    /// Confirmed transaction meta; None when the endpoint has not indexed
    /// the signature yet.
    pub async fn transaction_meta(&self, signature: &str) -> TradeResult<Option<Value>> {
        let result = self
            .rpc_call(
                "getTransaction",
                json!([
                    signature,
                    {
                        "encoding": "json",
                        "commitment": "confirmed",
                        "maxSupportedTransactionVersion": 0
                    }
                ]),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(result.get("meta").cloned().filter(|m| !m.is_null()))
    }
}

fn parse_ui_token_amount(value: Option<&Value>) -> Option<TokenBalance> {
    let v = value?;
    let atoms = v.get("amount")?.as_str()?.parse::<u64>().ok()?;
    let decimals = v.get("decimals")?.as_u64()? as u8;
    Some(TokenBalance { atoms, decimals })
}

fn parse_token_accounts(result: &Value) -> Vec<TokenBalance> {
    let Some(entries) = result.get("value").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let token_amount = entry
                .get("account")?
                .get("data")?
                .get("parsed")?
                .get("info")?
                .get("tokenAmount")?;
            parse_ui_token_amount(Some(token_amount))
        })
        .collect()
}

/// Atoms of `mint` the owner gained in a confirmed transaction, from the
/// meta's pre/post token balances: `max(0, post - pre)`. Also returns the
/// mint decimals when visible.
pub fn owner_mint_delta(meta: &Value, owner: &str, mint: &str) -> (Option<u64>, Option<u8>) {
    let sum_side = |key: &str| -> (i128, Option<u8>) {
        let mut sum: i128 = 0;
        let mut decimals = None;
        if let Some(balances) = meta.get(key).and_then(|b| b.as_array()) {
            for b in balances {
                let o = b.get("owner").and_then(|x| x.as_str()).unwrap_or("");
                let m = b.get("mint").and_then(|x| x.as_str()).unwrap_or("");
                if o == owner && m == mint {
                    if let Some(ui) = b.get("uiTokenAmount") {
                        if let Some(amt) = ui.get("amount").and_then(|a| a.as_str()) {
                            sum += amt.parse::<i128>().unwrap_or(0);
                        }
                        if decimals.is_none() {
                            decimals = ui.get("decimals").and_then(|d| d.as_u64()).map(|d| d as u8);
                        }
                    }
                }
            }
        }
        (sum, decimals)
    };

    let (pre, pre_dec) = sum_side("preTokenBalances");
    let (post, post_dec) = sum_side("postTokenBalances");

    let received = (post - pre).max(0) as u64;
    (Some(received), post_dec.or(pre_dec))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_fixture(pre: u64, post: u64) -> Value {
        json!({
            "preTokenBalances": [
                {"owner": "ME", "mint": "M", "uiTokenAmount": {"amount": pre.to_string(), "decimals": 6}},
                {"owner": "POOL", "mint": "M", "uiTokenAmount": {"amount": "999999", "decimals": 6}}
            ],
            "postTokenBalances": [
                {"owner": "ME", "mint": "M", "uiTokenAmount": {"amount": post.to_string(), "decimals": 6}},
                {"owner": "POOL", "mint": "M", "uiTokenAmount": {"amount": "1", "decimals": 6}}
            ]
        })
    }

    #[test]
    fn test_owner_mint_delta_is_post_minus_pre() {
        let (received, decimals) = owner_mint_delta(&meta_fixture(0, 42_000_000), "ME", "M");
        assert_eq!(received, Some(42_000_000));
        assert_eq!(decimals, Some(6));
    }

    #[test]
    fn test_owner_mint_delta_clamps_negative_to_zero() {
        let (received, _) = owner_mint_delta(&meta_fixture(100, 40), "ME", "M");
        assert_eq!(received, Some(0));
    }

    #[test]
    fn test_owner_mint_delta_missing_owner_is_zero() {
        let (received, decimals) = owner_mint_delta(&meta_fixture(0, 10), "SOMEONE", "M");
        assert_eq!(received, Some(0));
        assert_eq!(decimals, None);
    }

    #[test]
    fn test_parse_token_accounts_picks_amounts() {
        let result = json!({
            "value": [
                {"account": {"data": {"parsed": {"info": {"tokenAmount": {"amount": "500", "decimals": 9}}}}}},
                {"account": {"data": {"parsed": {"info": {"tokenAmount": {"amount": "1500", "decimals": 9}}}}}},
                {"account": {"data": "not-parsed"}}
            ]
        });
        let parsed = parse_token_accounts(&result);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.iter().map(|b| b.atoms).max(), Some(1500));
        assert_eq!(parsed[0].decimals, 9);
    }
}
