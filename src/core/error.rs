/// Trade error taxonomy
///
/// Every failure on the trade path is classified into one of these kinds so
/// the watcher and pipeline can pick the right recovery:
/// - RateLimit / NoRoute / NoBalance on the sell path extend backoff
/// - Transient on the buy path releases the in-flight lock and moves on
/// - Config / Fatal abort startup

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TradeError {
    /// HTTP 5xx, timeouts, confirmation failures — retry later
    #[error("transient: {0}")]
    Transient(String),

    /// HTTP 429 or an annotated rate-limit code from a venue
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// No quote across all aggregator tiers and no eligible fallback
    #[error("no route: {0}")]
    NoRoute(String),

    /// Sell requested with zero holdings
    #[error("no balance for mint {0}")]
    NoBalance(String),

    /// Missing key or invalid signer material; aborts startup
    #[error("config: {0}")]
    Config(String),

    /// Unrecoverable (bind failure); aborts startup
    #[error("fatal: {0}")]
    Fatal(String),
}

impl TradeError {
    /// Sell-path classification: these kinds extend the watcher backoff
    /// instead of being retried inside the current attempt ladder.
    pub fn extends_backoff(&self) -> bool {
        matches!(
            self,
            TradeError::RateLimit(_) | TradeError::NoRoute(_) | TradeError::NoBalance(_)
        )
    }

    /// Map an HTTP status + body into the right kind. 429s are annotated as
    /// rate limits even when the venue hides them behind a 400 with a code.
    pub fn from_http(status: reqwest::StatusCode, body: &str) -> Self {
        if status.as_u16() == 429 || body.contains("rate limit") || body.contains("Too Many") {
            TradeError::RateLimit(format!("{status}: {body}"))
        } else if body.contains("no route") || body.contains("COULD_NOT_FIND_ANY_ROUTE") {
            TradeError::NoRoute(body.to_string())
        } else {
            TradeError::Transient(format!("{status}: {body}"))
        }
    }
}

impl From<reqwest::Error> for TradeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TradeError::Transient(format!("timeout: {err}"))
        } else {
            TradeError::Transient(err.to_string())
        }
    }
}

pub type TradeResult<T> = Result<T, TradeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_backoff_classification() {
        assert!(TradeError::RateLimit("429".into()).extends_backoff());
        assert!(TradeError::NoRoute("dry".into()).extends_backoff());
        assert!(TradeError::NoBalance("M".into()).extends_backoff());
        assert!(!TradeError::Transient("503".into()).extends_backoff());
    }

    #[test]
    fn test_http_classification() {
        let e = TradeError::from_http(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(e, TradeError::RateLimit(_)));

        let e = TradeError::from_http(StatusCode::BAD_REQUEST, "COULD_NOT_FIND_ANY_ROUTE");
        assert!(matches!(e, TradeError::NoRoute(_)));

        let e = TradeError::from_http(StatusCode::BAD_GATEWAY, "upstream died");
        assert!(matches!(e, TradeError::Transient(_)));
    }
}
