/// Trade execution stack
///
/// Aggregator routing with venue fallback, multi-endpoint broadcast, and
/// the executor that fronts it all for the pipeline and watchers.

pub mod broadcaster;
pub mod chain;
pub mod executor;
pub mod jupiter;
pub mod pump;
pub mod router;

pub use broadcaster::{parse_endpoints, BroadcastReceipt, Broadcaster};
pub use chain::{owner_mint_delta, ChainReader, TokenBalance};
pub use executor::{Executor, SellRequest, TradeThrottle};
pub use jupiter::JupiterRouter;
pub use pump::{PumpVenue, VenueTradeParams};
pub use router::SwapRouter;
