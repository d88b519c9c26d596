use anyhow::Result;
use solana_sdk::signature::Signer;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shadow::config::Config;
use shadow::core::lamports_to_sol;
use shadow::notify::Notifier;
use shadow::oracle::PriceOracle;
use shadow::pipeline::Pipeline;
use shadow::server::{self, AppState};
use shadow::store::{PositionStore, SeenCache};
use shadow::trading::{
    Broadcaster, Executor, JupiterRouter, PumpVenue, SwapRouter, VenueTradeParams,
};
use shadow::wallets::{HeliusRegistrar, TrackedWallets, WalletSelector, WalletService};
use shadow::watcher::Watchers;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = Arc::new(Config::from_env()?);
    cfg.ensure_data_dir()?;

    // Startup aborts on bad signer material or unusable endpoints (Config).
    let keypair = Arc::new(cfg.load_keypair()?);
    let broadcaster = Arc::new(Broadcaster::new(
        &cfg.rpc_endpoints,
        cfg.broadcast_max_wait_ms,
    )?);

    let seen = Arc::new(SeenCache::load(cfg.seen_snapshot_path()));
    let positions = Arc::new(PositionStore::load(cfg.positions_snapshot_path()));
    let oracle = Arc::new(PriceOracle::new(&cfg));
    let notifier = Notifier::new(cfg.telegram_bot_token.clone(), cfg.telegram_chat_id.clone());

    let jupiter = JupiterRouter::new(
        cfg.jupiter_base_url.clone(),
        cfg.jup_slippage_bps,
        cfg.jup_priority_fee,
        broadcaster.primary(),
    );
    let venue = PumpVenue::new(VenueTradeParams {
        // the venue API takes whole percents
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
        Arc::clone(&keypair),
        router,
        Arc::clone(&oracle),
        Arc::clone(&broadcaster),
    ));
    let watchers = Watchers::new(
        Arc::clone(&cfg),
        Arc::clone(&positions),
        Arc::clone(&oracle),
        Arc::clone(&executor),
        notifier.clone(),
    );

    log_startup_summary(&cfg, &keypair, &broadcaster).await;

    // Positions that survived a restart get their watchers back.
    for mint in positions.open_mints() {
        info!("resuming watcher for persisted position {mint}");
        watchers.start(&mint);
    }

    let tracked = Arc::new(TrackedWallets::new());
    let selector = WalletSelector::new(&cfg, broadcaster.primary());
    let registrar = HeliusRegistrar::from_config(&cfg);
    let wallets = Arc::new(WalletService::new(selector, registrar, Arc::clone(&tracked)));

    let pipeline = Pipeline::new(
        Arc::clone(&cfg),
        Arc::clone(&seen),
        Arc::clone(&positions),
        Arc::clone(&executor),
        Arc::clone(&watchers),
        notifier.clone(),
        Arc::clone(&tracked),
    );

    // Initial wallet refresh, then the hourly task.
    match wallets.refresh().await {
        Ok(addresses) => info!("tracking {} wallet(s)", addresses.len()),
        Err(e) => warn!("initial wallet refresh failed (will retry): {e}"),
    }
    spawn_refresh_task(Arc::clone(&wallets), cfg.wallet_refresh_minutes);
    spawn_maintenance_task(Arc::clone(&seen), cfg.buy_debounce_minutes);

    notifier
        .send(&format!(
            "🚀 engine started | mode={} | tracked={}",
            cfg.trade_mode,
            tracked.len()
        ))
        .await;

    let state = AppState {
        pipeline,
        wallets,
        auth_token: cfg.webhook_auth_token.clone(),
    };

    let shutdown = async {
        let _ = signal::ctrl_c().await;
        info!("🛑 shutdown requested");
    };

    let served = server::serve(state, &cfg.bind_addr, shutdown).await;

    // Snapshot durable state before exit regardless of how serving ended.
    if let Err(e) = seen.snapshot() {
        warn!("seen snapshot on shutdown failed: {e}");
    }
    positions.persist();
    info!("state snapshotted, exiting");

    served?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn log_startup_summary(
    cfg: &Config,
    keypair: &solana_sdk::signature::Keypair,
    broadcaster: &Broadcaster,
) {
    let operator = keypair.pubkey();
    let balance_sol = match broadcaster.primary().get_balance(&operator).await {
        Ok(lamports) => lamports_to_sol(lamports),
        Err(e) => {
            warn!("could not fetch operator balance: {e}");
            0.0
        }
    };

    info!(
        "🚀 startup | operator={operator} | sol={balance_sol:.4} | mode={} | buy_sol={:.4} | tp={:.1}% | sl={:.1}%",
        cfg.trade_mode, cfg.buy_sol_amount, cfg.take_profit_percent, cfg.stop_loss_percent,
    );
    info!(
        "endpoints | rpc={} | aggregator={} | venue_fallback={}",
        cfg.rpc_endpoints, cfg.jupiter_base_url, cfg.pump_fallback_enabled,
    );
}

fn spawn_refresh_task(wallets: Arc<WalletService>, refresh_minutes: u64) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(refresh_minutes.max(1) * 60));
        interval.tick().await; // first tick is immediate; refresh already ran
        loop {
            interval.tick().await;
            match wallets.refresh().await {
                Ok(addresses) => info!("🔄 refresh | tracking {} wallet(s)", addresses.len()),
                Err(e) => error!("scheduled wallet refresh failed: {e}"),
            }
        }
    });
}

/// Periodically purge expired dedup entries and snapshot the cache.
fn spawn_maintenance_task(seen: Arc<SeenCache>, debounce_minutes: i64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            seen.purge_expired(debounce_minutes * 60 * 1000);
            if let Err(e) = seen.snapshot() {
                warn!("seen snapshot failed: {e}");
            }
        }
    });
}
