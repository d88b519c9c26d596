/// Chain-wide constants shared across the engine

/// Canonical wrapped-SOL mint used as the native leg of every swap
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Canonical USDC mint (bridge intermediate + default exclusion)
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// USDT mint (default exclusion)
pub const USDT_MINT: &str = "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB";

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Mints minted through Pump.fun carry this suffix; used to pick the
/// venue-fallback path when the aggregator has not indexed the pool yet.
pub const PUMP_MINT_SUFFIX: &str = "pump";

/// Mints that are never treated as a smart-money buy
pub fn default_excluded_mints() -> Vec<String> {
    vec![
        WSOL_MINT.to_string(),
        USDC_MINT.to_string(),
        USDT_MINT.to_string(),
    ]
}

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

pub fn sol_to_lamports(sol: f64) -> u64 {
    (sol * LAMPORTS_PER_SOL as f64).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sol_lamport_round_trip() {
        assert_eq!(sol_to_lamports(1.0), LAMPORTS_PER_SOL);
        assert_eq!(sol_to_lamports(0.05), 50_000_000);
        assert!((lamports_to_sol(1_500_000_000) - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_exclusions_contain_native_wrap() {
        let excluded = default_excluded_mints();
        assert!(excluded.contains(&WSOL_MINT.to_string()));
        assert!(excluded.contains(&USDC_MINT.to_string()));
    }
}
