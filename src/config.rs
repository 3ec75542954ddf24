use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

/// Startup configuration for the core.
///
/// Only two environment knobs are recognized: the data root for the journal
/// and an optional RNG seed that makes Monte Carlo simulation deterministic.
/// Everything else is runtime configuration supplied through
/// `StrategyParameters` and the engine constructors.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Directory the journal writes under.
    pub data_root: PathBuf,
    /// Seed for Monte Carlo simulation. `None` seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl CoreConfig {
    pub fn from_env() -> Result<Self> {
        // Best effort: a missing .env file is not an error.
        dotenvy::dotenv().ok();

        let data_root = env::var("PAIRRISK_DATA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let rng_seed = match env::var("PAIRRISK_RNG_SEED") {
            Ok(raw) => Some(
                raw.parse::<u64>()
                    .context("PAIRRISK_RNG_SEED must be an unsigned integer")?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            data_root,
            rng_seed,
        })
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            rng_seed: None,
        }
    }
}
