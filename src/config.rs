use anyhow::Context;
use std::path::PathBuf;

pub const DEFAULT_LOG_FILTER: &str = "rollcalld=info";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// `tracing_subscriber::EnvFilter` directive string.
    pub log_filter: String,
    /// Fixed seed for the pick generator; OS entropy when unset.
    pub seed: Option<u64>,
    /// Workspace to open before the first request.
    pub workspace: Option<PathBuf>,
}

impl Config {
    /// Reads `ROLLCALLD_*` variables, after loading `.env` if one exists.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let log_filter =
            non_empty("ROLLCALLD_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let seed = non_empty("ROLLCALLD_SEED")
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("ROLLCALLD_SEED must be an unsigned integer, got {raw:?}"))
            })
            .transpose()?;
        let workspace = non_empty("ROLLCALLD_WORKSPACE").map(PathBuf::from);

        Ok(Self {
            log_filter,
            seed,
            workspace,
        })
    }
}
