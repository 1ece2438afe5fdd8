use std::time::Duration;

use crate::attribution::LOOKBACK_CAP_DAYS;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: String,
    /// DuckDB size string such as `"1GB"` or `"512MB"`.
    pub duckdb_memory_limit: String,
    /// Max number of user ids bound into a single store statement.
    pub user_batch_size: usize,
    pub lookback_cap_days: u32,
    pub query_timeout_secs: u64,
    /// Per-user assignment logging. Off by default; very noisy on large projects.
    pub attribution_debug: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            data_dir: std::env::var("TOUCHPOINT_DATA_DIR")
                .unwrap_or_else(|_| "./data".to_string()),
            duckdb_memory_limit: std::env::var("TOUCHPOINT_DUCKDB_MEMORY")
                .unwrap_or_else(|_| "1GB".to_string()),
            user_batch_size: {
                let size: usize = std::env::var("TOUCHPOINT_USER_BATCH_SIZE")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse()
                    .map_err(|e| format!("invalid user batch size: {e}"))?;
                if size == 0 {
                    return Err("TOUCHPOINT_USER_BATCH_SIZE must be greater than zero".to_string());
                }
                size
            },
            lookback_cap_days: std::env::var("TOUCHPOINT_LOOKBACK_CAP_DAYS")
                .unwrap_or_else(|_| LOOKBACK_CAP_DAYS.to_string())
                .parse()
                .unwrap_or(LOOKBACK_CAP_DAYS),
            query_timeout_secs: std::env::var("TOUCHPOINT_QUERY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
            attribution_debug: std::env::var("TOUCHPOINT_ATTRIBUTION_DEBUG")
                .map(|v| v == "true")
                .unwrap_or(false),
        })
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn duckdb_path(&self) -> String {
        format!("{}/touchpoint.db", self.data_dir.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const VARS: [&str; 6] = [
        "TOUCHPOINT_DATA_DIR",
        "TOUCHPOINT_DUCKDB_MEMORY",
        "TOUCHPOINT_USER_BATCH_SIZE",
        "TOUCHPOINT_LOOKBACK_CAP_DAYS",
        "TOUCHPOINT_QUERY_TIMEOUT_SECS",
        "TOUCHPOINT_ATTRIBUTION_DEBUG",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn defaults_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        clear_env();
        let config = Config::from_env().expect("config");
        assert_eq!(config.data_dir, "./data");
        assert_eq!(config.duckdb_memory_limit, "1GB");
        assert_eq!(config.user_batch_size, 2000);
        assert_eq!(config.lookback_cap_days, LOOKBACK_CAP_DAYS);
        assert_eq!(config.query_timeout(), Duration::from_secs(300));
        assert!(!config.attribution_debug);
        assert_eq!(config.duckdb_path(), "./data/touchpoint.db");
    }

    #[test]
    fn reads_overrides_from_env() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        clear_env();
        std::env::set_var("TOUCHPOINT_DATA_DIR", "/var/lib/touchpoint/");
        std::env::set_var("TOUCHPOINT_DUCKDB_MEMORY", "512MB");
        std::env::set_var("TOUCHPOINT_USER_BATCH_SIZE", "50");
        std::env::set_var("TOUCHPOINT_LOOKBACK_CAP_DAYS", "90");
        std::env::set_var("TOUCHPOINT_QUERY_TIMEOUT_SECS", "12");
        std::env::set_var("TOUCHPOINT_ATTRIBUTION_DEBUG", "true");
        let config = Config::from_env().expect("config");
        clear_env();

        assert_eq!(config.duckdb_memory_limit, "512MB");
        assert_eq!(config.user_batch_size, 50);
        assert_eq!(config.lookback_cap_days, 90);
        assert_eq!(config.query_timeout(), Duration::from_secs(12));
        assert!(config.attribution_debug);
        assert_eq!(config.duckdb_path(), "/var/lib/touchpoint/touchpoint.db");
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        clear_env();
        std::env::set_var("TOUCHPOINT_USER_BATCH_SIZE", "0");
        let err = Config::from_env().expect_err("zero batch size");
        clear_env();
        assert!(err.contains("greater than zero"), "{err}");
    }
}
