//! Centralized configuration and builder for EmberDB.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - StoreConfig::from_env() reads EDB_* variables; StoreBuilder is the
//!   programmatic path that Db::open() consumes.
//!
//! Семантика полей:
//! - workspace_bytes: жёсткий бюджет RAM, проверяется на open (NoSpace).
//! - read_batch_rows: advisory — блок несёт не более 74 строк, так что
//!   итератор и так декодирует пачками меньше любого разумного значения.
//! - commit_interval_ms: 0 = закрытие блока только по размеру; иначе write
//!   дополнительно закрывает открытый блок по истечении интервала.
//! - gc_non_blocking: при исчерпанной квоте erase write возвращает Busy
//!   вместо ожидания конца окна.

use std::fmt;

#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// RAM budget for control block + zone map + staging arrays.
    /// Env: EDB_WORKSPACE_BYTES (default 1 MiB)
    pub workspace_bytes: usize,

    /// Advisory iterator batching size.
    /// Env: EDB_READ_BATCH_ROWS (default 256)
    pub read_batch_rows: u32,

    /// Time-based block close cadence; 0 = size-only.
    /// Env: EDB_COMMIT_INTERVAL_MS (default 0)
    pub commit_interval_ms: u32,

    /// Return Busy instead of spinning when the GC erase quota is exhausted.
    /// Env: EDB_GC_NON_BLOCKING (default false; "1|true|on|yes" => true)
    pub gc_non_blocking: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            workspace_bytes: 1 << 20,
            read_batch_rows: 256,
            commit_interval_ms: 0,
            gc_non_blocking: false,
        }
    }
}

fn env_flag(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "on" || s == "yes"
}

impl StoreConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("EDB_WORKSPACE_BYTES") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.workspace_bytes = n;
            }
        }
        if let Ok(v) = std::env::var("EDB_READ_BATCH_ROWS") {
            if let Ok(n) = v.trim().parse::<u32>() {
                cfg.read_batch_rows = n;
            }
        }
        if let Ok(v) = std::env::var("EDB_COMMIT_INTERVAL_MS") {
            if let Ok(n) = v.trim().parse::<u32>() {
                cfg.commit_interval_ms = n;
            }
        }
        if let Ok(v) = std::env::var("EDB_GC_NON_BLOCKING") {
            cfg.gc_non_blocking = env_flag(&v);
        }

        cfg
    }

    /// Fluent setters (builder-style) to override specific fields.

    pub fn with_workspace_bytes(mut self, bytes: usize) -> Self {
        self.workspace_bytes = bytes;
        self
    }

    pub fn with_read_batch_rows(mut self, rows: u32) -> Self {
        self.read_batch_rows = rows;
        self
    }

    pub fn with_commit_interval_ms(mut self, ms: u32) -> Self {
        self.commit_interval_ms = ms;
        self
    }

    pub fn with_gc_non_blocking(mut self, on: bool) -> Self {
        self.gc_non_blocking = on;
        self
    }
}

impl fmt::Display for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StoreConfig {{ workspace_bytes: {}, read_batch_rows: {}, \
             commit_interval_ms: {}, gc_non_blocking: {} }}",
            self.workspace_bytes, self.read_batch_rows, self.commit_interval_ms, self.gc_non_blocking,
        )
    }
}

/// Lightweight builder that produces a StoreConfig.
#[derive(Clone, Debug)]
pub struct StoreBuilder {
    cfg: StoreConfig,
}

impl Default for StoreBuilder {
    fn default() -> Self {
        // Start from env to keep deployments overridable, then allow code overrides.
        Self {
            cfg: StoreConfig::from_env(),
        }
    }
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a clean default (without reading env).
    pub fn from_default() -> Self {
        Self {
            cfg: StoreConfig::default(),
        }
    }

    pub fn workspace_bytes(mut self, bytes: usize) -> Self {
        self.cfg.workspace_bytes = bytes;
        self
    }

    pub fn read_batch_rows(mut self, rows: u32) -> Self {
        self.cfg.read_batch_rows = rows;
        self
    }

    pub fn commit_interval_ms(mut self, ms: u32) -> Self {
        self.cfg.commit_interval_ms = ms;
        self
    }

    pub fn gc_non_blocking(mut self, on: bool) -> Self {
        self.cfg.gc_non_blocking = on;
        self
    }

    /// Finish the builder and obtain the configuration.
    pub fn build(self) -> StoreConfig {
        self.cfg
    }
}
