//! Database configuration.

/// Geohash precision used for geo index cells.
///
/// Precision 7 cells are roughly 150 m on a side, comfortably below the
/// kilometre-scale radii the engine is tuned for.
pub const DEFAULT_GEO_PRECISION: usize = 7;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to error if the database already exists.
    pub error_if_exists: bool,

    /// Whether to sync the log on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Log size that triggers an automatic checkpoint after a commit.
    pub max_wal_size: u64,

    /// Geohash precision for geo index cells.
    pub geo_precision: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            sync_on_commit: true,
            max_wal_size: 64 * 1024 * 1024, // 64 MB
            geo_precision: DEFAULT_GEO_PRECISION,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if the database exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets whether to sync the log on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the log size that triggers an automatic checkpoint.
    #[must_use]
    pub const fn max_wal_size(mut self, size: u64) -> Self {
        self.max_wal_size = size;
        self
    }

    /// Sets the geohash precision for geo index cells.
    #[must_use]
    pub const fn geo_precision(mut self, precision: usize) -> Self {
        self.geo_precision = precision;
        self
    }
}
