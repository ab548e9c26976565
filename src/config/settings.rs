use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/database.yml";
pub const DEFAULT_LOCAL_PORT: u16 = 13306;
pub const DEFAULT_REMOTE_PORT: u16 = 3306;
pub const DEFAULT_TIMESTAMP_COLUMN: &str = "created_at";
pub const DEFAULT_EXCLUDED_TABLE: &str = "schema_migrations";
pub const DEFAULT_SMALL_TABLE_THRESHOLD: i64 = 1000;

/// Runtime knobs shared by every operation of one invocation.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub config_path: PathBuf,
    /// Local end of the SSH forward. Two concurrent runs must not share it.
    pub local_port: u16,
    /// Port of the source database as seen from the gateway, unless the
    /// environment sets its own `port`.
    pub remote_port: u16,
    pub tunnel_timeout: Duration,
    pub command_timeout: Duration,
    /// Creation timestamp column used by time-window syncs.
    pub timestamp_column: String,
    /// Bookkeeping table never compared by id.
    pub excluded_table: String,
    pub dry_run: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            local_port: DEFAULT_LOCAL_PORT,
            remote_port: DEFAULT_REMOTE_PORT,
            tunnel_timeout: Duration::from_secs(20),
            command_timeout: Duration::from_secs(6 * 60 * 60),
            timestamp_column: DEFAULT_TIMESTAMP_COLUMN.to_string(),
            excluded_table: DEFAULT_EXCLUDED_TABLE.to_string(),
            dry_run: false,
        }
    }
}
