/// Application name
pub const APP_NAME: &str = "Plinth";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Separator between a plugin key and a module key in a complete key
pub const MODULE_KEY_SEPARATOR: char = ':';

/// Separator between a plugin key and a restart marker suffix in the persisted state map.
/// NUL never appears in plugin or module keys.
pub const RESTART_MARKER_SEPARATOR: char = '\u{0}';

/// Environment variable overriding the enable timeout, in whole seconds
pub const ENABLE_TIMEOUT_ENV: &str = "PLINTH_ENABLE_TIMEOUT_SECS";

/// Default convergence timeout for plugins left in `Enabling`
pub const DEFAULT_ENABLE_TIMEOUT_SECS: u64 = 60;

/// Default poll step of the convergence wait
pub const DEFAULT_ENABLE_POLL_INTERVAL_MS: u64 = 200;
