/// Application name, used in user-facing messages.
pub const APP_NAME: &str = "weft";

/// Name of the file at each module root that declares its dependencies.
pub const MANIFEST_FILENAME: &str = "MODULE";

/// Directory under the workspace root holding one working copy per dependency.
pub const DEPS_DIR_NAME: &str = "DEPS";

/// Directory under the workspace root reserved for build output.
pub const BUILD_DIR_NAME: &str = "BUILD";

/// Marker file placed in managed directories.
pub const WARNING_FILENAME: &str = "WARNING.readme.txt";

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// Upper bound on discovery/resolution/checkout rounds in a single sync.
pub const MAX_SYNC_ROUNDS: usize = 16;
