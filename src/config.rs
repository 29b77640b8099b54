//! Configuration and paths

use std::path::{Path, PathBuf};

/// All configurable paths and platform capability flags
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub store_file: PathBuf,
    pub lines_file: PathBuf,
    /// Whether the platform grants access to line/slot information
    pub read_line_info: bool,
    /// Whether the platform grants access to the line's own phone number
    pub read_phone_numbers: bool,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().expect("Could not find home directory");
        Self::with_data_dir(home.join(".sms-relay"))
    }
}

impl Config {
    /// Create config rooted at a specific data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            store_file: data_dir.join("store.db"),
            lines_file: data_dir.join("lines.json"),
            data_dir,
            read_line_info: true,
            read_phone_numbers: true,
        }
    }

    /// Create config for testing with custom paths
    pub fn for_test(temp_dir: &Path) -> Self {
        Self::with_data_dir(temp_dir)
    }
}

/// Line identifier sentinel meaning "no line / test mode"
pub const TEST_LINE_ID: i64 = -1;

/// Synthetic sender used for test sends
pub const TEST_SENDER: &str = "+1234567890";

/// Synthetic recipient used for test sends
pub const TEST_RECIPIENT: &str = "+0987654321";
