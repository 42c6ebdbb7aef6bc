//! Where the client keeps its files, per platform (resolved with `dirs`).
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\callme-client\
//!   macOS:   ~/Library/Application Support/callme-client/
//!   Linux:   ~/.config/callme-client/

use std::path::PathBuf;

/// Resolved locations of the client's files.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    pub settings_file: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "callme-client";

    /// Uses the working directory when the platform has no config dir.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);
        let settings_file = config_dir.join("settings.toml");

        Self {
            config_dir,
            settings_file,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_live_in_the_app_dir() {
        let paths = AppPaths::new();
        assert!(paths.config_dir.ends_with("callme-client"));
        assert!(paths
            .settings_file
            .file_name()
            .is_some_and(|n| n == "settings.toml"));
        assert!(paths.settings_file.starts_with(&paths.config_dir));
    }
}
