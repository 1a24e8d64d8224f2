//! Cross-platform service paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\neural-style\
//!   macOS:   ~/Library/Application Support/neural-style/
//!   Linux:   ~/.config/neural-style/
//!
//! Data dir (style models, rendered output):
//!   Windows: %LOCALAPPDATA%\neural-style\
//!   macOS:   ~/Library/Application Support/neural-style/
//!   Linux:   ~/.local/share/neural-style/

use std::path::PathBuf;

/// Holds all resolved service directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Default directory holding one weight file per style.
    pub models_dir: PathBuf,
    /// Directory the console transport writes stylized images into.
    pub output_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "neural-style";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        Self {
            settings_file: config_dir.join("settings.toml"),
            config_dir,
            models_dir: data_dir.join("models"),
            output_dir: data_dir.join("output"),
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
    fn paths_are_non_empty() {
        let paths = AppPaths::new();
        assert!(paths.config_dir.to_str().is_some_and(|s| !s.is_empty()));
        assert!(paths.models_dir.ends_with("models"));
        assert!(paths.output_dir.ends_with("output"));
        assert!(paths
            .settings_file
            .file_name()
            .is_some_and(|n| n == "settings.toml"));
    }
}
