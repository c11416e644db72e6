// Application settings
// Loaded from ~/.config/gridcalc/settings.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// How eagerly reads recompute stale formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecalcPolicy {
    /// Never recompute on read; stale cells render empty
    Skip,
    /// Recompute stale cells on read (default)
    #[default]
    Lazy,
    /// Recompute on every read
    Force,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Formula
    #[serde(rename = "formula.recalcPolicy")]
    pub recalc_policy: RecalcPolicy,

    // Display
    #[serde(rename = "display.precision")]
    pub precision: Option<u8>, // None = general formatting

    // Output
    #[serde(rename = "output.logReports")]
    pub log_reports: bool,

    // File
    #[serde(rename = "file.recentFilesLimit")]
    pub recent_files_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // Formula
            recalc_policy: RecalcPolicy::default(),
            // Display
            precision: None,
            // Output
            log_reports: false,
            // File
            recent_files_limit: 10,
        }
    }
}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gridcalc");
        config_dir.join("settings.json")
    }

    /// Load settings from disk, falling back to defaults
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load settings from an explicit path, falling back to defaults
    pub fn load_from(path: &PathBuf) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => {
                // Strip comments (lines starting with //)
                let cleaned: String = contents
                    .lines()
                    .filter(|line| !line.trim().starts_with("//"))
                    .collect::<Vec<_>>()
                    .join("\n");

                match serde_json::from_str(&cleaned) {
                    Ok(settings) => settings,
                    Err(e) => {
                        eprintln!("Error parsing settings.json: {}", e);
                        eprintln!("Using default settings");
                        Self::default()
                    }
                }
            }
            Err(e) => {
                eprintln!("Error reading settings.json: {}", e);
                Self::default()
            }
        }
    }

}
