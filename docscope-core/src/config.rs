use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::topics::Rgb;

pub const DEFAULT_ANALYZER_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_MAX_FILES: usize = 3;
pub const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_RESULTS_PAGE_SIZE: usize = 5;
pub const ANALYZER_URL_ENV: &str = "DOCSCOPE_ANALYZER_URL";

pub const DEFAULT_PALETTE: [Rgb; 5] = [
    Rgb(255, 214, 102),
    Rgb(129, 199, 132),
    Rgb(100, 181, 246),
    Rgb(240, 128, 128),
    Rgb(186, 148, 255),
];

/// Settings loaded from `config.toml`. Every key is optional on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub analyzer_url: String,
    pub request_timeout_secs: u64,
    pub max_files: usize,
    pub max_file_size: usize,
    pub results_page_size: usize,
    pub default_min_score: f32,
    pub palette: Vec<Rgb>,
    pub pdfium_library: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            analyzer_url: DEFAULT_ANALYZER_URL.to_string(),
            request_timeout_secs: 300,
            max_files: DEFAULT_MAX_FILES,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            results_page_size: DEFAULT_RESULTS_PAGE_SIZE,
            default_min_score: 0.5,
            palette: DEFAULT_PALETTE.to_vec(),
            pdfium_library: None,
        }
    }
}

impl Config {
    pub fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("net", "docscope", "docscope")
    }

    pub fn default_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to decode config file {:?}", path))?;
        Ok(config.sanitized())
    }

    /// Explicit path if given, otherwise the platform location when it exists,
    /// otherwise defaults. Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ANALYZER_URL_ENV).filter(|url| !url.trim().is_empty()) {
            self.analyzer_url = url.trim().to_string();
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.max_files == 0 {
            self.max_files = defaults.max_files;
        }
        if self.results_page_size == 0 {
            self.results_page_size = defaults.results_page_size;
        }
        if self.palette.is_empty() {
            self.palette = defaults.palette;
        }
        if !(0.0..=1.0).contains(&self.default_min_score) {
            self.default_min_score = defaults.default_min_score;
        }
        self.analyzer_url = self.analyzer_url.trim_end_matches('/').to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "analyzer_url = \"http://analysis.local:8080/\"\nresults_page_size = 6\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.analyzer_url, "http://analysis.local:8080");
        assert_eq!(config.results_page_size, 6);
        assert_eq!(config.max_files, DEFAULT_MAX_FILES);
        assert_eq!(config.max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert_eq!(config.palette.len(), DEFAULT_PALETTE.len());
    }

    #[test]
    fn invalid_values_fall_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_files = 0\npalette = []\ndefault_min_score = 3.0\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.max_files, DEFAULT_MAX_FILES);
        assert_eq!(config.palette, DEFAULT_PALETTE.to_vec());
        assert_eq!(config.default_min_score, 0.5);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_files = \"three\"").unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn env_overrides_analyzer_url() {
        let mut config = Config::default();
        config.apply_env(|key| {
            (key == ANALYZER_URL_ENV).then(|| "http://10.0.0.2:5000".to_string())
        });
        assert_eq!(config.analyzer_url, "http://10.0.0.2:5000");

        let mut untouched = Config::default();
        untouched.apply_env(|_| Some("   ".to_string()));
        assert_eq!(untouched.analyzer_url, DEFAULT_ANALYZER_URL);
    }
}
