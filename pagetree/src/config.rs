//! Storage environment configuration.
//!
//! Options are fixed when an environment is opened. They can be built in code
//! or loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `PAGETREE_PAGE_SIZE`: Page size in bytes, a power of two in 512..=65536 (default: `4096`)
//! - `PAGETREE_MIN_FILL`: Fraction of a page below which a node is rebalanced,
//!   in 0.0..=0.5 (default: `0.25`)
//! - `PAGETREE_PATH`: Backing file; unset means in-memory storage
//! - `PAGETREE_SYNC_ON_COMMIT`: Whether commits fsync (default: `true`)
//! - `PAGETREE_MAX_PAGES`: Largest file size in pages (default: unbounded)

use std::path::PathBuf;

use crate::storage::page::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE};

/// Options for opening a [`StorageEnvironment`](crate::storage::StorageEnvironment).
#[derive(Debug, Clone, PartialEq)]
pub struct StorageEnvironmentOptions {
    /// Page size in bytes. Fixed at creation; reopening with another size fails.
    pub page_size: usize,
    /// Fraction of a page's usable space a non-root node must fill before
    /// a delete triggers rebalancing.
    pub min_fill: f64,
    /// Backing file. `None` keeps everything in memory.
    pub path: Option<PathBuf>,
    /// Whether commits fsync before and after writing the superblock.
    pub sync_on_commit: bool,
    /// Upper bound on the file size in pages.
    pub max_pages: Option<u64>,
}

/// Error returned when options are invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is missing.
    MissingEnvVar(String),
    /// An option has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnvVar(name) => {
                write!(f, "missing required environment variable: {name}")
            }
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for StorageEnvironmentOptions {
    fn default() -> Self {
        Self {
            page_size: Self::DEFAULT_PAGE_SIZE,
            min_fill: Self::DEFAULT_MIN_FILL,
            path: None,
            sync_on_commit: Self::DEFAULT_SYNC_ON_COMMIT,
            max_pages: None,
        }
    }
}

impl StorageEnvironmentOptions {
    /// Default page size.
    pub const DEFAULT_PAGE_SIZE: usize = DEFAULT_PAGE_SIZE;
    /// Default minimum fill fraction.
    pub const DEFAULT_MIN_FILL: f64 = 0.25;
    /// Default fsync policy.
    pub const DEFAULT_SYNC_ON_COMMIT: bool = true;
    /// Largest accepted minimum fill fraction.
    pub const MAX_MIN_FILL: f64 = 0.5;

    /// In-memory options with the given page size.
    #[must_use]
    pub fn in_memory(page_size: usize) -> Self {
        Self {
            page_size,
            ..Self::default()
        }
    }

    /// File-backed options with default settings.
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Check every option.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `page_size` is not a power of two in 512..=65536
    /// - `min_fill` is not in 0.0..=0.5
    /// - `max_pages` leaves no room beyond the two superblocks and the root catalog
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.page_size.is_power_of_two()
            || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size)
        {
            return Err(ConfigError::InvalidValue {
                name: "page_size".to_string(),
                message: format!(
                    "{} is not a power of two between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}",
                    self.page_size
                ),
            });
        }

        if !(0.0..=Self::MAX_MIN_FILL).contains(&self.min_fill) {
            return Err(ConfigError::InvalidValue {
                name: "min_fill".to_string(),
                message: format!(
                    "{} is outside 0.0..={}",
                    self.min_fill,
                    Self::MAX_MIN_FILL
                ),
            });
        }

        if let Some(max_pages) = self.max_pages
            && max_pages < 3
        {
            return Err(ConfigError::InvalidValue {
                name: "max_pages".to_string(),
                message: format!("{max_pages} is below the minimum of 3 pages"),
            });
        }

        Ok(())
    }

    /// Load options from environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but unparseable, or the resulting
    /// options fail [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load options through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let options = Self {
            page_size: parse_var(&lookup, "PAGETREE_PAGE_SIZE")?.unwrap_or(defaults.page_size),
            min_fill: parse_var(&lookup, "PAGETREE_MIN_FILL")?.unwrap_or(defaults.min_fill),
            path: lookup("PAGETREE_PATH")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            sync_on_commit: parse_var(&lookup, "PAGETREE_SYNC_ON_COMMIT")?
                .unwrap_or(defaults.sync_on_commit),
            max_pages: parse_var(&lookup, "PAGETREE_MAX_PAGES")?,
        };
        options.validate()?;
        Ok(options)
    }
}

/// Parse an optional variable.
fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    lookup(name)
        .map(|value| {
            value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("'{value}' could not be parsed"),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let options = StorageEnvironmentOptions::default();
        assert_eq!(options.page_size, 4096);
        assert!((options.min_fill - 0.25).abs() < f64::EPSILON);
        assert!(options.path.is_none());
        assert!(options.sync_on_commit);
        assert!(options.max_pages.is_none());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_reads_every_variable() {
        let options = StorageEnvironmentOptions::from_lookup(lookup(&[
            ("PAGETREE_PAGE_SIZE", "8192"),
            ("PAGETREE_MIN_FILL", "0.4"),
            ("PAGETREE_PATH", "/tmp/pagetree.db"),
            ("PAGETREE_SYNC_ON_COMMIT", "false"),
            ("PAGETREE_MAX_PAGES", "1000"),
        ]))
        .expect("valid options");

        assert_eq!(options.page_size, 8192);
        assert!((options.min_fill - 0.4).abs() < f64::EPSILON);
        assert_eq!(options.path, Some(PathBuf::from("/tmp/pagetree.db")));
        assert!(!options.sync_on_commit);
        assert_eq!(options.max_pages, Some(1000));
    }

    #[test]
    fn test_from_lookup_defaults_when_unset() {
        let options = StorageEnvironmentOptions::from_lookup(lookup(&[])).expect("defaults");
        assert_eq!(options, StorageEnvironmentOptions::default());
    }

    #[test]
    fn test_unparseable_value() {
        let error =
            StorageEnvironmentOptions::from_lookup(lookup(&[("PAGETREE_PAGE_SIZE", "big")]))
                .expect_err("should fail");
        assert_eq!(
            error.to_string(),
            "invalid value for PAGETREE_PAGE_SIZE: 'big' could not be parsed"
        );
    }

    #[test]
    fn test_validate_page_size() {
        for page_size in [0, 256, 1000, 131_072] {
            assert!(
                StorageEnvironmentOptions::in_memory(page_size)
                    .validate()
                    .is_err(),
                "page size {page_size} should be rejected"
            );
        }
        for page_size in [512, 4096, 65536] {
            assert!(StorageEnvironmentOptions::in_memory(page_size).validate().is_ok());
        }
    }

    #[test]
    fn test_validate_min_fill_and_max_pages() {
        let mut options = StorageEnvironmentOptions {
            min_fill: 0.6,
            ..StorageEnvironmentOptions::default()
        };
        assert!(options.validate().is_err());

        options.min_fill = 0.0;
        options.max_pages = Some(2);
        assert!(options.validate().is_err());

        options.max_pages = Some(3);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_config_error_display_missing() {
        let error = ConfigError::MissingEnvVar("PAGETREE_PATH".to_string());
        assert_eq!(
            error.to_string(),
            "missing required environment variable: PAGETREE_PATH"
        );
    }
}
