use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::domain::{BandPolicy, Prefix};

/// Configuration for result computation and identifier allocation.
///
/// This struct holds settings that control identifier formatting, allocation
/// retries and the width of the warning band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Versions", into = "Versions")]
pub struct Config {
    /// The number of digits in the sequence part of an identifier.
    ///
    /// Sequences are padded to this width with leading zeros.
    /// For example, '0042' (4 digits) or '000042' (6 digits).
    digits: usize,

    /// How many times an increment is attempted before allocation fails.
    retry_budget: u32,

    /// Pause before the first retry. Each further retry waits one more
    /// multiple of this.
    retry_backoff: Duration,

    /// The prefix used for tenants without a branded prefix.
    generic_prefix: Prefix,

    /// The prefix used when a tenant's display name has no letters.
    fallback_prefix: Prefix,

    /// Warning band width as a fraction of the reference range width.
    band: BandPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            digits: default_digits(),
            retry_budget: default_retry_budget(),
            retry_backoff: Duration::from_millis(default_retry_backoff_ms()),
            generic_prefix: prefix_or_panic(DEFAULT_GENERIC_PREFIX),
            fallback_prefix: prefix_or_panic(DEFAULT_FALLBACK_PREFIX),
            band: BandPolicy::CANONICAL,
        }
    }
}

impl Config {
    /// Loads the configuration from a TOML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the TOML content is
    /// invalid.
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {e}"))?;
        toml::from_str(&content).map_err(|e| format!("Failed to parse config file: {e}"))
    }

    /// Saves the configuration to a TOML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized to TOML or if
    /// the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content =
            toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {e}"))?;
        std::fs::write(path, content).map_err(|e| format!("Failed to write config file: {e}"))
    }

    /// Returns the number of digits for padding identifier sequences.
    #[must_use]
    pub const fn digits(&self) -> usize {
        self.digits
    }

    /// Returns the number of increment attempts per allocation.
    #[must_use]
    pub const fn retry_budget(&self) -> u32 {
        self.retry_budget
    }

    /// Returns the base pause between attempts.
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }

    /// Returns the prefix for non-premium tenants.
    #[must_use]
    pub const fn generic_prefix(&self) -> &Prefix {
        &self.generic_prefix
    }

    /// Returns the prefix used when a display name yields no letters.
    #[must_use]
    pub const fn fallback_prefix(&self) -> &Prefix {
        &self.fallback_prefix
    }

    /// Returns the warning band policy.
    #[must_use]
    pub const fn band(&self) -> BandPolicy {
        self.band
    }

    /// Sets the number of increment attempts per allocation.
    ///
    /// A budget of zero is raised to one.
    pub fn set_retry_budget(&mut self, attempts: u32) {
        self.retry_budget = attempts.max(1);
    }

    /// Sets the base pause between attempts.
    pub const fn set_retry_backoff(&mut self, backoff: Duration) {
        self.retry_backoff = backoff;
    }

    /// Sets the padding width.
    pub const fn set_digits(&mut self, digits: usize) {
        self.digits = digits;
    }
}

const DEFAULT_GENERIC_PREFIX: &str = "LAB";
const DEFAULT_FALLBACK_PREFIX: &str = "LABX";

const fn default_digits() -> usize {
    4
}

const fn default_retry_budget() -> u32 {
    3
}

const fn default_retry_backoff_ms() -> u64 {
    10
}

const fn default_band_extension() -> f64 {
    0.5
}

fn default_generic_prefix() -> String {
    DEFAULT_GENERIC_PREFIX.to_string()
}

fn default_fallback_prefix() -> String {
    DEFAULT_FALLBACK_PREFIX.to_string()
}

fn prefix_or_panic(s: &str) -> Prefix {
    Prefix::new(s.to_string()).unwrap_or_else(|e| panic!("built-in prefix is invalid: {e}"))
}

/// The serialized versions of the configuration.
/// This allows for future changes to the configuration format and to the domain
/// type without breaking compatibility.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_version")]
enum Versions {
    #[serde(rename = "1")]
    V1 {
        /// The number of digits in the sequence part of an identifier.
        #[serde(default = "default_digits")]
        digits: usize,

        #[serde(default = "default_retry_budget")]
        retry_budget: u32,

        #[serde(default = "default_retry_backoff_ms")]
        retry_backoff_ms: u64,

        #[serde(default = "default_generic_prefix")]
        generic_prefix: String,

        #[serde(default = "default_fallback_prefix")]
        fallback_prefix: String,

        /// Fraction of the range width added on each side for the warning
        /// band.
        #[serde(default = "default_band_extension")]
        band_extension: f64,
    },
}

impl TryFrom<Versions> for Config {
    type Error = String;

    fn try_from(versions: Versions) -> Result<Self, Self::Error> {
        match versions {
            Versions::V1 {
                digits,
                retry_budget,
                retry_backoff_ms,
                generic_prefix,
                fallback_prefix,
                band_extension,
            } => Ok(Self {
                digits,
                retry_budget: retry_budget.max(1),
                retry_backoff: Duration::from_millis(retry_backoff_ms),
                generic_prefix: Prefix::new(generic_prefix).map_err(|e| e.to_string())?,
                fallback_prefix: Prefix::new(fallback_prefix).map_err(|e| e.to_string())?,
                band: BandPolicy::new(band_extension).ok_or_else(|| {
                    format!("band_extension must be a non-negative number, got {band_extension}")
                })?,
            }),
        }
    }
}

impl From<Config> for Versions {
    fn from(config: Config) -> Self {
        Self::V1 {
            digits: config.digits,
            retry_budget: config.retry_budget,
            retry_backoff_ms: u64::try_from(config.retry_backoff.as_millis()).unwrap_or(u64::MAX),
            generic_prefix: config.generic_prefix.to_string(),
            fallback_prefix: config.fallback_prefix.to_string(),
            band_extension: config.band.extension(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn load_reads_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            b"_version = \"1\"\ndigits = 6\nretry_budget = 5\nretry_backoff_ms = 25\ngeneric_prefix = \"GEN\"\nfallback_prefix = \"NONE\"\nband_extension = 0.3\n",
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.digits(), 6);
        assert_eq!(config.retry_budget(), 5);
        assert_eq!(config.retry_backoff(), Duration::from_millis(25));
        assert_eq!(config.generic_prefix().as_str(), "GEN");
        assert_eq!(config.fallback_prefix().as_str(), "NONE");
        assert!((config.band().extension() - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn load_missing_file_returns_error() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("missing.toml");

        let error = Config::load(&missing).unwrap_err();
        assert!(error.starts_with("Failed to read config file:"));
    }

    #[test]
    fn load_invalid_toml_returns_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"_version = \"1\"\ndigits = \"four\"\n")
            .unwrap();

        let error = Config::load(file.path()).unwrap_err();
        assert!(error.starts_with("Failed to parse config file:"));
    }

    #[test]
    fn invalid_prefix_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"_version = \"1\"\ngeneric_prefix = \"lab-1\"\n")
            .unwrap();

        let error = Config::load(file.path()).unwrap_err();
        assert!(error.contains("Invalid prefix"));
    }

    #[test]
    fn negative_band_is_rejected() {
        let error = toml::from_str::<Config>("_version = \"1\"\nband_extension = -1.0\n")
            .unwrap_err()
            .to_string();
        assert!(error.contains("band_extension"));
    }

    #[test]
    fn zero_retry_budget_is_raised_to_one() {
        let config: Config = toml::from_str("_version = \"1\"\nretry_budget = 0\n").unwrap();
        assert_eq!(config.retry_budget(), 1);
    }

    #[test]
    fn empty_file_returns_default() {
        // Tests that deserialising an empty file returns the default configuration.
        let expected = Config::default();
        let actual: Config = toml::from_str(r#"_version = "1""#).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        let mut config = Config::default();
        config.set_digits(5);
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }
}
