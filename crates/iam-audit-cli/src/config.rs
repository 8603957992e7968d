use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use iam_audit_core::cache::FileCache;
use iam_audit_core::fetch::{FetchConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::cli::{Cli, OutputFormat};

pub const VALID_KEYS: &str = "threads, cache_dir, output_dir, max_retries, format";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ProfileConfig {
    pub threads: Option<usize>,
    pub cache_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub max_retries: Option<u32>,
    pub format: Option<String>,
}

impl ProfileConfig {
    /// Parse and store one `config set` value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "threads" => {
                let threads = value
                    .parse::<usize>()
                    .with_context(|| format!("Invalid thread count: {value}"))?;
                anyhow::ensure!(threads > 0, "threads must be at least 1");
                self.threads = Some(threads);
            }
            "cache_dir" => self.cache_dir = Some(PathBuf::from(value)),
            "output_dir" => self.output_dir = Some(PathBuf::from(value)),
            "max_retries" => {
                let attempts = value
                    .parse::<u32>()
                    .with_context(|| format!("Invalid retry count: {value}"))?;
                anyhow::ensure!(attempts > 0, "max_retries must be at least 1");
                self.max_retries = Some(attempts);
            }
            "format" => {
                parse_format(value)?;
                self.format = Some(value.to_lowercase());
            }
            other => anyhow::bail!("Unknown config key: {other}. Valid keys: {VALID_KEYS}"),
        }
        Ok(())
    }
}

pub type ConfigFile = HashMap<String, ProfileConfig>;

fn parse_format(value: &str) -> Result<OutputFormat> {
    OutputFormat::from_str(value, true)
        .map_err(|_| anyhow::anyhow!("Invalid format: {value}. Expected table or json"))
}

fn config_dir() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .context("Cannot determine home directory")?
        .join(".iam-audit"))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn load_all() -> Result<ConfigFile> {
    load_all_from(&config_path()?)
}

fn load_all_from(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let cfg: ConfigFile =
        toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(cfg)
}

pub fn load_profile(profile: &str) -> Result<ProfileConfig> {
    Ok(load_all()?.remove(profile).unwrap_or_default())
}

pub fn save_profile(profile: &str, config: &ProfileConfig) -> Result<()> {
    save_profile_to(&config_path()?, profile, config)
}

fn save_profile_to(path: &Path, profile: &str, config: &ProfileConfig) -> Result<()> {
    let mut all = load_all_from(path)?;
    all.insert(profile.to_string(), config.clone());
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let content = toml::to_string_pretty(&all)?;
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Effective settings for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub fetch: FetchConfig,
    pub cache_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub format: OutputFormat,
}

impl Settings {
    /// Resolve each value from the flag, then the profile, then the default.
    pub fn resolve(cli: &Cli, profile: &ProfileConfig) -> Result<Self> {
        let max_workers = cli
            .threads
            .or(profile.threads)
            .unwrap_or(FetchConfig::default().max_workers);
        anyhow::ensure!(max_workers > 0, "--threads must be at least 1");

        let mut retry = RetryPolicy::default();
        if let Some(attempts) = profile.max_retries {
            retry.max_attempts = attempts.max(1);
        }

        let format = match (cli.format, profile.format.as_deref()) {
            (Some(format), _) => format,
            (None, Some(value)) => parse_format(value)?,
            (None, None) => OutputFormat::default(),
        };

        Ok(Self {
            fetch: FetchConfig {
                max_workers,
                use_cache: cli.use_cache,
                recursive: !cli.no_recurse,
                retry,
            },
            cache_dir: profile.cache_dir.clone().or_else(FileCache::default_dir),
            output_dir: cli
                .output_dir
                .clone()
                .or_else(|| profile.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from(".")),
            format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["iam-audit"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    // ------------------------------------------------------------------------
    // Profile storage
    // ------------------------------------------------------------------------

    #[test]
    fn test_profiles_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut prod = ProfileConfig::default();
        prod.set("threads", "8").unwrap();
        prod.set("format", "JSON").unwrap();
        save_profile_to(&path, "prod", &prod).unwrap();

        let mut dev = ProfileConfig::default();
        dev.set("output_dir", "/tmp/out").unwrap();
        save_profile_to(&path, "dev", &dev).unwrap();

        let all = load_all_from(&path).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["prod"].threads, Some(8));
        assert_eq!(all["prod"].format.as_deref(), Some("json"));
        assert_eq!(all["dev"].output_dir, Some(PathBuf::from("/tmp/out")));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_all_from(&dir.path().join("absent.toml")).unwrap().is_empty());
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut cfg = ProfileConfig::default();
        assert!(cfg.set("threads", "0").is_err());
        assert!(cfg.set("threads", "many").is_err());
        assert!(cfg.set("max_retries", "0").is_err());
        assert!(cfg.set("format", "yaml").is_err());
        assert!(cfg.set("colour", "red").is_err());
        assert_eq!(cfg, ProfileConfig::default());
    }

    // ------------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------------

    #[test]
    fn test_defaults() {
        let settings = Settings::resolve(&cli(&["policies"]), &ProfileConfig::default()).unwrap();
        assert_eq!(settings.fetch.max_workers, 5);
        assert!(settings.fetch.recursive);
        assert!(!settings.fetch.use_cache);
        assert_eq!(settings.fetch.retry.max_attempts, 4);
        assert_eq!(settings.output_dir, PathBuf::from("."));
        assert_eq!(settings.format, OutputFormat::Table);
    }

    #[test]
    fn test_flag_beats_profile() {
        let profile = ProfileConfig {
            threads: Some(2),
            output_dir: Some(PathBuf::from("/profile")),
            max_retries: Some(7),
            format: Some("json".to_string()),
            ..Default::default()
        };

        let settings = Settings::resolve(&cli(&["policies"]), &profile).unwrap();
        assert_eq!(settings.fetch.max_workers, 2);
        assert_eq!(settings.fetch.retry.max_attempts, 7);
        assert_eq!(settings.format, OutputFormat::Json);

        let settings = Settings::resolve(
            &cli(&[
                "--threads",
                "9",
                "--output-dir",
                "/flag",
                "-f",
                "table",
                "--no-recurse",
                "--use-cache",
                "policies",
            ]),
            &profile,
        )
        .unwrap();
        assert_eq!(settings.fetch.max_workers, 9);
        assert_eq!(settings.output_dir, PathBuf::from("/flag"));
        assert_eq!(settings.format, OutputFormat::Table);
        assert!(!settings.fetch.recursive);
        assert!(settings.fetch.use_cache);
    }

    #[test]
    fn test_zero_threads_rejected() {
        let result = Settings::resolve(&cli(&["--threads", "0", "policies"]), &ProfileConfig::default());
        assert!(result.is_err());
    }
}
