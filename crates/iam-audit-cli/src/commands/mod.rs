pub mod analyze;
pub mod dynamic_groups;
pub mod policies;

use std::sync::Arc;

use anyhow::Result;
use iam_audit_core::AnalysisOptions;
use iam_audit_core::cache::{CacheStore, FileCache};
use iam_audit_core::client::{AuthMode, OciConfigProvider};
use iam_audit_core::events::TracingSink;

use crate::cli::Cli;
use crate::config::Settings;

/// Everything a command needs to start a run.
pub struct RunContext {
    pub provider: OciConfigProvider,
    pub mode: AuthMode,
    pub options: AnalysisOptions,
    pub settings: Settings,
}

impl RunContext {
    pub fn new(cli: &Cli, settings: Settings) -> Result<Self> {
        let provider = match &cli.oci_config {
            Some(path) => OciConfigProvider::with_path(path),
            None => OciConfigProvider::new(),
        };
        let mode = if cli.instance_principal {
            AuthMode::InstancePrincipal
        } else {
            AuthMode::Profile(cli.profile.clone())
        };

        let cache: Option<Arc<dyn CacheStore>> = match &settings.cache_dir {
            Some(dir) => Some(Arc::new(FileCache::new(dir))),
            None if settings.fetch.use_cache => anyhow::bail!(
                "Cannot determine a cache directory. Set one with: iam-audit config set cache_dir <path>"
            ),
            None => None,
        };
        if let Some(dir) = &settings.cache_dir {
            tracing::debug!(dir = %dir.display(), use_cache = settings.fetch.use_cache, "Cache configured");
        }

        let options = AnalysisOptions {
            fetch: settings.fetch.clone(),
            cache,
            sink: Arc::new(TracingSink),
        };

        Ok(Self {
            provider,
            mode,
            options,
            settings,
        })
    }
}
