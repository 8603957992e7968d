//! Entry points tying session, fetcher, parser and filters together.
//!
//! ```ignore
//! use iam_audit_core::analysis::{AnalysisOptions, PolicyAnalysis};
//! use iam_audit_core::client::{AuthMode, OciConfigProvider};
//! use iam_audit_core::filter::PolicyFilter;
//!
//! let analysis = PolicyAnalysis::connect(
//!     &OciConfigProvider::new(),
//!     &AuthMode::default(),
//!     AnalysisOptions::default(),
//! )?;
//! let inventory = analysis.load_policies().await?;
//!
//! let filter = PolicyFilter {
//!     verb: Some("manage".into()),
//!     ..Default::default()
//! };
//! for row in inventory.rows(&filter) {
//!     println!("{}: {}", row.policy_name, row.statement);
//! }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheStats, CacheStore};
use crate::client::{AuthMode, DynClient, OciIdentityClient, SessionProvider};
use crate::error::AuditError;
use crate::events::{AuditEvent, DynSink, NoopSink};
use crate::fetch::{FetchConfig, FetchFailure, HierarchyFetcher};
use crate::filter::{DynamicGroupFilter, PolicyFilter};
use crate::index::CompartmentIndex;
use crate::model::DynamicGroup;
use crate::parser::ParsedStatement;
use crate::report::{DynamicGroupExport, DynamicGroupRow, PolicyExport, PolicyRow};

// =============================================================================
// Options and Summary
// =============================================================================

/// Settings shared by both analyses.
#[derive(Clone)]
pub struct AnalysisOptions {
    pub fetch: FetchConfig,
    /// Store for API results. Written on every live call, read only when
    /// `fetch.use_cache` is set.
    pub cache: Option<Arc<dyn CacheStore>>,
    pub sink: DynSink,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            cache: None,
            sink: Arc::new(NoopSink),
        }
    }
}

impl AnalysisOptions {
    fn fetcher(&self, client: DynClient) -> HierarchyFetcher {
        let fetcher =
            HierarchyFetcher::new(client, self.fetch.clone()).with_sink(self.sink.clone());
        match &self.cache {
            Some(cache) => fetcher.with_cache(cache.clone()),
            None => fetcher,
        }
    }
}

/// What happened during a run, including everything that was dropped or
/// kept only partially.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub compartments_loaded: usize,
    pub skipped_inactive: usize,
    pub failures: Vec<FetchFailure>,
    /// Compartments whose parent chain never reached the root.
    pub orphaned: Vec<String>,
    /// Statements or matching-rule clauses produced.
    pub statements: usize,
    pub parse_warnings: usize,
    pub cache: CacheStats,
}

impl RunSummary {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.orphaned.is_empty()
    }
}

/// Establish a session and build an Identity client for it, returning the
/// client and the session's tenancy OCID.
///
/// Both analyses can be built from one client with their `new`
/// constructors.
///
/// # Errors
///
/// Any session or key problem, as [`AuditError::Auth`] or
/// [`AuditError::Configuration`].
pub fn connect_client(
    provider: &dyn SessionProvider,
    mode: &AuthMode,
    sink: &DynSink,
) -> Result<(DynClient, String), AuditError> {
    let session = provider.establish_session(mode)?;
    let client = OciIdentityClient::new(&session)?;
    sink.emit(&AuditEvent::SessionConnected {
        tenancy_id: session.tenancy_id.clone(),
        region: session.region.clone(),
    });
    Ok((Arc::new(client), session.tenancy_id))
}

// =============================================================================
// Policies
// =============================================================================

/// Loads and parses every policy statement in a tenancy.
pub struct PolicyAnalysis {
    tenancy_id: String,
    fetcher: HierarchyFetcher,
    sink: DynSink,
}

impl PolicyAnalysis {
    /// Establish a session and build an Identity client for it.
    ///
    /// # Errors
    ///
    /// Any session or key problem, as [`AuditError::Auth`] or
    /// [`AuditError::Configuration`].
    pub fn connect(
        provider: &dyn SessionProvider,
        mode: &AuthMode,
        options: AnalysisOptions,
    ) -> Result<Self, AuditError> {
        let (client, tenancy_id) = connect_client(provider, mode, &options.sink)?;
        Ok(Self::new(client, tenancy_id, options))
    }

    pub fn new(client: DynClient, tenancy_id: impl Into<String>, options: AnalysisOptions) -> Self {
        Self {
            tenancy_id: tenancy_id.into(),
            fetcher: options.fetcher(client),
            sink: options.sink,
        }
    }

    pub fn tenancy_id(&self) -> &str {
        &self.tenancy_id
    }

    /// Walk the tenancy and parse every statement found.
    ///
    /// # Errors
    ///
    /// Only fatal conditions: an unreadable root or rejected credentials.
    /// Per-compartment failures are reported in [`RunSummary::failures`].
    pub async fn load_policies(&self) -> Result<PolicyInventory, AuditError> {
        let outcome = self.fetcher.fetch(&self.tenancy_id).await?;

        let index = CompartmentIndex::build(outcome.root.id.clone(), outcome.compartments)
            .map_err(|e| AuditError::internal(e.to_string()))?;

        let mut statements = Vec::new();
        for policy in &outcome.policies {
            statements.extend(ParsedStatement::from_policy(policy, &index));
        }

        let mut parse_warnings = 0;
        for statement in &statements {
            if let Some(warning) = &statement.parse_warning {
                parse_warnings += 1;
                self.sink.emit(&AuditEvent::ParseWarning {
                    source_id: statement.policy_id.clone(),
                    text: statement.raw_text.clone(),
                    message: warning.to_string(),
                });
            }
        }

        let summary = RunSummary {
            compartments_loaded: outcome.compartments_loaded,
            skipped_inactive: outcome.skipped_inactive,
            failures: outcome.failures,
            orphaned: index.orphaned().to_vec(),
            statements: statements.len(),
            parse_warnings,
            cache: outcome.cache,
        };

        self.sink.emit(&AuditEvent::PoliciesLoaded {
            compartments: summary.compartments_loaded,
            statements: summary.statements,
            parse_warnings: summary.parse_warnings,
            failures: summary.failures.len(),
        });

        Ok(PolicyInventory {
            tenancy_id: self.tenancy_id.clone(),
            index,
            statements,
            summary,
        })
    }
}

/// Parsed statements of one run.
#[derive(Debug)]
pub struct PolicyInventory {
    pub tenancy_id: String,
    pub index: CompartmentIndex,
    pub statements: Vec<ParsedStatement>,
    pub summary: RunSummary,
}

impl PolicyInventory {
    pub fn filter(&self, filter: &PolicyFilter) -> Vec<&ParsedStatement> {
        filter.apply(&self.statements, &self.index)
    }

    pub fn rows(&self, filter: &PolicyFilter) -> Vec<PolicyRow> {
        self.filter(filter).into_iter().map(PolicyRow::from).collect()
    }

    pub fn export(&self, filter: &PolicyFilter) -> PolicyExport {
        PolicyExport::new(filter, self.rows(filter))
    }
}

// =============================================================================
// Dynamic Groups
// =============================================================================

/// Loads the tenancy's dynamic groups.
pub struct DynamicGroupAnalysis {
    tenancy_id: String,
    fetcher: HierarchyFetcher,
    sink: DynSink,
}

impl DynamicGroupAnalysis {
    pub fn connect(
        provider: &dyn SessionProvider,
        mode: &AuthMode,
        options: AnalysisOptions,
    ) -> Result<Self, AuditError> {
        let (client, tenancy_id) = connect_client(provider, mode, &options.sink)?;
        Ok(Self::new(client, tenancy_id, options))
    }

    pub fn new(client: DynClient, tenancy_id: impl Into<String>, options: AnalysisOptions) -> Self {
        Self {
            tenancy_id: tenancy_id.into(),
            fetcher: options.fetcher(client),
            sink: options.sink,
        }
    }

    pub fn tenancy_id(&self) -> &str {
        &self.tenancy_id
    }

    pub async fn load_dynamic_groups(&self) -> Result<DynamicGroupInventory, AuditError> {
        let fetched = self.fetcher.fetch_dynamic_groups(&self.tenancy_id).await?;

        let mut clauses = 0;
        let mut parse_warnings = 0;
        for group in &fetched.groups {
            clauses += group.matching_rules.len();
            for rule in &group.matching_rules {
                if let Some(warning) = &rule.parse_warning {
                    parse_warnings += 1;
                    self.sink.emit(&AuditEvent::ParseWarning {
                        source_id: group.ocid.clone(),
                        text: rule.rule_text.clone(),
                        message: warning.to_string(),
                    });
                }
            }
        }

        self.sink.emit(&AuditEvent::DynamicGroupsLoaded {
            groups: fetched.groups.len(),
            parse_warnings,
            failures: fetched.failures.len(),
        });

        Ok(DynamicGroupInventory {
            tenancy_id: self.tenancy_id.clone(),
            summary: RunSummary {
                failures: fetched.failures,
                statements: clauses,
                parse_warnings,
                cache: fetched.cache,
                ..RunSummary::default()
            },
            groups: fetched.groups,
        })
    }
}

/// Dynamic groups of one run.
#[derive(Debug)]
pub struct DynamicGroupInventory {
    pub tenancy_id: String,
    pub groups: Vec<DynamicGroup>,
    pub summary: RunSummary,
}

impl DynamicGroupInventory {
    pub fn filter(&self, filter: &DynamicGroupFilter) -> Vec<&DynamicGroup> {
        filter.apply(&self.groups)
    }

    pub fn rows(&self, filter: &DynamicGroupFilter) -> Vec<DynamicGroupRow> {
        self.filter(filter)
            .into_iter()
            .map(DynamicGroupRow::from)
            .collect()
    }

    pub fn export(&self, filter: &DynamicGroupFilter) -> DynamicGroupExport {
        DynamicGroupExport::new(filter, self.rows(filter))
    }
}
