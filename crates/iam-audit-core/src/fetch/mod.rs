//! Concurrent compartment-tree traversal.
//!
//! [`HierarchyFetcher`] walks the tree from the tenancy root with an explicit
//! worklist. Each compartment becomes one task on a [`JoinSet`] that loads
//! the compartment's children and policies; at most
//! [`FetchConfig::max_workers`] tasks run at once. The join loop is the only
//! place results are merged, so tasks share nothing mutable except cache
//! counters.
//!
//! # Failure handling
//!
//! | Error                      | Effect                                           |
//! |----------------------------|--------------------------------------------------|
//! | transient (429, 5xx, I/O)  | retried per [`RetryPolicy`], then recorded       |
//! | rejected (403, 404, 4xx)   | recorded as a [`FetchFailure`], run continues    |
//! | unauthenticated (401)      | remaining tasks aborted, run fails               |
//! | root cannot be loaded      | run fails with [`AuditError::InvalidRoot`]       |
//!
//! # Cache
//!
//! With a [`CacheStore`] attached every successful live call is written back.
//! Reads are only attempted when [`FetchConfig::use_cache`] is set. A corrupt
//! entry counts as a miss.

mod retry;

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use crate::cache::{CacheCounters, CacheEntry, CacheKey, CacheStats, CacheStore};
use crate::client::DynClient;
use crate::error::{AuditError, FetchError};
use crate::events::{AuditEvent, DynSink, NoopSink};
use crate::model::{Compartment, DynamicGroup, RawPolicy, ResourceKind};

pub use retry::{RetryError, RetryPolicy};

// =============================================================================
// Configuration
// =============================================================================

/// Traversal settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Upper bound on concurrently loading compartments.
    pub max_workers: usize,
    /// Read previously cached collections before calling the API.
    pub use_cache: bool,
    /// Descend below the root.
    pub recursive: bool,
    pub retry: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            use_cache: false,
            recursive: true,
            retry: RetryPolicy::default(),
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// One collection that could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub compartment_id: String,
    pub compartment_name: String,
    pub resource_kind: ResourceKind,
    pub attempts: u32,
    pub message: String,
}

/// Everything collected by [`HierarchyFetcher::fetch`].
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub root: Compartment,
    /// All discovered compartments, root first. Includes inactive ones that
    /// were not descended into.
    pub compartments: Vec<Compartment>,
    /// Policies grouped by compartment; compartments appear in completion
    /// order.
    pub policies: Vec<RawPolicy>,
    /// Compartments whose policies were loaded.
    pub compartments_loaded: usize,
    pub skipped_inactive: usize,
    pub failures: Vec<FetchFailure>,
    pub cache: CacheStats,
}

/// Everything collected by [`HierarchyFetcher::fetch_dynamic_groups`].
#[derive(Debug, Clone)]
pub struct DynamicGroupFetch {
    pub groups: Vec<DynamicGroup>,
    pub failures: Vec<FetchFailure>,
    pub cache: CacheStats,
}

// =============================================================================
// Fetcher
// =============================================================================

/// Walks the compartment tree and loads per-compartment collections.
#[derive(Clone)]
pub struct HierarchyFetcher {
    client: DynClient,
    cache: Option<Arc<dyn CacheStore>>,
    config: FetchConfig,
    sink: DynSink,
}

impl HierarchyFetcher {
    pub fn new(client: DynClient, config: FetchConfig) -> Self {
        Self {
            client,
            cache: None,
            config,
            sink: Arc::new(NoopSink),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: DynSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn context(&self) -> Arc<TaskContext> {
        Arc::new(TaskContext {
            client: self.client.clone(),
            cache: self.cache.clone(),
            use_cache: self.config.use_cache,
            recursive: self.config.recursive,
            retry: self.config.retry.clone(),
            sink: self.sink.clone(),
            counters: CacheCounters::default(),
        })
    }

    /// Load the tree below `root_id` and every policy in it.
    ///
    /// # Errors
    ///
    /// - [`AuditError::InvalidRoot`] if the root compartment cannot be read
    /// - [`AuditError::Unauthenticated`] if any call is rejected with 401;
    ///   partial results are discarded
    pub async fn fetch(&self, root_id: &str) -> Result<FetchOutcome, AuditError> {
        let started = Instant::now();
        let ctx = self.context();
        let root = self.load_root(&ctx, root_id).await?;

        let max_workers = self.config.max_workers.max(1);
        let mut queue = VecDeque::from([root.clone()]);
        let mut tasks: JoinSet<Result<CompartmentLoad, FetchError>> = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, (String, String)> = HashMap::new();

        let mut compartments = vec![root.clone()];
        let mut policies = Vec::new();
        let mut failures = Vec::new();
        let mut compartments_loaded = 0;
        let mut skipped_inactive = 0;

        loop {
            while tasks.len() < max_workers {
                let Some(compartment) = queue.pop_front() else {
                    break;
                };
                let label = (compartment.id.clone(), compartment.name.clone());
                let handle = tasks.spawn(load_compartment(ctx.clone(), compartment));
                in_flight.insert(handle.id(), label);
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };

            let load = match joined {
                Ok((id, Ok(load))) => {
                    in_flight.remove(&id);
                    load
                }
                Ok((_, Err(fatal))) => {
                    tasks.abort_all();
                    return Err(AuditError::Unauthenticated {
                        message: fatal.to_string(),
                    });
                }
                Err(join_error) => {
                    let (compartment_id, compartment_name) =
                        in_flight.remove(&join_error.id()).unwrap_or_default();
                    self.sink.emit(&AuditEvent::TaskAborted {
                        compartment_id: compartment_id.clone(),
                        message: join_error.to_string(),
                    });
                    failures.push(FetchFailure {
                        compartment_id,
                        compartment_name,
                        resource_kind: ResourceKind::Policies,
                        attempts: 0,
                        message: join_error.to_string(),
                    });
                    continue;
                }
            };

            for child in load.children {
                if child.lifecycle_state.is_active() {
                    queue.push_back(child.clone());
                } else {
                    skipped_inactive += 1;
                    self.sink.emit(&AuditEvent::CompartmentSkipped {
                        compartment_id: child.id.clone(),
                        lifecycle_state: child.lifecycle_state.to_string(),
                    });
                }
                compartments.push(child);
            }

            if let Some(loaded) = load.policies {
                compartments_loaded += 1;
                self.sink.emit(&AuditEvent::CompartmentLoaded {
                    compartment_id: load.compartment.id.clone(),
                    compartment_name: load.compartment.name.clone(),
                    children: load.child_count,
                    policies: loaded.len(),
                });
                policies.extend(loaded);
            }
            failures.extend(load.failures);
        }

        self.sink.emit(&AuditEvent::RunCompleted {
            compartments: compartments.len(),
            failures: failures.len(),
            elapsed: started.elapsed(),
        });

        Ok(FetchOutcome {
            root,
            compartments,
            policies,
            compartments_loaded,
            skipped_inactive,
            failures,
            cache: ctx.counters.snapshot(),
        })
    }

    /// Load the tenancy's dynamic groups through the same cache and retry path.
    ///
    /// # Errors
    ///
    /// Only [`AuditError::Unauthenticated`]; other failures are recorded in
    /// [`DynamicGroupFetch::failures`].
    pub async fn fetch_dynamic_groups(
        &self,
        tenancy_id: &str,
    ) -> Result<DynamicGroupFetch, AuditError> {
        let ctx = self.context();
        let client = ctx.client.clone();
        let mut failures = Vec::new();

        let groups = match load_collection(&ctx, tenancy_id, ResourceKind::DynamicGroups, || {
            client.list_dynamic_groups(tenancy_id)
        })
        .await
        {
            Ok(groups) => groups,
            Err(err) if err.error.is_fatal() => {
                return Err(AuditError::Unauthenticated {
                    message: err.error.to_string(),
                });
            }
            Err(err) => {
                failures.push(record_failure(
                    &ctx,
                    tenancy_id,
                    tenancy_id,
                    ResourceKind::DynamicGroups,
                    err,
                ));
                Vec::new()
            }
        };

        Ok(DynamicGroupFetch {
            groups,
            failures,
            cache: ctx.counters.snapshot(),
        })
    }

    async fn load_root(&self, ctx: &TaskContext, root_id: &str) -> Result<Compartment, AuditError> {
        let result = ctx
            .retry
            .run(
                || ctx.client.get_compartment(root_id),
                |attempt, delay, error| {
                    ctx.emit_retry(root_id, ResourceKind::Compartments, attempt, delay, error)
                },
            )
            .await;

        match result {
            Ok(root) => Ok(root),
            Err(err) if err.error.is_fatal() => Err(AuditError::Unauthenticated {
                message: err.error.to_string(),
            }),
            Err(err) => Err(AuditError::InvalidRoot {
                compartment_id: root_id.to_string(),
                message: err.error.to_string(),
            }),
        }
    }
}

// =============================================================================
// Tasks
// =============================================================================

struct TaskContext {
    client: DynClient,
    cache: Option<Arc<dyn CacheStore>>,
    use_cache: bool,
    recursive: bool,
    retry: RetryPolicy,
    sink: DynSink,
    counters: CacheCounters,
}

impl TaskContext {
    fn emit_retry(
        &self,
        compartment_id: &str,
        kind: ResourceKind,
        attempt: u32,
        delay: std::time::Duration,
        error: &FetchError,
    ) {
        self.sink.emit(&AuditEvent::FetchRetry {
            compartment_id: compartment_id.to_string(),
            kind,
            attempt,
            delay,
            message: error.to_string(),
        });
    }
}

/// Result of one compartment task.
struct CompartmentLoad {
    compartment: Compartment,
    children: Vec<Compartment>,
    child_count: usize,
    /// `None` when the policy listing failed.
    policies: Option<Vec<RawPolicy>>,
    failures: Vec<FetchFailure>,
}

/// Load one compartment's children and policies. Only a fatal error is
/// returned as `Err`; everything else ends up in `failures`.
async fn load_compartment(
    ctx: Arc<TaskContext>,
    compartment: Compartment,
) -> Result<CompartmentLoad, FetchError> {
    let mut failures = Vec::new();
    let client = ctx.client.clone();
    let id = compartment.id.as_str();

    let children = if ctx.recursive {
        match load_collection(&ctx, id, ResourceKind::Compartments, || {
            client.list_compartments(id, false)
        })
        .await
        {
            Ok(children) => children,
            Err(err) if err.error.is_fatal() => return Err(err.error),
            Err(err) => {
                failures.push(record_failure(
                    &ctx,
                    id,
                    &compartment.name,
                    ResourceKind::Compartments,
                    err,
                ));
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    let policies = match load_collection(&ctx, id, ResourceKind::Policies, || {
        client.list_policies(id)
    })
    .await
    {
        Ok(policies) => Some(policies),
        Err(err) if err.error.is_fatal() => return Err(err.error),
        Err(err) => {
            failures.push(record_failure(
                &ctx,
                id,
                &compartment.name,
                ResourceKind::Policies,
                err,
            ));
            None
        }
    };

    Ok(CompartmentLoad {
        child_count: children.len(),
        children,
        policies,
        failures,
        compartment,
    })
}

/// Cache lookup, then live call with retry, then cache write.
async fn load_collection<T, F, Fut>(
    ctx: &TaskContext,
    compartment_id: &str,
    kind: ResourceKind,
    call: F,
) -> Result<Vec<T>, RetryError>
where
    T: Serialize + DeserializeOwned + Clone,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<T>, FetchError>>,
{
    let key = CacheKey::new(compartment_id, kind);

    if ctx.use_cache
        && let Some(cache) = &ctx.cache
    {
        match cache.get(&key).await {
            Some(bytes) => match CacheEntry::<T>::decode(kind, &bytes) {
                Ok(entry) => {
                    ctx.counters.hit();
                    ctx.sink.emit(&AuditEvent::CacheHit {
                        compartment_id: compartment_id.to_string(),
                        kind,
                    });
                    return Ok(entry.items);
                }
                Err(message) => {
                    ctx.counters.corrupt();
                    ctx.sink.emit(&AuditEvent::CacheCorrupt {
                        compartment_id: compartment_id.to_string(),
                        kind,
                        message,
                    });
                }
            },
            None => {
                ctx.counters.miss();
                ctx.sink.emit(&AuditEvent::CacheMiss {
                    compartment_id: compartment_id.to_string(),
                    kind,
                });
            }
        }
    }

    let items = ctx
        .retry
        .run(call, |attempt, delay, error| {
            ctx.emit_retry(compartment_id, kind, attempt, delay, error)
        })
        .await?;

    if let Some(cache) = &ctx.cache {
        let written = match CacheEntry::encode(kind, &items) {
            Ok(bytes) => cache.put(&key, bytes).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(message) = written {
            ctx.counters.write_failed();
            ctx.sink.emit(&AuditEvent::CacheWriteFailed {
                compartment_id: compartment_id.to_string(),
                kind,
                message,
            });
        }
    }

    Ok(items)
}

fn record_failure(
    ctx: &TaskContext,
    compartment_id: &str,
    compartment_name: &str,
    kind: ResourceKind,
    err: RetryError,
) -> FetchFailure {
    let message = err.error.to_string();
    ctx.sink.emit(&AuditEvent::FetchFailed {
        compartment_id: compartment_id.to_string(),
        kind,
        attempts: err.attempts,
        message: message.clone(),
    });
    FetchFailure {
        compartment_id: compartment_id.to_string(),
        compartment_name: compartment_name.to_string(),
        resource_kind: kind,
        attempts: err.attempts,
        message,
    }
}
