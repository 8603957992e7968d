//! # iam-audit-core
//!
//! Inventory, parsing and filtering of OCI IAM policy statements and dynamic
//! groups across a tenancy's compartment tree.
//!
//! ## Overview
//!
//! A run goes through these stages:
//!
//! 1. [`client`] establishes a session and talks to the Identity API
//! 2. [`fetch::HierarchyFetcher`] walks the compartment tree concurrently,
//!    with retry and an optional [`cache`]
//! 3. [`index::CompartmentIndex`] answers where each compartment sits
//! 4. [`parser`] turns statement text into [`parser::ParsedStatement`]s
//! 5. [`filter`] narrows the result; [`report`] flattens it for output
//!
//! [`analysis`] wires these together. Nothing here evaluates whether a
//! request would be permitted, and nothing writes to the tenancy.
//!
//! ## Observability
//!
//! The crate does not log on its own behalf during a fetch. Pass an
//! [`events::EventSink`] (for example [`events::TracingSink`]) through
//! [`analysis::AnalysisOptions`] to see what a run is doing.

pub mod analysis;
pub mod cache;
pub mod client;
pub mod error;
pub mod events;
pub mod fetch;
pub mod filter;
pub mod index;
pub mod model;
pub mod parser;
pub mod report;

pub use analysis::{
    AnalysisOptions, DynamicGroupAnalysis, DynamicGroupInventory, PolicyAnalysis,
    PolicyInventory, RunSummary,
};
pub use error::{AuditError, FetchError};
pub use filter::{DynamicGroupFilter, PolicyFilter};
