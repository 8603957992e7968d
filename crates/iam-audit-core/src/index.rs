//! In-memory compartment hierarchy.
//!
//! The index is built once per run from the fetched compartment records and
//! is read-only afterwards. It answers two questions:
//!
//! - where a compartment sits in the tree ([`CompartmentIndex::path_of`])
//! - whether one compartment is at or below another
//!   ([`CompartmentIndex::is_descendant_or_self`])
//!
//! # Orphans
//!
//! A compartment is orphaned when its chain of parents never reaches the
//! root: the parent is missing, or the chain loops back on itself. Orphaned
//! compartments are kept out of every query and reported through
//! [`CompartmentIndex::orphaned`] so the run summary can account for them.
//!
//! # Usage
//!
//! ```
//! use iam_audit_core::index::CompartmentIndex;
//! use iam_audit_core::model::Compartment;
//!
//! let index = CompartmentIndex::build(
//!     "root",
//!     vec![
//!         Compartment::new("root", "acme", None),
//!         Compartment::new("prod", "Prod", Some("root")),
//!     ],
//! )
//! .unwrap();
//!
//! assert!(index.is_descendant_or_self("prod", "root"));
//! assert_eq!(index.path_of("prod").unwrap(), ["acme", "Prod"]);
//! ```

use std::collections::HashMap;

use crate::model::Compartment;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while building the index.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IndexError {
    /// The root compartment is not among the supplied records.
    #[error("Root compartment {0} is not present in the compartment list")]
    MissingRoot(String),
}

// =============================================================================
// Index
// =============================================================================

#[derive(Debug)]
struct Entry {
    compartment: Compartment,
    /// Ancestor ids from the root down to and including this compartment.
    /// Empty for orphans.
    lineage: Vec<String>,
    /// Names matching `lineage`.
    path: Vec<String>,
}

impl Entry {
    fn is_orphaned(&self) -> bool {
        self.lineage.is_empty()
    }
}

/// Walk state used while resolving lineages.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Walk {
    InProgress,
    Resolved,
    Orphaned,
}

/// Read-only view of the compartment tree.
#[derive(Debug)]
pub struct CompartmentIndex {
    root_id: String,
    entries: HashMap<String, Entry>,
    /// Orphaned ids in input order.
    orphaned: Vec<String>,
}

impl CompartmentIndex {
    /// Build the index from compartment records.
    ///
    /// Duplicate ids keep the first record seen.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::MissingRoot`] if `root_id` is not among
    /// `compartments`.
    pub fn build(
        root_id: impl Into<String>,
        compartments: impl IntoIterator<Item = Compartment>,
    ) -> Result<Self, IndexError> {
        let root_id = root_id.into();
        let mut order = Vec::new();
        let mut entries: HashMap<String, Entry> = HashMap::new();

        for compartment in compartments {
            if entries.contains_key(&compartment.id) {
                continue;
            }
            order.push(compartment.id.clone());
            entries.insert(
                compartment.id.clone(),
                Entry {
                    compartment,
                    lineage: Vec::new(),
                    path: Vec::new(),
                },
            );
        }

        if !entries.contains_key(&root_id) {
            return Err(IndexError::MissingRoot(root_id));
        }

        let mut state: HashMap<String, Walk> = HashMap::with_capacity(entries.len());
        for id in &order {
            resolve_lineage(id, &root_id, &mut entries, &mut state);
        }

        let orphaned = order
            .into_iter()
            .filter(|id| entries.get(id).is_some_and(Entry::is_orphaned))
            .collect();

        Ok(Self {
            root_id,
            entries,
            orphaned,
        })
    }

    /// OCID of the tenancy root.
    #[must_use]
    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// Display name of the tenancy root.
    #[must_use]
    pub fn root_name(&self) -> &str {
        self.entries
            .get(&self.root_id)
            .map_or("", |e| e.compartment.name.as_str())
    }

    /// Look up a compartment record, orphans included.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Compartment> {
        self.entries.get(id).map(|e| &e.compartment)
    }

    /// Display name of a compartment, orphans included.
    #[must_use]
    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.get(id).map(|c| c.name.as_str())
    }

    /// Root-to-leaf names for a compartment.
    ///
    /// Returns `None` for unknown and orphaned compartments.
    #[must_use]
    pub fn path_of(&self, id: &str) -> Option<&[String]> {
        self.entries
            .get(id)
            .filter(|e| !e.is_orphaned())
            .map(|e| e.path.as_slice())
    }

    /// Whether `candidate_id` is `ancestor_id` or sits below it.
    ///
    /// Unknown or orphaned ids on either side yield `false`.
    #[must_use]
    pub fn is_descendant_or_self(&self, candidate_id: &str, ancestor_id: &str) -> bool {
        let Some(candidate) = self.entries.get(candidate_id) else {
            return false;
        };
        if self
            .entries
            .get(ancestor_id)
            .is_none_or(Entry::is_orphaned)
        {
            return false;
        }
        candidate.lineage.iter().any(|id| id == ancestor_id)
    }

    /// Resolve a user-supplied compartment reference to compartment ids.
    ///
    /// An exact OCID wins; otherwise every non-orphaned compartment whose
    /// name matches case-insensitively is returned, in no particular order.
    #[must_use]
    pub fn resolve(&self, reference: &str) -> Vec<&str> {
        let reference = reference.trim();
        if let Some(entry) = self.entries.get(reference)
            && !entry.is_orphaned()
        {
            return vec![entry.compartment.id.as_str()];
        }
        self.entries
            .values()
            .filter(|e| !e.is_orphaned() && e.compartment.name.eq_ignore_ascii_case(reference))
            .map(|e| e.compartment.id.as_str())
            .collect()
    }

    /// Compartments whose parent chain never reaches the root.
    #[must_use]
    pub fn orphaned(&self) -> &[String] {
        &self.orphaned
    }

    /// Number of compartments, orphans included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over non-orphaned compartments.
    pub fn compartments(&self) -> impl Iterator<Item = &Compartment> {
        self.entries
            .values()
            .filter(|e| !e.is_orphaned())
            .map(|e| &e.compartment)
    }
}

/// Resolve the lineage of `start`, memoising every compartment on the way.
///
/// The walk climbs parent links until it reaches the root or an already
/// resolved compartment, then unwinds the stack filling in lineages. Hitting
/// a compartment still in progress means a cycle: the whole stack is
/// orphaned, as is anything hanging below an orphan.
fn resolve_lineage(
    start: &str,
    root_id: &str,
    entries: &mut HashMap<String, Entry>,
    state: &mut HashMap<String, Walk>,
) {
    let mut stack: Vec<String> = Vec::new();
    let mut current = start.to_string();

    // Outcome of the climb: the lineage/path of the first resolved
    // ancestor, or None if the chain is broken.
    let anchor: Option<(Vec<String>, Vec<String>)> = loop {
        match state.get(&current) {
            Some(Walk::Resolved) => {
                let entry = &entries[&current];
                break Some((entry.lineage.clone(), entry.path.clone()));
            }
            Some(Walk::Orphaned) | Some(Walk::InProgress) => break None,
            None => {}
        }

        let Some(entry) = entries.get(&current) else {
            break None;
        };

        if current == root_id {
            let root = &entry.compartment;
            let lineage = vec![root.id.clone()];
            let path = vec![root.name.clone()];
            if let Some(e) = entries.get_mut(&current) {
                e.lineage.clone_from(&lineage);
                e.path.clone_from(&path);
            }
            state.insert(current.clone(), Walk::Resolved);
            break Some((lineage, path));
        }

        let parent = entry.compartment.parent_id.clone();
        state.insert(current.clone(), Walk::InProgress);
        stack.push(current.clone());

        match parent {
            Some(parent) => current = parent,
            None => break None,
        }
    };

    match anchor {
        Some((mut lineage, mut path)) => {
            while let Some(id) = stack.pop() {
                if let Some(entry) = entries.get_mut(&id) {
                    lineage.push(id.clone());
                    path.push(entry.compartment.name.clone());
                    entry.lineage.clone_from(&lineage);
                    entry.path.clone_from(&path);
                }
                state.insert(id, Walk::Resolved);
            }
        }
        None => {
            for id in stack {
                state.insert(id, Walk::Orphaned);
            }
        }
    }
}
