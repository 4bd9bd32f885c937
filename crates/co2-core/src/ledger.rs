//! Certificate/Project ledger: `certificate_id -> Certificate` and
//! `project_id -> Project`, updated in lockstep with block application
//! (spec §3, §4.3, §4.5).
//!
//! The ledger is derivable from the chain's transaction history plus the
//! UTXO index, but is maintained incrementally here so lookups don't require
//! a chain scan. Mutation is confined to the chain manager, mirroring the
//! UTXO index's single-writer discipline.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Certificate, Project};

/// The ledger-side delta produced by connecting one block: new/updated
/// certificates, and any projects created by first reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDiff {
    /// `(certificate_id, before, after)` — `before` is `None` for a
    /// newly minted certificate, letting [`Ledger::undo`] restore or remove.
    pub certificates: Vec<(String, Option<Certificate>, Certificate)>,
    /// `(project_id, project)` — projects are immutable after creation, so
    /// undo only ever removes them.
    pub projects_created: Vec<(String, Project)>,
}

impl LedgerDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty() && self.projects_created.is_empty()
    }
}

/// In-memory certificate/project ledger (spec §4.5 "owned ledger").
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    certificates: HashMap<String, Certificate>,
    projects: HashMap<String, Project>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn certificate(&self, certificate_id: &str) -> Option<&Certificate> {
        self.certificates.get(certificate_id)
    }

    pub fn project(&self, project_id: &str) -> Option<&Project> {
        self.projects.get(project_id)
    }

    pub fn contains_certificate(&self, certificate_id: &str) -> bool {
        self.certificates.contains_key(certificate_id)
    }

    pub fn contains_project(&self, project_id: &str) -> bool {
        self.projects.contains_key(project_id)
    }

    /// Apply a ledger diff produced by connecting a block.
    pub fn apply(&mut self, diff: &LedgerDiff) {
        for (project_id, project) in &diff.projects_created {
            self.projects.insert(project_id.clone(), project.clone());
        }
        for (cert_id, _before, after) in &diff.certificates {
            self.certificates.insert(cert_id.clone(), after.clone());
        }
    }

    /// Undo a previously applied ledger diff: restore each certificate's
    /// prior state (or remove it if it was newly minted), and remove any
    /// projects the block created.
    pub fn undo(&mut self, diff: &LedgerDiff) {
        for (cert_id, before, _after) in &diff.certificates {
            match before {
                Some(prior) => {
                    self.certificates.insert(cert_id.clone(), prior.clone());
                }
                None => {
                    self.certificates.remove(cert_id);
                }
            }
        }
        for (project_id, _project) in &diff.projects_created {
            self.projects.remove(project_id);
        }
    }
}
