//! This module contains the defect signals that the analysis raises, and the
//! observers of the execution trace that raise them.
//!
//! Each signal carries a list of `function:detail` entries explaining where it
//! was raised. The entries are deduplicated, as the same function is usually
//! reached along many paths.

pub mod features;
pub mod tracker;

use serde::{Deserialize, Serialize};

/// The defects that the analysis looks for.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectKind {
    /// A transfer that does not check that `from` owns the token.
    UnrestrictedFromAndOwnerInconsistency,

    /// A function that compares the sender against an owner-like storage
    /// variable that is not indexed by a mapping key.
    PrivilegedAddress,

    /// A `Transfer` event emitted without any preceding storage write.
    EmptyTransferEvent,
}

impl DefectKind {
    /// Every kind of defect, in reporting order.
    pub const ALL: [Self; 3] = [
        Self::UnrestrictedFromAndOwnerInconsistency,
        Self::PrivilegedAddress,
        Self::EmptyTransferEvent,
    ];

    /// Gets the key under which the defect appears in the result record.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::UnrestrictedFromAndOwnerInconsistency => {
                "unrestricted_from_and_owner_inconsistency"
            }
            Self::PrivilegedAddress => "privileged_address",
            Self::EmptyTransferEvent => "empty_transfer_event",
        }
    }
}

/// The outcome of looking for one defect.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    /// The defect was looked for and not found.
    #[default]
    Clean,

    Found,

    /// No function of the contract could be explored.
    NotApplicable,

    /// The owner of the token was never identified, so owner-relative checks
    /// could not be made.
    OwnerUnresolved,
}

/// The record of one defect signal.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DefectRecord {
    pub kind:    DefectKind,
    pub status:  SignalStatus,
    pub entries: Vec<String>,
}

impl DefectRecord {
    /// Creates a clean record for `kind`.
    #[must_use]
    pub fn new(kind: DefectKind) -> Self {
        Self {
            kind,
            status: SignalStatus::Clean,
            entries: Vec::new(),
        }
    }

    /// Raises the signal with `entry`, returning `false` if the entry was
    /// already present.
    pub fn add(&mut self, entry: impl Into<String>) -> bool {
        let entry = entry.into();
        self.status = SignalStatus::Found;
        if self.entries.contains(&entry) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Removes the entry at `index`, clearing the signal if it was the last.
    pub fn remove(&mut self, index: usize) {
        if index < self.entries.len() {
            self.entries.remove(index);
        }
        if self.entries.is_empty() && self.status == SignalStatus::Found {
            self.status = SignalStatus::Clean;
        }
    }

    /// Keeps only the entries for which `keep` holds, clearing the signal if
    /// none remain.
    pub fn retain(&mut self, keep: impl FnMut(&String) -> bool) {
        self.entries.retain(keep);
        if self.entries.is_empty() && self.status == SignalStatus::Found {
            self.status = SignalStatus::Clean;
        }
    }

    /// Replaces the outcome with `status`, dropping the entries.
    pub fn settle(&mut self, status: SignalStatus) {
        self.status = status;
        self.entries.clear();
    }

    /// Checks whether the defect was found.
    #[must_use]
    pub fn is_found(&self) -> bool {
        self.status == SignalStatus::Found
    }
}

/// The records of all the defect signals.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Findings {
    pub unrestricted_from_and_owner_inconsistency: DefectRecord,
    pub privileged_address:                        DefectRecord,
    pub empty_transfer_event:                      DefectRecord,
}

impl Findings {
    /// Gets the record for `kind`.
    #[must_use]
    pub fn record(&self, kind: DefectKind) -> &DefectRecord {
        match kind {
            DefectKind::UnrestrictedFromAndOwnerInconsistency => {
                &self.unrestricted_from_and_owner_inconsistency
            }
            DefectKind::PrivilegedAddress => &self.privileged_address,
            DefectKind::EmptyTransferEvent => &self.empty_transfer_event,
        }
    }

    /// Gets the record for `kind` mutably.
    #[must_use]
    pub fn record_mut(&mut self, kind: DefectKind) -> &mut DefectRecord {
        match kind {
            DefectKind::UnrestrictedFromAndOwnerInconsistency => {
                &mut self.unrestricted_from_and_owner_inconsistency
            }
            DefectKind::PrivilegedAddress => &mut self.privileged_address,
            DefectKind::EmptyTransferEvent => &mut self.empty_transfer_event,
        }
    }

    /// Checks whether any defect was found.
    #[must_use]
    pub fn any_found(&self) -> bool {
        DefectKind::ALL.into_iter().any(|kind| self.record(kind).is_found())
    }
}

impl Default for Findings {
    fn default() -> Self {
        Self {
            unrestricted_from_and_owner_inconsistency: DefectRecord::new(
                DefectKind::UnrestrictedFromAndOwnerInconsistency,
            ),
            privileged_address:                        DefectRecord::new(
                DefectKind::PrivilegedAddress,
            ),
            empty_transfer_event:                      DefectRecord::new(
                DefectKind::EmptyTransferEvent,
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::defect::{DefectKind, DefectRecord, Findings, SignalStatus};

    #[test]
    fn entries_are_deduplicated() {
        let mut record = DefectRecord::new(DefectKind::EmptyTransferEvent);
        assert!(record.add("mint(address,uint256):standard1"));
        assert!(!record.add("mint(address,uint256):standard1"));

        assert_eq!(record.entries.len(), 1);
        assert_eq!(record.status, SignalStatus::Found);
    }

    #[test]
    fn removing_the_last_entry_clears_the_signal() {
        let mut record = DefectRecord::new(DefectKind::PrivilegedAddress);
        record.add("transfer:Ia_store-0-_owner");
        record.remove(0);

        assert_eq!(record.status, SignalStatus::Clean);
        assert!(!record.is_found());
    }

    #[test]
    fn records_are_keyed_by_kind() {
        let mut findings = Findings::default();
        findings.record_mut(DefectKind::PrivilegedAddress).add("f:v");

        assert!(findings.any_found());
        assert_eq!(DefectKind::PrivilegedAddress.key(), "privileged_address");
        assert!(!findings.record(DefectKind::EmptyTransferEvent).is_found());
    }
}
