//! Last-writer-wins reconciliation keyed by record hash.
//!
//! For every incoming record, in incoming order:
//!
//! - no local record with that hash: the incoming record is kept
//! - local timestamp strictly greater: the local record is kept and leaves
//!   the candidate pool
//! - otherwise (incoming newer or equal): the incoming record is kept and the
//!   local one is dropped
//!
//! A hash repeated within the incoming table is first collapsed to its newest
//! row, so each person is counted once in the [`MergeReport`].
//!
//! Local records no incoming hash matched are appended unchanged. Equal
//! timestamps resolve to the incoming record; that is a compatibility policy
//! with existing devices, see [`TieBreak`].
//!
//! There is no causal history here. Two devices editing the same person
//! concurrently are resolved purely by their wall clocks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Record, RecordHash};

/// How a timestamp tie between a local and an incoming record resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    /// The incoming (peer) record replaces the local one
    PreferIncoming,
}

/// The tie-break every device uses
pub const TIE_BREAK: TieBreak = TieBreak::PreferIncoming;

/// Where a surviving record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Peer,
}

/// Counters describing one merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Records decoded from the peer's bytes
    pub received: usize,
    /// Incoming records with a hash we did not have
    pub added: usize,
    /// Incoming records that replaced an older or equally old local record
    pub replaced: usize,
    /// Local records that beat a stale incoming record
    pub kept_local: usize,
    /// Local records no incoming record touched
    pub untouched_local: usize,
    /// Records in the store after the merge
    pub total: usize,
}

impl MergeReport {
    /// Whether the merge changed which record represents any person
    pub fn changed(&self) -> bool {
        self.added > 0 || self.replaced > 0
    }
}

/// Output of [`reconcile`]
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub records: Vec<(Record, Origin)>,
    pub report: MergeReport,
}

/// Merge `theirs` into `ours` without touching disk
pub fn reconcile(ours: Vec<Record>, theirs: Vec<Record>) -> Reconciled {
    let mut report = MergeReport {
        received: theirs.len(),
        ..Default::default()
    };
    let theirs = collapse_incoming(theirs);
    let mut remaining = ours;
    let mut merged = Vec::with_capacity(remaining.len() + theirs.len());

    for theirs_record in theirs {
        let matched = remaining
            .iter()
            .position(|ours_record| ours_record.hash == theirs_record.hash);

        match matched {
            None => {
                report.added += 1;
                merged.push((theirs_record, Origin::Peer));
            }
            Some(index) if local_wins(&remaining[index], &theirs_record) => {
                report.kept_local += 1;
                merged.push((remaining.remove(index), Origin::Local));
            }
            Some(index) => {
                remaining.remove(index);
                report.replaced += 1;
                merged.push((theirs_record, Origin::Peer));
            }
        }
    }

    report.untouched_local = remaining.len();
    merged.extend(remaining.into_iter().map(|r| (r, Origin::Local)));

    let records = dedup_newest(merged);
    report.total = records.len();

    Reconciled { records, report }
}

fn local_wins(local: &Record, incoming: &Record) -> bool {
    match TIE_BREAK {
        TieBreak::PreferIncoming => local.timestamp > incoming.timestamp,
    }
}

fn collapse_incoming(theirs: Vec<Record>) -> Vec<Record> {
    dedup_newest(theirs.into_iter().map(|r| (r, Origin::Peer)).collect())
        .into_iter()
        .map(|(record, _)| record)
        .collect()
}

/// Collapse repeated hashes to the newest record, keeping first-seen position.
/// Later occurrences win timestamp ties.
///
/// Only does anything when an input already carried a hash twice.
fn dedup_newest(records: Vec<(Record, Origin)>) -> Vec<(Record, Origin)> {
    let mut position: HashMap<RecordHash, usize> = HashMap::with_capacity(records.len());
    let mut out: Vec<(Record, Origin)> = Vec::with_capacity(records.len());

    for (record, origin) in records {
        match position.get(&record.hash) {
            Some(&i) => {
                if record.timestamp >= out[i].0.timestamp {
                    out[i] = (record, origin);
                }
            }
            None => {
                position.insert(record.hash.clone(), out.len());
                out.push((record, origin));
            }
        }
    }

    out
}
