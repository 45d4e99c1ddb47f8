//! Ranking of sequential lock nodes.

use std::cmp::Ordering;

use tracing::trace;
use znode_lock_core::error::{LockResult, ProtocolViolation};

/// The store-assigned numeric suffix of a sequential node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceNumber {
    value: u64,
    width: usize,
}

impl SequenceNumber {
    /// Parses the suffix that follows `prefix` in a child name. The suffix
    /// must be non-empty and consist of decimal digits only.
    pub fn after_prefix(name: &str, prefix: &str) -> Option<Self> {
        let digits = name.strip_prefix(prefix)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let value = digits.parse().ok()?;
        Some(Self {
            value,
            width: digits.len(),
        })
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

impl PartialOrd for SequenceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SequenceNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .cmp(&other.value)
            .then(self.width.cmp(&other.width))
    }
}

/// Where a contender stands among its siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rank {
    /// Lowest sequence number: the lock is held.
    Holder,
    /// Queued behind `predecessor`, the sibling immediately below.
    Waiting { predecessor: String },
    /// The contender's own node is missing from the listing.
    Unranked,
}

/// Ranks `own` among the children of the lock's parent.
///
/// Only children named `<prefix><digits>` with as many digits as `own` take
/// part, which keeps unrelated locks sharing a parent out of the queue. A
/// longer suffix belongs to a lock whose leaf extends this one with digits
/// (`job1` next to `job`) and is skipped. A shorter suffix is rejected rather
/// than risking a mis-ordered queue.
pub fn rank(children: &[String], prefix: &str, own: &str) -> LockResult<Rank> {
    let own_sequence = SequenceNumber::after_prefix(own, prefix)
        .ok_or_else(|| ProtocolViolation::MissingSequence(own.to_string()))?;

    let mut siblings = Vec::with_capacity(children.len());
    for child in children {
        let Some(sequence) = SequenceNumber::after_prefix(child, prefix) else {
            continue;
        };
        if sequence.width() > own_sequence.width() {
            continue;
        }
        if sequence.width() < own_sequence.width() {
            return Err(ProtocolViolation::SequenceWidthMismatch {
                expected: own_sequence.width(),
                found: child.clone(),
            }
            .into());
        }
        siblings.push((sequence, child.as_str()));
    }
    siblings.sort_unstable_by(|a, b| a.0.cmp(&b.0));

    let Some(position) = siblings.iter().position(|(_, name)| *name == own) else {
        trace!(own, contenders = siblings.len(), "own node missing from listing");
        return Ok(Rank::Unranked);
    };
    trace!(own, position, contenders = siblings.len(), "ranked lock node");

    Ok(match position {
        0 => Rank::Holder,
        n => Rank::Waiting {
            predecessor: siblings[n - 1].1.to_string(),
        },
    })
}
