//! Per request bookkeeping of which items were already answered, and by
//! which processor.
//!
//! Requests that several processors may answer piecemeal (named
//! annotations) share one [CoverageSet]. Each processor registers an item
//! before sending it. The lowest priority value wins: a processor may
//! replace an item sent by a less authoritative one, but never one sent
//! by an equal or more authoritative one.

use seqgate_api::Priority;
use std::collections::BTreeMap;

/// Something a processor can answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CoverageItem {
    /// The canonical sequence metadata.
    BioseqInfo,
    /// A named annotation.
    NamedAnnot(String),
}

/// Whether an item was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// Requested, not answered yet.
    Unprocessed,
    /// Answered by the processor with this priority.
    Processed(Priority),
}

/// Outcome of [CoverageSet::register].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Nobody had answered the item.
    Claimed,
    /// A less authoritative processor had answered it, it is replaced.
    Overwritten {
        /// Who had answered.
        previous: Priority,
    },
    /// An equal or more authoritative processor answered it already.
    Suppressed {
        /// Who answered.
        holder: Priority,
    },
}

impl Claim {
    /// True if the caller should send its answer.
    pub fn should_emit(&self) -> bool {
        !matches!(self, Self::Suppressed { .. })
    }
}

/// The coverage state of one request. Entries are never removed.
#[derive(Debug, Default)]
pub struct CoverageSet {
    items: BTreeMap<CoverageItem, Coverage>,
}

impl CoverageSet {
    /// Track `names` as requested annotation names.
    pub fn add_annot_names<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.items
                .entry(CoverageItem::NamedAnnot(name.into()))
                .or_insert(Coverage::Unprocessed);
        }
    }

    /// Register `priority` as the answerer of `item`.
    pub fn register(&mut self, item: CoverageItem, priority: Priority) -> Claim {
        let entry = self.items.entry(item).or_insert(Coverage::Unprocessed);
        match *entry {
            Coverage::Unprocessed => {
                *entry = Coverage::Processed(priority);
                Claim::Claimed
            }
            Coverage::Processed(previous) if previous > priority => {
                *entry = Coverage::Processed(priority);
                Claim::Overwritten { previous }
            }
            Coverage::Processed(holder) => Claim::Suppressed { holder },
        }
    }

    /// The state of an item, if tracked.
    pub fn get(&self, item: &CoverageItem) -> Option<Coverage> {
        self.items.get(item).copied()
    }

    /// Requested annotation names nobody has answered yet.
    pub fn unprocessed_annot_names(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|(item, cov)| match (item, cov) {
                (CoverageItem::NamedAnnot(n), Coverage::Unprocessed) => {
                    Some(n.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// True when every tracked item was answered.
    pub fn is_complete(&self) -> bool {
        self.items.values().all(|c| *c != Coverage::Unprocessed)
    }

    /// All tracked items.
    pub fn iter(&self) -> impl Iterator<Item = (&CoverageItem, &Coverage)> {
        self.items.iter()
    }

    /// Number of tracked items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn na(n: &str) -> CoverageItem {
        CoverageItem::NamedAnnot(n.to_string())
    }

    #[test]
    fn first_claim_wins_ties() {
        let mut c = CoverageSet::default();
        c.add_annot_names(["a", "b"]);
        assert!(!c.is_complete());

        assert_eq!(Claim::Claimed, c.register(na("a"), 2));
        assert_eq!(Claim::Suppressed { holder: 2 }, c.register(na("a"), 2));
        assert_eq!(Claim::Suppressed { holder: 2 }, c.register(na("a"), 3));
        assert_eq!(vec!["b".to_string()], c.unprocessed_annot_names());
    }

    #[test]
    fn more_authoritative_overwrites() {
        let mut c = CoverageSet::default();
        assert_eq!(Claim::Claimed, c.register(na("a"), 5));
        let claim = c.register(na("a"), 1);
        assert_eq!(Claim::Overwritten { previous: 5 }, claim);
        assert!(claim.should_emit());
        assert_eq!(Some(Coverage::Processed(1)), c.get(&na("a")));
    }

    #[test]
    fn never_shrinks() {
        let mut c = CoverageSet::default();
        c.add_annot_names(["a"]);
        c.register(CoverageItem::BioseqInfo, 0);
        c.register(na("a"), 0);
        c.add_annot_names(["a"]);
        assert_eq!(2, c.len());
        assert!(c.is_complete());
        assert_eq!(Some(Coverage::Processed(0)), c.get(&na("a")));
    }
}
