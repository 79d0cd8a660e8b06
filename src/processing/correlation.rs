//! Grouping of readings that belong to the same transmission

use crate::core::{CorrelationKey, Reading};
use std::collections::{HashMap, HashSet};

/// One sniffer's report for a correlated transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contribution {
    pub sniffer_id: String,
    pub signal_strength: i32,
}

/// All sniffer reports sharing one correlation key
///
/// Duplicate reports from the same sniffer are kept as separate
/// contributions; [`ObservationSet::distinct_sniffers`] counts each sniffer
/// once.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationSet {
    pub key: CorrelationKey,
    contributions: Vec<Contribution>,
}

impl ObservationSet {
    pub fn new(key: CorrelationKey) -> Self {
        Self {
            key,
            contributions: Vec::new(),
        }
    }

    pub fn push(&mut self, sniffer_id: String, signal_strength: i32) {
        self.contributions.push(Contribution {
            sniffer_id,
            signal_strength,
        });
    }

    pub fn contributions(&self) -> &[Contribution] {
        &self.contributions
    }

    pub fn len(&self) -> usize {
        self.contributions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }

    /// Number of different sniffers that heard this transmission
    pub fn distinct_sniffers(&self) -> usize {
        self.contributions
            .iter()
            .map(|c| c.sniffer_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Mean signal strength per sniffer, in first-seen sniffer order
    pub fn mean_signal_by_sniffer(&self) -> Vec<(String, f64)> {
        let mut order: Vec<&str> = Vec::new();
        let mut sums: HashMap<&str, (f64, usize)> = HashMap::new();
        for c in &self.contributions {
            let entry = sums.entry(c.sniffer_id.as_str()).or_insert_with(|| {
                order.push(c.sniffer_id.as_str());
                (0.0, 0)
            });
            entry.0 += c.signal_strength as f64;
            entry.1 += 1;
        }
        order
            .into_iter()
            .map(|id| {
                let (sum, count) = sums[id];
                (id.to_string(), sum / count as f64)
            })
            .collect()
    }
}

/// Append-only index from correlation key to observation set
///
/// Iteration order of the finalized sets is unspecified.
#[derive(Debug, Default)]
pub struct CorrelationIndex {
    sets: HashMap<CorrelationKey, ObservationSet>,
    reading_count: usize,
}

impl CorrelationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reading to the set for its key, creating the set if absent
    pub fn ingest(&mut self, reading: Reading) {
        let Reading {
            transmitter_id,
            token,
            sniffer_id,
            signal_strength,
        } = reading;
        let key = CorrelationKey {
            transmitter_id,
            token,
        };
        self.sets
            .entry(key)
            .or_insert_with_key(|key| ObservationSet::new(key.clone()))
            .push(sniffer_id, signal_strength);
        self.reading_count += 1;
    }

    pub fn ingest_all<I>(&mut self, readings: I)
    where
        I: IntoIterator<Item = Reading>,
    {
        for reading in readings {
            self.ingest(reading);
        }
    }

    /// Number of observation sets
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Number of readings ingested so far
    pub fn reading_count(&self) -> usize {
        self.reading_count
    }

    pub fn get(&self, key: &CorrelationKey) -> Option<&ObservationSet> {
        self.sets.get(key)
    }

    /// Close ingestion and hand every set to the solving stage
    pub fn finalize(self) -> Vec<ObservationSet> {
        self.sets.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_by_transmitter_and_token() {
        let mut index = CorrelationIndex::new();
        index.ingest(Reading::new("mac-a", 10, "s1", -60));
        index.ingest(Reading::new("mac-a", 10, "s2", -65));
        index.ingest(Reading::new("mac-a", 11, "s1", -61));
        index.ingest(Reading::new("mac-b", 10, "s3", -70));

        assert_eq!(index.len(), 3);
        assert_eq!(index.reading_count(), 4);
        let set = index.get(&CorrelationKey::new("mac-a", 10)).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.distinct_sniffers(), 2);
    }

    #[test]
    fn test_duplicates_are_accumulated() {
        let mut index = CorrelationIndex::new();
        index.ingest_all(vec![
            Reading::new("mac-a", 1, "s1", -60),
            Reading::new("mac-a", 1, "s1", -64),
            Reading::new("mac-a", 1, "s2", -70),
        ]);
        let sets = index.finalize();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].len(), 3);
        assert_eq!(sets[0].distinct_sniffers(), 2);

        let means = sets[0].mean_signal_by_sniffer();
        assert_eq!(means, vec![("s1".to_string(), -62.0), ("s2".to_string(), -70.0)]);
    }

    #[test]
    fn test_finalize_returns_every_set() {
        let mut index = CorrelationIndex::new();
        for token in 0..50 {
            for sniffer in ["s1", "s2", "s3"] {
                index.ingest(Reading::new("mac", token, sniffer, -55));
            }
        }
        let mut tokens: Vec<i64> = index.finalize().into_iter().map(|s| s.key.token).collect();
        tokens.sort();
        assert_eq!(tokens, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_index() {
        let index = CorrelationIndex::new();
        assert!(index.is_empty());
        assert!(index.finalize().is_empty());
    }
}
