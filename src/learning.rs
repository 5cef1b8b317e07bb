// File: src/learning.rs
use crate::core::stemmer::Stemmer;
use crate::core::types::{Aggregate, AggregateEntry, Observation, ObservationBatch};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Occurrences taken off a stem per withdrawal event.
const WITHDRAWAL_DECREMENT: u64 = 1;

/// Per-stem status flags a reader can toggle from the word list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordFlag {
    Known,
    Library,
}

/// What a withdrawal did to the aggregate.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Withdrawal {
    pub decremented: usize,
    pub deleted: usize,
}

impl Withdrawal {
    pub fn changed(&self) -> bool {
        self.decremented + self.deleted > 0
    }
}

/// Folds scanner observations into a per-scope aggregate, keyed by stem.
///
/// Counts and variant membership depend only on the multiset of observations
/// merged, never on their order or batching. Every operation leaves each
/// retained entry with a positive count and at least one variant.
pub struct FrequencyAggregator {
    stemmer: Stemmer,
}

impl Default for FrequencyAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrequencyAggregator {
    pub fn new() -> Self {
        Self { stemmer: Stemmer::new() }
    }

    pub fn stemmer(&self) -> &Stemmer {
        &self.stemmer
    }

    /// Merges one batch of `surface form -> count`. Returns the number of
    /// surface forms that contributed.
    pub fn merge(&self, aggregate: &mut Aggregate, batch: &ObservationBatch) -> usize {
        let mut merged = 0;
        for (surface_form, &count) in batch {
            let surface_form = surface_form.trim();
            if surface_form.is_empty() || count == 0 {
                trace!(surface_form, count, "skipping empty observation");
                continue;
            }
            let stem = self.stemmer.stem(surface_form);
            match aggregate.entry(stem) {
                Entry::Vacant(slot) => {
                    let stem = slot.key().clone();
                    slot.insert(AggregateEntry::new(stem, surface_form, count));
                }
                Entry::Occupied(mut slot) => {
                    let entry = slot.get_mut();
                    entry.total_count = entry.total_count.saturating_add(count);
                    entry.variant_forms.insert(surface_form.to_string());
                }
            }
            merged += 1;
        }
        debug!(merged, stems = aggregate.len(), "merged observation batch");
        merged
    }

    /// Merges stem-level observations carrying their own variants and
    /// dictionary metadata. Metadata only fills fields that are still empty.
    pub fn merge_observations(
        &self,
        aggregate: &mut Aggregate,
        observations: &BTreeMap<String, Observation>,
    ) -> usize {
        let mut merged = 0;
        for (word, observation) in observations {
            let word = word.trim();
            if word.is_empty() || observation.count == 0 {
                continue;
            }
            let stem = self.stemmer.stem(word);
            let entry = aggregate.entry(stem).or_insert_with_key(|stem| AggregateEntry {
                stem: stem.clone(),
                total_count: 0,
                variant_forms: Default::default(),
                metadata: Default::default(),
                is_known: false,
                is_library: false,
            });
            entry.total_count = entry.total_count.saturating_add(observation.count);
            if observation.variants.is_empty() {
                entry.variant_forms.insert(word.to_string());
            } else {
                entry.variant_forms.extend(observation.variants.iter().cloned());
            }
            entry.metadata.fill_from(&observation.metadata);
            merged += 1;
        }
        debug!(merged, stems = aggregate.len(), "merged annotated observations");
        merged
    }

    /// Withdraws one occurrence per listed stem. Entries that reach zero are
    /// deleted; stems not in the aggregate are ignored.
    pub fn remove<S: AsRef<str>>(&self, aggregate: &mut Aggregate, stems: &[S]) -> Withdrawal {
        let mut outcome = Withdrawal::default();
        for stem in stems {
            let stem = stem.as_ref().trim().to_lowercase();
            let Some(entry) = aggregate.get_mut(&stem) else {
                trace!(%stem, "withdrawn stem not present");
                continue;
            };
            entry.total_count = entry.total_count.saturating_sub(WITHDRAWAL_DECREMENT);
            if entry.total_count == 0 {
                aggregate.remove_entry(&stem);
                outcome.deleted += 1;
            } else {
                outcome.decremented += 1;
            }
        }
        debug!(?outcome, stems = aggregate.len(), "applied withdrawal");
        outcome
    }

    /// Sets `flag` on every listed stem that is present. Returns how many
    /// entries changed.
    pub fn mark<S: AsRef<str>>(&self, aggregate: &mut Aggregate, stems: &[S], flag: WordFlag) -> usize {
        let mut changed = 0;
        for stem in stems {
            let stem = stem.as_ref().trim().to_lowercase();
            if let Some(entry) = aggregate.get_mut(&stem) {
                let slot = match flag {
                    WordFlag::Known => &mut entry.is_known,
                    WordFlag::Library => &mut entry.is_library,
                };
                if !*slot {
                    *slot = true;
                    changed += 1;
                }
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn batch(pairs: &[(&str, u64)]) -> ObservationBatch {
        pairs.iter().map(|&(word, count)| (word.to_string(), count)).collect()
    }

    fn merged(pairs: &[(&str, u64)]) -> Aggregate {
        let mut aggregate = Aggregate::new();
        FrequencyAggregator::new().merge(&mut aggregate, &batch(pairs));
        aggregate
    }

    #[test]
    fn inflections_collapse_into_one_entry() {
        let aggregate = merged(&[("drop", 1), ("dropped", 2), ("dropping", 1)]);
        assert_eq!(aggregate.len(), 1);
        let entry = aggregate.get("drop").unwrap();
        assert_eq!(entry.total_count, 4);
        let variants: Vec<&str> = entry.variant_forms.iter().map(String::as_str).collect();
        assert_eq!(variants, vec!["drop", "dropped", "dropping"]);
    }

    #[test]
    fn zero_counts_and_blank_forms_are_ignored() {
        let aggregate = merged(&[("books", 0), ("  ", 3)]);
        assert!(aggregate.is_empty());
    }

    #[test]
    fn remove_deletes_entries_that_reach_zero() {
        let aggregator = FrequencyAggregator::new();
        let mut aggregate = merged(&[("running", 1)]);
        let outcome = aggregator.remove(&mut aggregate, &["run"]);
        assert_eq!(outcome, Withdrawal { decremented: 0, deleted: 1 });
        assert!(aggregate.get("run").is_none());
    }

    #[test]
    fn remove_decrements_by_exactly_one() {
        let aggregator = FrequencyAggregator::new();
        let mut aggregate = merged(&[("books", 3)]);
        aggregator.remove(&mut aggregate, &["book", "book"]);
        assert_eq!(aggregate.get("book").unwrap().total_count, 1);
    }

    #[test]
    fn removing_absent_stem_is_a_no_op() {
        let aggregator = FrequencyAggregator::new();
        let mut aggregate = merged(&[("books", 1)]);
        let before = aggregate.clone();
        let outcome = aggregator.remove(&mut aggregate, &["glass"]);
        assert!(!outcome.changed());
        assert_eq!(aggregate, before);
    }

    #[test]
    fn annotated_observations_keep_first_metadata() {
        let aggregator = FrequencyAggregator::new();
        let mut aggregate = Aggregate::new();
        let mut first = Observation { count: 2, ..Default::default() };
        first.variants.insert("Strangers".to_string());
        first.metadata.translation = "陌生人".to_string();
        let mut second = Observation { count: 1, ..Default::default() };
        second.metadata.translation = "外人".to_string();
        second.metadata.definition = "a person one does not know".to_string();

        aggregator.merge_observations(&mut aggregate, &BTreeMap::from([("strangers".to_string(), first)]));
        aggregator.merge_observations(&mut aggregate, &BTreeMap::from([("stranger".to_string(), second)]));

        let entry = aggregate.get("stranger").unwrap();
        assert_eq!(entry.total_count, 3);
        assert_eq!(entry.metadata.translation, "陌生人");
        assert_eq!(entry.metadata.definition, "a person one does not know");
        assert!(entry.variant_forms.contains("Strangers"));
        assert!(entry.variant_forms.contains("stranger"));
    }

    #[test]
    fn mark_sets_flags_on_present_stems_only() {
        let aggregator = FrequencyAggregator::new();
        let mut aggregate = merged(&[("books", 1), ("walked", 1)]);
        assert_eq!(aggregator.mark(&mut aggregate, &["book", "missing"], WordFlag::Known), 1);
        assert_eq!(aggregator.mark(&mut aggregate, &["book"], WordFlag::Known), 0);
        aggregator.mark(&mut aggregate, &["walk"], WordFlag::Library);
        assert!(aggregate.get("book").unwrap().is_known);
        assert!(aggregate.get("walk").unwrap().is_library);
        assert!(!aggregate.get("walk").unwrap().is_known);
    }

    fn word_batch() -> impl Strategy<Value = ObservationBatch> {
        let words = prop::sample::select(vec![
            "drop", "dropped", "dropping", "books", "book", "stories", "story", "running",
            "run", "walked", "walker", "bus", "glass", "happily",
        ]);
        prop::collection::btree_map(words.prop_map(str::to_string), 1u64..5, 0..8)
    }

    proptest! {
        #[test]
        fn merge_is_order_independent(a in word_batch(), b in word_batch()) {
            let aggregator = FrequencyAggregator::new();
            let mut ab = Aggregate::new();
            aggregator.merge(&mut ab, &a);
            aggregator.merge(&mut ab, &b);
            let mut ba = Aggregate::new();
            aggregator.merge(&mut ba, &b);
            aggregator.merge(&mut ba, &a);
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn merge_then_remove_keeps_counts_positive(a in word_batch(), withdrawn in prop::collection::vec("[a-z]{2,8}", 0..10)) {
            let aggregator = FrequencyAggregator::new();
            let mut aggregate = Aggregate::new();
            aggregator.merge(&mut aggregate, &a);
            aggregator.remove(&mut aggregate, withdrawn.as_slice());
            for (_, entry) in aggregate.iter() {
                prop_assert!(entry.total_count >= 1);
                prop_assert!(!entry.variant_forms.is_empty());
            }
        }
    }
}
