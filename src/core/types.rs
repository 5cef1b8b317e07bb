// src/core/types.rs
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A canonical stem, the key of the aggregate.
pub type Stem = String;

/// One scanner pass: surface form -> number of occurrences on the page.
pub type ObservationBatch = BTreeMap<String, u64>;

/// Dictionary data attached to a stem by the backend. Passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordMetadata {
    #[serde(rename = "chinese", default, deserialize_with = "lenient_string")]
    pub translation: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl WordMetadata {
    /// Fills empty fields from `other`; values already present are kept.
    pub fn fill_from(&mut self, other: &WordMetadata) {
        if self.translation.is_empty() {
            self.translation.clone_from(&other.translation);
        }
        if self.definition.is_empty() {
            self.definition.clone_from(&other.definition);
        }
        if self.level.is_none() {
            self.level.clone_from(&other.level);
        }
    }
}

/// Everything the page knows about one stem.
/// This is the "value" in the per-scope frequency table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateEntry {
    #[serde(rename = "baseWord", default)]
    pub stem: Stem,
    /// Total occurrences across every variant. Never zero for a retained entry.
    #[serde(rename = "count")]
    pub total_count: u64,
    /// All surface spellings seen for this stem, e.g. {"drop", "dropped"}.
    #[serde(rename = "originalWords", default, deserialize_with = "variant_forms")]
    pub variant_forms: BTreeSet<String>,
    #[serde(flatten)]
    pub metadata: WordMetadata,
    #[serde(default)]
    pub is_known: bool,
    #[serde(default)]
    pub is_library: bool,
}

impl AggregateEntry {
    pub fn new(stem: impl Into<Stem>, surface_form: impl Into<String>, count: u64) -> Self {
        let mut variant_forms = BTreeSet::new();
        variant_forms.insert(surface_form.into());
        Self {
            stem: stem.into(),
            total_count: count,
            variant_forms,
            metadata: WordMetadata::default(),
            is_known: false,
            is_library: false,
        }
    }
}

/// Per-scope frequency table keyed by stem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Aggregate {
    entries: BTreeMap<Stem, AggregateEntry>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stem: &str) -> Option<&AggregateEntry> {
        self.entries.get(stem)
    }

    pub(crate) fn get_mut(&mut self, stem: &str) -> Option<&mut AggregateEntry> {
        self.entries.get_mut(stem)
    }

    pub(crate) fn entry(&mut self, stem: Stem) -> std::collections::btree_map::Entry<'_, Stem, AggregateEntry> {
        self.entries.entry(stem)
    }

    pub(crate) fn remove_entry(&mut self, stem: &str) -> Option<AggregateEntry> {
        self.entries.remove(stem)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Stem, &AggregateEntry)> {
        self.entries.iter()
    }

    /// Sum of every entry's count.
    pub fn total_occurrences(&self) -> u64 {
        self.entries.values().map(|entry| entry.total_count).sum()
    }

    /// Entries ordered by descending count, ties by stem. Display order only.
    pub fn ranked(&self) -> Vec<&AggregateEntry> {
        let mut ranked: Vec<&AggregateEntry> = self.entries.values().collect();
        ranked.sort_by(|a, b| b.total_count.cmp(&a.total_count).then_with(|| a.stem.cmp(&b.stem)));
        ranked
    }

    /// Restores the retained-entry invariant on data that came from outside:
    /// zero-count entries are dropped, the stem field agrees with its key, and
    /// an entry with no recorded variants gets its stem as the sole variant.
    pub fn normalize(&mut self) {
        self.entries.retain(|_, entry| entry.total_count > 0);
        for (stem, entry) in self.entries.iter_mut() {
            if entry.stem != *stem {
                entry.stem.clone_from(stem);
            }
            if entry.variant_forms.is_empty() {
                entry.variant_forms.insert(stem.clone());
            }
        }
    }
}

impl FromIterator<AggregateEntry> for Aggregate {
    fn from_iter<I: IntoIterator<Item = AggregateEntry>>(iter: I) -> Self {
        let entries = iter.into_iter().map(|entry| (entry.stem.clone(), entry)).collect();
        Self { entries }
    }
}

/// A stem-level observation as emitted by the page scanner: the number of
/// highlighted occurrences plus the spellings and dictionary data it saw.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    #[serde(default)]
    pub count: u64,
    #[serde(rename = "originalWords", default, deserialize_with = "variant_forms")]
    pub variants: BTreeSet<String>,
    #[serde(flatten)]
    pub metadata: WordMetadata,
}

/// Shapes the variant collection has been persisted in over time.
#[derive(Deserialize)]
#[serde(untagged)]
enum VariantShape {
    List(Vec<String>),
    Keyed(BTreeMap<String, serde_json::Value>),
    Missing,
}

/// Every ingestion path funnels through here, so the in-memory form is always
/// one ordered set no matter how the data was written.
fn variant_forms<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let forms: Vec<String> = match VariantShape::deserialize(deserializer)? {
        VariantShape::List(list) => list,
        VariantShape::Keyed(map) => map.into_keys().collect(),
        VariantShape::Missing => Vec::new(),
    };
    Ok(forms
        .into_iter()
        .map(|form| form.trim().to_string())
        .filter(|form| !form.is_empty())
        .collect())
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_accept_array_and_object_shapes() {
        let from_array: AggregateEntry = serde_json::from_str(
            r#"{"baseWord":"drop","count":3,"originalWords":["dropped","drop"]}"#,
        )
        .unwrap();
        let from_object: AggregateEntry = serde_json::from_str(
            r#"{"baseWord":"drop","count":3,"originalWords":{"drop":true,"dropped":true}}"#,
        )
        .unwrap();
        assert_eq!(from_array.variant_forms, from_object.variant_forms);
        assert_eq!(from_array.variant_forms.len(), 2);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let entry: AggregateEntry =
            serde_json::from_str(r#"{"count":1,"originalWords":null,"chinese":null}"#).unwrap();
        assert!(entry.variant_forms.is_empty());
        assert!(entry.metadata.translation.is_empty());
        assert!(!entry.is_known);
    }

    #[test]
    fn serialized_entry_uses_persisted_field_names() {
        let mut entry = AggregateEntry::new("drop", "dropped", 2);
        entry.metadata.translation = "掉落".to_string();
        entry.is_library = true;
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["baseWord"], "drop");
        assert_eq!(json["count"], 2);
        assert_eq!(json["originalWords"][0], "dropped");
        assert_eq!(json["chinese"], "掉落");
        assert_eq!(json["isLibrary"], true);
        assert!(json.get("level").is_none());
    }

    #[test]
    fn normalize_enforces_retained_entry_invariant() {
        let mut aggregate: Aggregate = serde_json::from_str(
            r#"{
                "drop": {"count": 2, "originalWords": {}},
                "gone": {"count": 0, "originalWords": ["gone"]},
                "walk": {"baseWord": "walked", "count": 1, "originalWords": ["walked"]}
            }"#,
        )
        .unwrap();
        aggregate.normalize();

        assert_eq!(aggregate.len(), 2);
        assert!(aggregate.get("gone").is_none());
        assert!(aggregate.get("drop").unwrap().variant_forms.contains("drop"));
        assert_eq!(aggregate.get("walk").unwrap().stem, "walk");
    }

    #[test]
    fn ranked_orders_by_count_then_stem() {
        let aggregate: Aggregate = [
            AggregateEntry::new("bravo", "bravo", 1),
            AggregateEntry::new("alpha", "alpha", 1),
            AggregateEntry::new("charlie", "charlie", 5),
        ]
        .into_iter()
        .collect();
        let order: Vec<&str> = aggregate.ranked().iter().map(|e| e.stem.as_str()).collect();
        assert_eq!(order, vec!["charlie", "alpha", "bravo"]);
        assert_eq!(aggregate.total_occurrences(), 7);
    }
}
