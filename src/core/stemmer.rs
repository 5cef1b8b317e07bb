// File: src/core/stemmer.rs
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

/// Exact lowercase forms mapped to their canonical stem. Consulted before any
/// suffix rule, so entries here also block false stemming ("stranger").
const IRREGULAR_FORMS: &[(&str, &str)] = &[
    ("stranger", "stranger"),
    ("making", "make"),
    ("exploration", "explore"),
    ("improve", "improve"),
    ("pulled", "pull"),
    ("pulling", "pull"),
    ("pulls", "pull"),
    ("dropped", "drop"),
    ("dropping", "drop"),
    ("said", "say"),
    ("went", "go"),
    ("had", "have"),
    ("came", "come"),
    ("made", "make"),
    ("took", "take"),
    ("saw", "see"),
    ("heard", "hear"),
    ("got", "get"),
    ("gave", "give"),
    ("told", "tell"),
    ("became", "become"),
    ("began", "begin"),
    ("brought", "bring"),
    ("built", "build"),
    ("bought", "buy"),
    ("caught", "catch"),
    ("chose", "choose"),
    ("did", "do"),
    ("drew", "draw"),
    ("drank", "drink"),
    ("drove", "drive"),
    ("ate", "eat"),
    ("fell", "fall"),
    ("felt", "feel"),
    ("fought", "fight"),
    ("found", "find"),
    ("flew", "fly"),
    ("forgot", "forget"),
    ("froze", "freeze"),
    ("grew", "grow"),
    ("hung", "hang"),
    ("kept", "keep"),
    ("knew", "know"),
    // "lay" stays unmapped: "laid" -> "lay" -> "lie" would leave "laid" without a fixed-point stem
    ("laid", "lay"),
    ("left", "leave"),
    ("led", "lead"),
    ("lent", "lend"),
    ("let", "let"),
    ("lit", "light"),
    ("lost", "lose"),
    ("meant", "mean"),
    ("met", "meet"),
    ("paid", "pay"),
    ("put", "put"),
    ("ran", "run"),
    ("read", "read"),
    ("rode", "ride"),
    ("rose", "rise"),
    ("sang", "sing"),
    ("sat", "sit"),
    ("set", "set"),
    ("shook", "shake"),
    ("shone", "shine"),
    ("shot", "shoot"),
    ("showed", "show"),
    ("shut", "shut"),
    ("sank", "sink"),
    ("slept", "sleep"),
    ("spoke", "speak"),
    ("spent", "spend"),
    ("spun", "spin"),
    ("stood", "stand"),
    ("stole", "steal"),
    ("stuck", "stick"),
    ("stung", "sting"),
    ("struck", "strike"),
    ("swam", "swim"),
    ("swore", "swear"),
    ("swept", "sweep"),
    ("swung", "swing"),
    ("taught", "teach"),
    ("tore", "tear"),
    ("threw", "throw"),
    ("understood", "understand"),
    ("woke", "wake"),
    ("wore", "wear"),
    ("wove", "weave"),
    ("won", "win"),
    ("wound", "wind"),
    ("wrote", "write"),
];

/// Suffixes appended to a stem when expanding it back into candidate forms.
const DERIVED_SUFFIXES: [&str; 6] = ["s", "ed", "ing", "er", "est", "ly"];

/// When a stripped base ends in a doubled consonant, whether one of the pair
/// is dropped ("dropp" -> "drop").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoublingUndo {
    Never,
    /// Only when the stripped base is at most this many characters long.
    BaseAtMost(usize),
    Always,
}

/// One ordered suffix-stripping rule.
#[derive(Debug, Clone, Copy)]
pub struct StemRule {
    pub suffix: &'static str,
    /// The word must be strictly longer than this for the rule to apply.
    pub longer_than: usize,
    pub replacement: &'static str,
    pub doubling: DoublingUndo,
    /// Endings that veto the rule ("bus", "glass", "analysis").
    pub unless_ends_with: &'static [&'static str],
}

impl StemRule {
    const fn strip(suffix: &'static str, longer_than: usize, doubling: DoublingUndo) -> Self {
        Self { suffix, longer_than, replacement: "", doubling, unless_ends_with: &[] }
    }

    fn apply(&self, word: &str, len: usize) -> Option<String> {
        if len <= self.longer_than {
            return None;
        }
        let base = word.strip_suffix(self.suffix)?;
        if self.unless_ends_with.iter().any(|ending| word.ends_with(ending)) {
            return None;
        }

        let base_len = len - self.suffix.chars().count();
        let undo = match self.doubling {
            DoublingUndo::Never => false,
            DoublingUndo::BaseAtMost(max) => base_len <= max,
            DoublingUndo::Always => true,
        };

        let mut stem = if undo && ends_in_doubled_consonant(base) {
            let mut trimmed = base.to_string();
            trimmed.pop();
            trimmed
        } else {
            base.to_string()
        };
        stem.push_str(self.replacement);
        Some(stem)
    }
}

/// Priority order matters: the first rule whose suffix and length bound match wins.
const RULES: [StemRule; 8] = [
    StemRule { suffix: "ies", longer_than: 4, replacement: "y", doubling: DoublingUndo::Never, unless_ends_with: &[] },
    StemRule::strip("ed", 3, DoublingUndo::BaseAtMost(4)),
    StemRule::strip("ing", 5, DoublingUndo::Always),
    StemRule::strip("er", 4, DoublingUndo::Always),
    StemRule::strip("est", 5, DoublingUndo::Always),
    StemRule { suffix: "ily", longer_than: 4, replacement: "y", doubling: DoublingUndo::Never, unless_ends_with: &[] },
    StemRule::strip("ly", 4, DoublingUndo::Never),
    StemRule { suffix: "s", longer_than: 2, replacement: "", doubling: DoublingUndo::Never, unless_ends_with: &["ss", "us", "is"] },
];

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

/// f, l, s and z are doubled in base spellings ("pull", "pass", "stuff", "buzz"),
/// so a trailing pair of them is never treated as inflectional doubling.
///
/// This holds for every rule that undoes doubling, including the ones that do
/// so regardless of length: "calling" -> "call" and "smaller" -> "small", not
/// the literal "cal" and "smal" a plain doubled-consonant check would give.
fn is_naturally_doubled(c: char) -> bool {
    matches!(c, 'f' | 'l' | 's' | 'z')
}

fn ends_in_doubled_consonant(base: &str) -> bool {
    let mut tail = base.chars().rev();
    match (tail.next(), tail.next()) {
        (Some(last), Some(prev)) => {
            last == prev
                && last.is_alphabetic()
                && !is_vowel(last)
                && !is_naturally_doubled(last)
        }
        _ => false,
    }
}

fn irregular_forms() -> &'static HashMap<&'static str, &'static str> {
    static TABLE: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| IRREGULAR_FORMS.iter().copied().collect())
}

/// Reduces inflected English words to a canonical stem using an irregular-form
/// table followed by ordered suffix rules. Stateless; cheap to copy around.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stemmer;

impl Stemmer {
    pub fn new() -> Self {
        Self
    }

    /// Returns the stem of `word`. Total over all strings; case-insensitive.
    pub fn stem(&self, word: &str) -> String {
        let word = word.trim().to_lowercase();
        let len = word.chars().count();
        if len < 3 {
            return word;
        }

        if let Some(&stem) = irregular_forms().get(word.as_str()) {
            return stem.to_string();
        }

        RULES
            .iter()
            .find_map(|rule| rule.apply(&word, len))
            .unwrap_or(word)
    }

    /// The lowercased word, its stem and, when they differ, the stem with each
    /// common inflectional suffix appended. Used for fuzzy dictionary lookups.
    pub fn all_forms(&self, word: &str) -> BTreeSet<String> {
        let lowered = word.trim().to_lowercase();
        let stem = self.stem(&lowered);

        let mut forms = BTreeSet::new();
        if stem != lowered {
            forms.extend(DERIVED_SUFFIXES.iter().map(|suffix| format!("{stem}{suffix}")));
        }
        forms.insert(lowered);
        forms.insert(stem);
        forms
    }
}
