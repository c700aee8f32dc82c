//! Headword index: a flat table keyed by normalized word plus a prefix tree
//! rebuilt from it on demand.
//!
//! Mutations only touch the flat table. Call [`IndexEngine::build_index`]
//! after a batch of `add_word`/`remove_word` calls before relying on
//! [`IndexEngine::prefix_search`]; the other queries read the table directly.

use crate::tokenizer::normalize_word;
use crate::trie::TrieStore;
use anyhow::{Context, Result};
use regex::RegexBuilder;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Largest edit distance accepted by [`IndexEngine::fuzzy_search`].
pub const FUZZY_MAX_DISTANCE: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordEntry {
    pub word: String,
    pub normalized: String,
    pub source_ids: Vec<String>,
    pub frequency: u32,
}

#[derive(Debug, Default)]
pub struct IndexEngine {
    entries: BTreeMap<String, WordEntry>,
    membership: BTreeMap<String, BTreeSet<String>>,
    trie: TrieStore,
    built: bool,
}

impl IndexEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_word(&mut self, word: &str, source_id: &str) {
        let norm = normalize_word(word);
        if norm.is_empty() {
            return;
        }
        let entry = self.entries.entry(norm.clone()).or_insert_with(|| WordEntry {
            word: word.trim().to_string(),
            normalized: norm.clone(),
            source_ids: Vec::new(),
            frequency: 0,
        });
        if !entry.source_ids.iter().any(|s| s == source_id) {
            entry.source_ids.push(source_id.to_string());
        }
        entry.frequency += 1;
        self.membership.entry(source_id.to_string()).or_default().insert(norm);
        self.built = false;
    }

    pub fn remove_word(&mut self, word: &str, source_id: &str) {
        let norm = normalize_word(word);
        if let Some(entry) = self.entries.get_mut(&norm) {
            let before = entry.source_ids.len();
            entry.source_ids.retain(|s| s != source_id);
            let after = entry.source_ids.len();
            if after == 0 {
                self.entries.remove(&norm);
            }
            if after != before {
                self.built = false;
            }
        }
        if let Some(words) = self.membership.get_mut(source_id) {
            words.remove(&norm);
            if words.is_empty() {
                self.membership.remove(source_id);
            }
        }
    }

    pub fn clear_dictionary(&mut self, source_id: &str) {
        let words: Vec<String> = match self.membership.get(source_id) {
            Some(set) => set.iter().cloned().collect(),
            None => return,
        };
        for w in &words {
            self.remove_word(w, source_id);
        }
        tracing::debug!(source_id, removed = words.len(), "cleared source from index");
    }

    pub fn build_index(&mut self) {
        let mut trie = TrieStore::new();
        for (key, entry) in &self.entries {
            trie.insert(key, &entry.word);
        }
        self.trie = trie;
        self.built = true;
        tracing::debug!(words = self.entries.len(), nodes = self.trie.node_count(), "prefix tree rebuilt");
    }

    /// True when the prefix tree reflects every mutation so far.
    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn exact_match(&self, word: &str) -> Option<&str> {
        self.entry(word).map(|e| e.word.as_str())
    }

    pub fn entry(&self, word: &str) -> Option<&WordEntry> {
        self.entries.get(&normalize_word(word))
    }

    pub fn prefix_search(&self, prefix: &str, max: usize) -> Vec<String> {
        let norm = normalize_word(prefix);
        if norm.is_empty() {
            return Vec::new();
        }
        self.trie.collect_prefix(&norm, max)
    }

    pub fn fuzzy_search(&self, word: &str, max: usize) -> Vec<String> {
        let query: Vec<char> = normalize_word(word).chars().collect();
        if query.is_empty() || max == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(usize, &str)> = Vec::new();
        for (key, entry) in &self.entries {
            let candidate: Vec<char> = key.chars().collect();
            if candidate.len().abs_diff(query.len()) > FUZZY_MAX_DISTANCE {
                continue;
            }
            let d = edit_distance(&query, &candidate);
            if d <= FUZZY_MAX_DISTANCE {
                scored.push((d, entry.word.as_str()));
            }
        }
        // stable: equal distances keep table order
        scored.sort_by_key(|(d, _)| *d);
        scored.into_iter().take(max).map(|(_, w)| w.to_string()).collect()
    }

    pub fn wildcard_search(&self, pattern: &str, max: usize) -> Vec<String> {
        let pattern = pattern.trim();
        if pattern.is_empty() || max == 0 {
            return Vec::new();
        }
        let re = match RegexBuilder::new(&wildcard_to_regex(pattern)).case_insensitive(true).build() {
            Ok(re) => re,
            Err(err) => {
                tracing::debug!(pattern, %err, "wildcard pattern rejected");
                return Vec::new();
            }
        };
        self.entries
            .values()
            .filter(|e| re.is_match(&e.word))
            .take(max)
            .map(|e| e.word.clone())
            .collect()
    }

    pub fn regex_search(&self, pattern: &str, max: usize) -> Vec<String> {
        if pattern.is_empty() || max == 0 {
            return Vec::new();
        }
        let re = match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => re,
            Err(err) => {
                tracing::debug!(pattern, %err, "invalid regex, returning no results");
                return Vec::new();
            }
        };
        self.entries
            .values()
            .filter(|e| re.is_match(&e.word))
            .take(max)
            .map(|e| e.word.clone())
            .collect()
    }

    pub fn dictionaries_for_word(&self, word: &str) -> Vec<String> {
        self.entry(word).map(|e| e.source_ids.clone()).unwrap_or_default()
    }

    pub fn all_words(&self) -> Vec<String> {
        self.entries.values().map(|e| e.word.clone()).collect()
    }

    pub fn word_count(&self) -> usize {
        self.entries.len()
    }

    /// Write one `word\tfrequency\tsrc1|src2` line per entry. Tabs, newlines,
    /// `|` and `\` inside fields are backslash-escaped.
    pub fn save_index<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let f = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut out = BufWriter::new(f);
        for e in self.entries.values() {
            let sources: Vec<String> = e.source_ids.iter().map(|s| escape_field(s)).collect();
            writeln!(out, "{}\t{}\t{}", escape_field(&e.word), e.frequency, sources.join("|"))?;
        }
        out.flush().with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    /// Replace the whole engine state with the contents of a file written by
    /// [`IndexEngine::save_index`], then rebuild the prefix tree.
    pub fn load_index<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let mut entries = BTreeMap::new();
        let mut membership: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (lineno, line) in BufReader::new(f).lines().enumerate() {
            let line = line.with_context(|| format!("read {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let Some(entry) = parse_line(&line) else {
                tracing::warn!(path = %path.display(), line = lineno + 1, "skipping malformed index line");
                continue;
            };
            for src in &entry.source_ids {
                membership.entry(src.clone()).or_default().insert(entry.normalized.clone());
            }
            entries.insert(entry.normalized.clone(), entry);
        }
        self.entries = entries;
        self.membership = membership;
        self.build_index();
        tracing::info!(path = %path.display(), words = self.entries.len(), "loaded word index");
        Ok(())
    }
}

fn parse_line(line: &str) -> Option<WordEntry> {
    let mut parts = line.splitn(3, '\t');
    let word = unescape_field(parts.next()?)?;
    let frequency = parts.next()?.trim().parse().ok()?;
    let sources = parts.next().unwrap_or("");
    let normalized = normalize_word(&word);
    if normalized.is_empty() {
        return None;
    }
    let mut source_ids: Vec<String> = Vec::new();
    for raw in sources.split('|').filter(|s| !s.is_empty()) {
        let id = unescape_field(raw)?;
        if !source_ids.contains(&id) {
            source_ids.push(id);
        }
    }
    // every entry is owned by at least one source
    if source_ids.is_empty() {
        return None;
    }
    Some(WordEntry { word, normalized, source_ids, frequency })
}

fn escape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for ch in field.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '|' => out.push_str("\\p"),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape_field`]; `None` on a dangling or unknown escape.
fn unescape_field(field: &str) -> Option<String> {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        out.push(match chars.next()? {
            '\\' => '\\',
            't' => '\t',
            'n' => '\n',
            'r' => '\r',
            'p' => '|',
            _ => return None,
        });
    }
    Some(out)
}

fn wildcard_to_regex(pattern: &str) -> String {
    let mut re = String::with_capacity(pattern.len() * 2 + 2);
    re.push('^');
    let mut buf = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            _ => re.push_str(&regex::escape(ch.encode_utf8(&mut buf))),
        }
    }
    re.push('$');
    re
}

/// Levenshtein distance with a two-row table.
fn edit_distance(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for i in 1..=a.len() {
        cur[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            cur[j] = (prev[j] + 1).min(cur[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IndexEngine {
        let mut e = IndexEngine::new();
        e.add_word("hello", "D1");
        e.add_word("hell", "D1");
        e.add_word("world", "D2");
        e.build_index();
        e
    }

    #[test]
    fn prefix_wildcard_regex_on_small_table() {
        let e = sample();
        let p = e.prefix_search("he", 10);
        assert!(p.contains(&"hello".to_string()));
        assert!(p.contains(&"hell".to_string()));
        assert_eq!(p.len(), 2);
        assert_eq!(e.wildcard_search("he*o", 10), vec!["hello"]);
        assert!(e.regex_search("^a.*a$", 10).is_empty());
    }

    #[test]
    fn wildcard_question_mark_is_exactly_one_char() {
        let mut e = IndexEngine::new();
        for w in ["hello", "hallo", "hllo", "helllo"] {
            e.add_word(w, "D");
        }
        let mut got = e.wildcard_search("h?llo", 10);
        got.sort();
        assert_eq!(got, vec!["hallo", "hello"]);
    }

    #[test]
    fn wildcard_treats_regex_metacharacters_literally() {
        let mut e = IndexEngine::new();
        e.add_word("a.b", "D");
        e.add_word("axb", "D");
        e.add_word("c++", "D");
        assert_eq!(e.wildcard_search("a.b", 10), vec!["a.b"]);
        assert_eq!(e.wildcard_search("C+*", 10), vec!["c++"]);
    }

    #[test]
    fn regex_is_substring_and_case_insensitive() {
        let e = sample();
        let mut got = e.regex_search("ELL", 10);
        got.sort();
        assert_eq!(got, vec!["hell", "hello"]);
        assert!(e.regex_search("([unclosed", 10).is_empty());
    }

    #[test]
    fn fuzzy_orders_by_distance_and_cuts_at_two() {
        let mut e = IndexEngine::new();
        for w in ["hello", "help", "hallo", "world", "hxxxo"] {
            e.add_word(w, "D");
        }
        let got = e.fuzzy_search("hello", 10);
        assert_eq!(got[0], "hello");
        assert_eq!(got[1], "hallo");
        assert!(got.contains(&"help".to_string()));
        assert!(!got.contains(&"world".to_string()));
        assert!(!got.contains(&"hxxxo".to_string()));
        assert_eq!(e.fuzzy_search("hello", 1), vec!["hello"]);
    }

    #[test]
    fn edit_distance_basics() {
        let d = |a: &str, b: &str| {
            edit_distance(&a.chars().collect::<Vec<_>>(), &b.chars().collect::<Vec<_>>())
        };
        assert_eq!(d("kitten", "sitting"), 3);
        assert_eq!(d("", "abc"), 3);
        assert_eq!(d("same", "same"), 0);
    }

    #[test]
    fn remove_and_clear_dictionary() {
        let mut e = IndexEngine::new();
        e.add_word("apple", "A");
        e.add_word("apple", "B");
        e.add_word("banana", "A");
        assert_eq!(e.dictionaries_for_word("APPLE"), vec!["A", "B"]);

        e.remove_word("apple", "A");
        assert_eq!(e.dictionaries_for_word("apple"), vec!["B"]);
        e.remove_word("apple", "nope");
        assert_eq!(e.dictionaries_for_word("apple"), vec!["B"]);

        e.clear_dictionary("A");
        assert!(e.exact_match("banana").is_none());
        assert_eq!(e.exact_match("apple"), Some("apple"));
        e.clear_dictionary("B");
        assert_eq!(e.word_count(), 0);
    }

    #[test]
    fn add_is_idempotent_for_sources_and_counts_frequency() {
        let mut e = IndexEngine::new();
        e.add_word("Word", "S");
        e.add_word(" word ", "S");
        let entry = e.entry("WORD").unwrap();
        assert_eq!(entry.word, "Word");
        assert_eq!(entry.source_ids, vec!["S"]);
        assert_eq!(entry.frequency, 2);
        e.add_word("   ", "S");
        assert_eq!(e.word_count(), 1);
    }

    #[test]
    fn prefix_needs_rebuild_after_mutation() {
        let mut e = sample();
        e.add_word("helium", "D3");
        assert!(!e.is_built());
        assert!(!e.prefix_search("heli", 10).contains(&"helium".to_string()));
        e.build_index();
        assert_eq!(e.prefix_search("heli", 10), vec!["helium"]);
    }

    #[test]
    fn parse_line_skips_bad_frequency() {
        assert!(parse_line("word\tx\tA").is_none());
        let e = parse_line("word\t3\tA|B|A").unwrap();
        assert_eq!(e.source_ids, vec!["A", "B"]);
        assert_eq!(e.frequency, 3);
        assert!(parse_line("orphan\t1\t").is_none());
        assert!(parse_line("bad\\q\t1\tA").is_none());
    }

    #[test]
    fn separators_in_words_and_sources_survive_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.tsv");
        let mut e = IndexEngine::new();
        e.add_word("hello", "A|B");
        e.add_word("two\nlines", "tab\tsrc");
        e.add_word("back\\slash", "A|B");
        e.add_word("hello", "plain");
        e.save_index(&path).unwrap();

        let mut loaded = IndexEngine::new();
        loaded.load_index(&path).unwrap();
        assert_eq!(loaded.all_words(), e.all_words());
        assert_eq!(loaded.dictionaries_for_word("hello"), vec!["A|B", "plain"]);
        assert_eq!(loaded.dictionaries_for_word("two\nlines"), vec!["tab\tsrc"]);
        assert_eq!(loaded.exact_match("back\\slash"), Some("back\\slash"));

        loaded.clear_dictionary("A|B");
        assert_eq!(loaded.dictionaries_for_word("hello"), vec!["plain"]);
        assert_eq!(loaded.exact_match("back\\slash"), None);
    }
}
