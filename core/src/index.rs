//! Inverted index over definition text with TF-IDF ranking.
//!
//! Documents are added in a batch and then [`FullTextIndex::finalize`]d, or
//! the whole thing is read from a UDFT file. Postings loaded from a UDFT3
//! file stay varint-compressed until a query first touches the term; that
//! first query pays for the decode (and its allocation), later ones read the
//! cached list. Each entry sits behind its own `RwLock` so concurrent first
//! queries on one term decode it exactly once.

use crate::codec;
use crate::error::FormatError;
use crate::persist::{self, FormatVersion, LoadedIndex};
use crate::tokenizer::{tokenize, trigrams};
use parking_lot::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

pub type DocId = u32;

/// Upper bound on vocabulary terms a single unknown query token may expand to.
pub const MAX_SUBSTRING_EXPANSIONS: usize = 64;

/// Back-reference from a document to the (source, word) pair it was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocRef {
    pub source: u32,
    pub word: u32,
}

impl DocRef {
    pub fn new(source: u32, word: u32) -> Self {
        Self { source, word }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    pub tf: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub doc_ref: DocRef,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum IndexState {
    #[default]
    Empty,
    Building,
    Queryable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FullTextStats {
    /// Format version the index was loaded from; `None` when built in memory.
    pub version: Option<u8>,
    pub docs: usize,
    pub terms: usize,
    pub postings: u64,
    pub compressed_terms: usize,
    pub compressed_bytes: u64,
    pub pairs_decompressed: u64,
    pub avg_df: f64,
}

#[derive(Debug)]
enum PostingRepr {
    Decoded(Vec<Posting>),
    Compressed { count: u32, bytes: Vec<u8> },
}

impl PostingRepr {
    fn len(&self) -> u32 {
        match self {
            PostingRepr::Decoded(v) => v.len() as u32,
            PostingRepr::Compressed { count, .. } => *count,
        }
    }

    fn as_slice(&self) -> &[Posting] {
        match self {
            PostingRepr::Decoded(v) => v,
            PostingRepr::Compressed { .. } => &[],
        }
    }
}

#[derive(Debug, Default)]
struct DecodeCounters {
    compressed_terms: AtomicUsize,
    compressed_bytes: AtomicU64,
    pairs_decompressed: AtomicU64,
}

impl DecodeCounters {
    fn record_decode(&self, byte_len: usize, pairs: usize) {
        self.compressed_terms.fetch_sub(1, Ordering::Relaxed);
        self.compressed_bytes.fetch_sub(byte_len as u64, Ordering::Relaxed);
        self.pairs_decompressed.fetch_add(pairs as u64, Ordering::Relaxed);
    }
}

/// One term's postings, decoded or still in its UDFT3 byte form.
#[derive(Debug)]
pub(crate) struct PostingList {
    repr: RwLock<PostingRepr>,
}

impl PostingList {
    pub(crate) fn decoded(list: Vec<Posting>) -> Self {
        Self { repr: RwLock::new(PostingRepr::Decoded(list)) }
    }

    pub(crate) fn compressed(count: u32, bytes: Vec<u8>) -> Self {
        Self { repr: RwLock::new(PostingRepr::Compressed { count, bytes }) }
    }

    pub(crate) fn len(&self) -> u32 {
        self.repr.read().len()
    }

    /// Posting count and varint stream, without touching the decode cache.
    pub(crate) fn encoded(&self) -> (u32, Vec<u8>) {
        match &*self.repr.read() {
            PostingRepr::Decoded(list) => (list.len() as u32, codec::encode_postings(list)),
            PostingRepr::Compressed { count, bytes } => (*count, bytes.clone()),
        }
    }

    fn with_postings<R>(&self, counters: &DecodeCounters, f: impl FnOnce(&[Posting]) -> R) -> R {
        {
            let guard = self.repr.read();
            if let PostingRepr::Decoded(list) = &*guard {
                return f(list);
            }
        }
        let mut guard = self.repr.write();
        // another reader may have decoded it while we waited for the write lock
        let pending = match &*guard {
            PostingRepr::Compressed { count, bytes } => Some((codec::decode_postings(bytes, *count), bytes.len())),
            PostingRepr::Decoded(_) => None,
        };
        if let Some((decoded, byte_len)) = pending {
            match decoded {
                Some(list) => {
                    counters.record_decode(byte_len, list.len());
                    *guard = PostingRepr::Decoded(list);
                }
                None => {
                    tracing::error!("postings stream failed to decode; treating term as empty");
                    return f(&[]);
                }
            }
        }
        let guard = RwLockWriteGuard::downgrade(guard);
        f(guard.as_slice())
    }

    fn decoded_mut(&mut self, counters: &DecodeCounters) -> &mut Vec<Posting> {
        let repr = self.repr.get_mut();
        if let PostingRepr::Compressed { count, bytes } = repr {
            let list = codec::decode_postings(bytes, *count).unwrap_or_default();
            counters.record_decode(bytes.len(), list.len());
            *repr = PostingRepr::Decoded(list);
        }
        match repr {
            PostingRepr::Decoded(list) => list,
            PostingRepr::Compressed { .. } => unreachable!("converted above"),
        }
    }
}

/// Sorted vocabulary plus a trigram -> term-index map for substring expansion.
#[derive(Debug, Default)]
struct TermDirectory {
    terms: Vec<String>,
    grams: HashMap<[u8; 3], Vec<u32>>,
}

impl TermDirectory {
    fn build<'a>(terms: impl Iterator<Item = &'a String>) -> Self {
        let mut terms: Vec<String> = terms.cloned().collect();
        terms.sort_unstable();
        let mut grams: HashMap<[u8; 3], Vec<u32>> = HashMap::new();
        for (i, term) in terms.iter().enumerate() {
            let i = i as u32;
            for g in trigrams(term) {
                let ids = grams.entry(g).or_default();
                if ids.last() != Some(&i) {
                    ids.push(i);
                }
            }
        }
        Self { terms, grams }
    }

    /// Vocabulary terms containing `token`, in directory order, at most `limit`.
    fn expand(&self, token: &str, limit: usize) -> Vec<&str> {
        if token.len() < 3 {
            return self
                .terms
                .iter()
                .filter(|t| t.contains(token))
                .take(limit)
                .map(String::as_str)
                .collect();
        }
        let mut lists: Vec<&Vec<u32>> = Vec::new();
        for g in trigrams(token) {
            match self.grams.get(&g) {
                Some(ids) => lists.push(ids),
                None => return Vec::new(),
            }
        }
        lists.sort_by_key(|l| l.len());
        let Some((first, rest)) = lists.split_first() else {
            return Vec::new();
        };
        first
            .iter()
            .filter(|id| rest.iter().all(|l| l.binary_search(id).is_ok()))
            .map(|&id| self.terms[id as usize].as_str())
            .filter(|t| t.contains(token))
            .take(limit)
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct FullTextIndex {
    doc_refs: Vec<DocRef>,
    postings: HashMap<String, PostingList>,
    idf: HashMap<String, f64>,
    directory: TermDirectory,
    signature: String,
    version: Option<FormatVersion>,
    state: IndexState,
    counters: DecodeCounters,
}

impl FullTextIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index one document and return its id. Ids are dense and start at 0.
    pub fn add_document(&mut self, text: &str, doc_ref: DocRef) -> DocId {
        let doc_id = self.doc_refs.len() as DocId;
        self.doc_refs.push(doc_ref);
        for (term, tf) in term_frequencies(text) {
            self.postings
                .entry(term)
                .or_insert_with(|| PostingList::decoded(Vec::new()))
                .decoded_mut(&self.counters)
                .push(Posting { doc_id, tf });
        }
        self.state = IndexState::Building;
        doc_id
    }

    /// Compute IDF for every term and rebuild the term directory.
    pub fn finalize(&mut self) {
        let n = self.doc_refs.len() as f64;
        self.idf = self
            .postings
            .iter()
            .map(|(term, list)| {
                let df = f64::from(list.len());
                (term.clone(), ((n + 1.0) / (df + 1.0)).ln() + 1.0)
            })
            .collect();
        self.directory = TermDirectory::build(self.postings.keys());
        self.state = IndexState::Queryable;
    }

    /// Replace the index with `docs`, tokenized over `concurrency` shards
    /// (0 = available parallelism), then finalize.
    ///
    /// Output does not depend on the worker count: shards are contiguous and
    /// merged in order, so global doc ids match a sequential build.
    pub fn build_from_documents(&mut self, docs: &[(String, DocRef)], concurrency: usize) {
        self.clear();
        let workers = effective_workers(concurrency, docs.len());
        let chunk_len = docs.len().div_ceil(workers).max(1);
        let chunks: Vec<&[(String, DocRef)]> = docs.chunks(chunk_len).collect();

        let shards: Vec<HashMap<String, Vec<Posting>>> = if chunks.len() <= 1 {
            chunks.iter().map(|c| build_shard(c)).collect()
        } else {
            std::thread::scope(|s| {
                let handles: Vec<_> = chunks.iter().map(|&c| s.spawn(move || build_shard(c))).collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                    .collect()
            })
        };

        let mut base: DocId = 0;
        for (shard, chunk) in shards.into_iter().zip(&chunks) {
            for (term, list) in shard {
                let target = self
                    .postings
                    .entry(term)
                    .or_insert_with(|| PostingList::decoded(Vec::new()))
                    .decoded_mut(&self.counters);
                target.extend(list.into_iter().map(|p| Posting { doc_id: base + p.doc_id, tf: p.tf }));
            }
            base += chunk.len() as DocId;
        }
        self.doc_refs = docs.iter().map(|(_, r)| *r).collect();
        self.finalize();
        tracing::info!(docs = self.doc_refs.len(), terms = self.postings.len(), workers = chunks.len(), "full-text index built");
    }

    pub fn search(&self, query: &str, max: usize) -> Vec<DocRef> {
        self.search_scored(query, max).into_iter().map(|d| d.doc_ref).collect()
    }

    /// Rank documents by Σ tf × idf over the matched terms; ties go to the lower doc id.
    pub fn search_scored(&self, query: &str, max: usize) -> Vec<ScoredDoc> {
        if self.state != IndexState::Queryable || max == 0 || self.doc_refs.is_empty() {
            return Vec::new();
        }
        let mut scores: HashMap<DocId, f64> = HashMap::new();
        let mut seen_tokens: HashSet<String> = HashSet::new();
        let mut used_terms: HashSet<&str> = HashSet::new();
        for token in tokenize(query) {
            if !seen_tokens.insert(token.clone()) {
                continue;
            }
            let candidates: Vec<&str> = match self.postings.get_key_value(token.as_str()) {
                Some((term, _)) => vec![term.as_str()],
                None => self.directory.expand(&token, MAX_SUBSTRING_EXPANSIONS),
            };
            for term in candidates {
                if !used_terms.insert(term) {
                    continue;
                }
                let Some(list) = self.postings.get(term) else { continue };
                let idf = self.idf.get(term).copied().unwrap_or(1.0);
                list.with_postings(&self.counters, |postings| {
                    for p in postings {
                        *scores.entry(p.doc_id).or_insert(0.0) += f64::from(p.tf) * idf;
                    }
                });
            }
        }
        let mut ranked: Vec<(DocId, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .take(max)
            .map(|(doc_id, score)| ScoredDoc { doc_id, doc_ref: self.doc_refs[doc_id as usize], score })
            .collect()
    }

    /// Write a UDFT3 file stamped with `signature`.
    pub fn save<P: AsRef<Path>>(&self, path: P, signature: &str) -> Result<(), FormatError> {
        persist::write_fulltext(path.as_ref(), self, signature)?;
        tracing::info!(path = %path.as_ref().display(), docs = self.doc_refs.len(), terms = self.postings.len(), "saved full-text index");
        Ok(())
    }

    /// Load a UDFT1/2/3 file. On error the current contents are kept.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<(), FormatError> {
        let loaded = persist::read_fulltext(path.as_ref())?;
        *self = Self::from_loaded(loaded);
        self.finalize();
        tracing::info!(
            path = %path.as_ref().display(),
            version = self.version.map(FormatVersion::number),
            docs = self.doc_refs.len(),
            terms = self.postings.len(),
            "loaded full-text index"
        );
        Ok(())
    }

    fn from_loaded(loaded: LoadedIndex) -> Self {
        let counters = DecodeCounters {
            compressed_terms: AtomicUsize::new(loaded.compressed_terms),
            compressed_bytes: AtomicU64::new(loaded.compressed_bytes),
            pairs_decompressed: AtomicU64::new(0),
        };
        Self {
            doc_refs: loaded.doc_refs,
            postings: loaded.postings,
            signature: loaded.signature,
            version: Some(loaded.version),
            counters,
            ..Self::default()
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn stats(&self) -> FullTextStats {
        let terms = self.postings.len();
        let postings: u64 = self.postings.values().map(|l| u64::from(l.len())).sum();
        FullTextStats {
            version: self.version.map(FormatVersion::number),
            docs: self.doc_refs.len(),
            terms,
            postings,
            compressed_terms: self.counters.compressed_terms.load(Ordering::Relaxed),
            compressed_bytes: self.counters.compressed_bytes.load(Ordering::Relaxed),
            pairs_decompressed: self.counters.pairs_decompressed.load(Ordering::Relaxed),
            avg_df: if terms == 0 { 0.0 } else { postings as f64 / terms as f64 },
        }
    }

    pub fn doc_count(&self) -> usize {
        self.doc_refs.len()
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn doc_ref(&self, doc_id: DocId) -> Option<DocRef> {
        self.doc_refs.get(doc_id as usize).copied()
    }

    /// Signature read from disk; empty for in-memory builds and UDFT1 files.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn version(&self) -> Option<FormatVersion> {
        self.version
    }

    pub fn state(&self) -> IndexState {
        self.state
    }

    pub fn idf(&self, term: &str) -> Option<f64> {
        self.idf.get(term).copied()
    }

    pub(crate) fn doc_refs(&self) -> &[DocRef] {
        &self.doc_refs
    }

    /// Postings in term order, for deterministic serialization.
    pub(crate) fn sorted_postings(&self) -> Vec<(&str, &PostingList)> {
        let mut out: Vec<(&str, &PostingList)> = self.postings.iter().map(|(t, l)| (t.as_str(), l)).collect();
        out.sort_unstable_by(|a, b| a.0.cmp(b.0));
        out
    }
}

fn term_frequencies(text: &str) -> HashMap<String, u32> {
    let mut tf: HashMap<String, u32> = HashMap::new();
    for token in tokenize(text) {
        *tf.entry(token).or_insert(0) += 1;
    }
    tf
}

fn build_shard(docs: &[(String, DocRef)]) -> HashMap<String, Vec<Posting>> {
    let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
    for (local, (text, _)) in docs.iter().enumerate() {
        for (term, tf) in term_frequencies(text) {
            postings.entry(term).or_default().push(Posting { doc_id: local as DocId, tf });
        }
    }
    postings
}

fn effective_workers(requested: usize, docs: usize) -> usize {
    let wanted = if requested == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    } else {
        requested
    };
    wanted.clamp(1, docs.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> FullTextIndex {
        let mut ft = FullTextIndex::new();
        ft.add_document("Hello world greeting.", DocRef::new(0, 0));
        ft.add_document("mouse is a small rodent and device", DocRef::new(0, 1));
        ft.add_document("World history is vast", DocRef::new(0, 2));
        ft.finalize();
        ft
    }

    #[test]
    fn doc_ids_are_sequential() {
        let mut ft = FullTextIndex::new();
        assert_eq!(ft.add_document("a", DocRef::new(0, 0)), 0);
        assert_eq!(ft.add_document("", DocRef::new(0, 1)), 1);
        assert_eq!(ft.add_document("b", DocRef::new(1, 0)), 2);
        assert_eq!(ft.doc_count(), 3);
        assert_eq!(ft.state(), IndexState::Building);
    }

    #[test]
    fn idf_formula() {
        let ft = scenario();
        let n = 3.0f64;
        let world = ((n + 1.0) / (2.0 + 1.0)).ln() + 1.0;
        let mouse = ((n + 1.0) / (1.0 + 1.0)).ln() + 1.0;
        assert!((ft.idf("world").unwrap() - world).abs() < 1e-12);
        assert!((ft.idf("mouse").unwrap() - mouse).abs() < 1e-12);
    }

    #[test]
    fn multi_term_query_ranks_history_doc() {
        let ft = scenario();
        let hits = ft.search("world history", 10);
        assert!(hits[..2].contains(&DocRef::new(0, 2)));
        assert_eq!(hits[0], DocRef::new(0, 2));
    }

    #[test]
    fn substring_expansion_finds_unindexed_token() {
        let ft = scenario();
        assert_eq!(ft.search("greet", 10), vec![DocRef::new(0, 0)]);
        // two-letter tokens fall back to a directory scan
        assert!(ft.search("ro", 10).contains(&DocRef::new(0, 1)));
    }

    #[test]
    fn expansions_are_not_double_counted() {
        let mut ft = FullTextIndex::new();
        ft.add_document("greeting", DocRef::new(0, 0));
        ft.add_document("greeting greeting", DocRef::new(0, 1));
        ft.finalize();
        let once = ft.search_scored("gree", 10);
        let twice = ft.search_scored("gree greet", 10);
        assert_eq!(once, twice);
    }

    #[test]
    fn ties_break_on_lower_doc_id() {
        let mut ft = FullTextIndex::new();
        ft.add_document("apple", DocRef::new(2, 0));
        ft.add_document("apple", DocRef::new(1, 0));
        ft.add_document("apple", DocRef::new(0, 0));
        ft.finalize();
        assert_eq!(ft.search("apple", 10), vec![DocRef::new(2, 0), DocRef::new(1, 0), DocRef::new(0, 0)]);
        assert_eq!(ft.search("apple", 1), vec![DocRef::new(2, 0)]);
    }

    #[test]
    fn unfinalized_or_empty_queries_return_nothing() {
        let mut ft = FullTextIndex::new();
        ft.add_document("hello", DocRef::new(0, 0));
        assert!(ft.search("hello", 10).is_empty());
        ft.finalize();
        assert!(ft.search("", 10).is_empty());
        assert!(ft.search("!!!", 10).is_empty());
        assert!(ft.search("hello", 0).is_empty());
    }

    #[test]
    fn parallel_build_matches_sequential() {
        let docs: Vec<(String, DocRef)> = (0..100u32)
            .map(|i| {
                let mut text = String::new();
                if i % 5 == 0 {
                    text.push_str("alpha ");
                }
                if i % 2 == 0 {
                    text.push_str("beta ");
                }
                if i % 3 == 0 {
                    text.push_str("gamma gamma ");
                }
                if text.is_empty() {
                    text.push_str("noise");
                }
                (text, DocRef::new(0, i))
            })
            .collect();
        let mut a = FullTextIndex::new();
        a.build_from_documents(&docs, 1);
        for k in [2, 3, 4, 7, 0] {
            let mut b = FullTextIndex::new();
            b.build_from_documents(&docs, k);
            assert_eq!(a.stats(), b.stats());
            for q in ["alpha", "beta gamma", "amm", "noise alpha"] {
                assert_eq!(a.search_scored(q, 50), b.search_scored(q, 50), "query {q} with {k} workers");
            }
        }
    }

    #[test]
    fn build_from_no_documents() {
        let mut ft = FullTextIndex::new();
        ft.build_from_documents(&[], 4);
        assert_eq!(ft.doc_count(), 0);
        assert_eq!(ft.state(), IndexState::Queryable);
        assert!(ft.search("x", 10).is_empty());
    }

    #[test]
    fn stats_for_built_index() {
        let ft = scenario();
        let s = ft.stats();
        assert_eq!(s.version, None);
        assert_eq!(s.docs, 3);
        assert_eq!(s.compressed_terms, 0);
        assert_eq!(s.pairs_decompressed, 0);
        // hello world greeting mouse is a small rodent and device history vast
        assert_eq!(s.terms, 12);
        assert_eq!(s.postings, 14);
        assert!((s.avg_df - 14.0 / 12.0).abs() < 1e-12);
    }

    #[test]
    fn directory_expansion_respects_limit_and_order() {
        let terms: Vec<String> = vec!["abcx".into(), "zabc".into(), "abc".into(), "xyz".into()];
        let dir = TermDirectory::build(terms.iter());
        assert_eq!(dir.expand("abc", 10), vec!["abc", "abcx", "zabc"]);
        assert_eq!(dir.expand("abc", 1), vec!["abc"]);
        assert!(dir.expand("qqq", 10).is_empty());
        assert_eq!(dir.expand("yz", 10), vec!["xyz"]);
    }
}
