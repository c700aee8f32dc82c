//! Ties loaded sources to the headword index and the full-text index.
//!
//! Source `i` in load order is `DocRef::source == i`; word `j` of that source
//! is `DocRef::word == j`. Adding or removing a source drops the full-text
//! index, since its doc refs would no longer line up.

use crate::engine::IndexEngine;
use crate::error::{CompatError, FormatError};
use crate::index::{DocRef, FullTextIndex, FullTextStats};
use crate::persist::FormatVersion;
use crate::signature::{compute_signature, evaluate, Acceptance, CompatMode, Signature};
use crate::sources::{Source, SourceRegistry};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogConfig {
    /// Full-text build workers; 0 means available parallelism.
    pub fulltext_workers: usize,
    pub compat: CompatMode,
}

/// Headword query flavours.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupMode {
    Exact,
    #[default]
    Prefix,
    Fuzzy,
    Wildcard,
    Regex,
}

impl FromStr for LookupMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "exact" => LookupMode::Exact,
            "prefix" => LookupMode::Prefix,
            "fuzzy" => LookupMode::Fuzzy,
            "wildcard" => LookupMode::Wildcard,
            "regex" => LookupMode::Regex,
            other => bail!("unknown lookup mode {other:?}"),
        })
    }
}

impl fmt::Display for LookupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LookupMode::Exact => "exact",
            LookupMode::Prefix => "prefix",
            LookupMode::Fuzzy => "fuzzy",
            LookupMode::Wildcard => "wildcard",
            LookupMode::Regex => "regex",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Definition {
    pub source: String,
    pub word: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FullTextHit {
    pub source: String,
    pub word: String,
    pub definition: String,
    pub score: f64,
}

/// How [`Catalog::load_or_build_fulltext`] obtained its index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "origin", rename_all = "lowercase")]
pub enum FulltextOrigin {
    Loaded { acceptance: Acceptance },
    Rebuilt { reason: String },
}

pub struct Catalog {
    registry: SourceRegistry,
    config: CatalogConfig,
    sources: Vec<Source>,
    engine: IndexEngine,
    fulltext: Option<FullTextIndex>,
}

impl Catalog {
    pub fn new(registry: SourceRegistry, config: CatalogConfig) -> Self {
        Self { registry, config, sources: Vec::new(), engine: IndexEngine::new(), fulltext: None }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Decode `path` with the registry and add it. Call [`Catalog::build_index`] afterwards.
    pub fn add_source<P: AsRef<Path>>(&mut self, path: P) -> Result<&Source> {
        let source = self.registry.open(path.as_ref())?;
        self.add_loaded(source)
    }

    /// Add every path in order, then rebuild the headword trie. Stops at the first failure.
    pub fn add_sources<I, P>(&mut self, paths: I) -> Result<usize>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut added = 0;
        for path in paths {
            let path = path.as_ref();
            self.add_source(path).with_context(|| format!("loading source {}", path.display()))?;
            added += 1;
        }
        self.build_index();
        Ok(added)
    }

    pub fn add_loaded(&mut self, source: Source) -> Result<&Source> {
        if self.sources.iter().any(|s| s.name == source.name) {
            bail!("a source named {:?} is already loaded", source.name);
        }
        if u32::try_from(self.sources.len()).is_err() || u32::try_from(source.word_count()).is_err() {
            bail!("source {:?} does not fit in a doc ref", source.name);
        }
        for word in source.words() {
            self.engine.add_word(word, &source.name);
        }
        self.fulltext = None;
        tracing::info!(name = %source.name, kind = source.data.kind(), words = source.word_count(), "added source");
        self.sources.push(source);
        let last = self.sources.len() - 1;
        Ok(&self.sources[last])
    }

    /// Drop a source by name; rebuilds the headword trie.
    pub fn remove_source(&mut self, name: &str) -> bool {
        let Some(pos) = self.sources.iter().position(|s| s.name == name) else {
            return false;
        };
        self.sources.remove(pos);
        self.engine.clear_dictionary(name);
        self.engine.build_index();
        self.fulltext = None;
        true
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn engine(&self) -> &IndexEngine {
        &self.engine
    }

    pub fn build_index(&mut self) {
        self.engine.build_index();
    }

    pub fn lookup(&self, mode: LookupMode, pattern: &str, max: usize) -> Vec<String> {
        match mode {
            LookupMode::Exact => self.engine.exact_match(pattern).map(str::to_string).into_iter().collect(),
            LookupMode::Prefix => self.engine.prefix_search(pattern, max),
            LookupMode::Fuzzy => self.engine.fuzzy_search(pattern, max),
            LookupMode::Wildcard => self.engine.wildcard_search(pattern, max),
            LookupMode::Regex => self.engine.regex_search(pattern, max),
        }
    }

    /// Definitions of `word` from every source that has it, in load order.
    pub fn definitions(&self, word: &str) -> Vec<Definition> {
        self.sources
            .iter()
            .filter_map(|s| {
                let (pos, def) = s.data.entries().position(word)?;
                Some(Definition {
                    source: s.name.clone(),
                    word: s.words()[pos].clone(),
                    definition: def.to_string(),
                })
            })
            .collect()
    }

    /// (definition, doc ref) for every entry with a non-empty definition.
    pub fn documents(&self) -> Vec<(String, DocRef)> {
        let mut docs = Vec::new();
        for (si, source) in self.sources.iter().enumerate() {
            let entries = source.data.entries();
            for wi in 0..entries.len() {
                if let Some((_, def)) = entries.at(wi) {
                    if !def.is_empty() {
                        docs.push((def.to_string(), DocRef::new(si as u32, wi as u32)));
                    }
                }
            }
        }
        docs
    }

    pub fn build_fulltext(&mut self) {
        self.fulltext = Some(self.fresh_fulltext());
    }

    fn fresh_fulltext(&self) -> FullTextIndex {
        let mut index = FullTextIndex::new();
        index.build_from_documents(&self.documents(), self.config.fulltext_workers);
        index
    }

    pub fn fulltext(&self) -> Option<&FullTextIndex> {
        self.fulltext.as_ref()
    }

    pub fn fulltext_stats(&self) -> Option<FullTextStats> {
        self.fulltext.as_ref().map(FullTextIndex::stats)
    }

    /// Ranked full-text hits; doc refs that no longer resolve are skipped.
    pub fn fulltext_search(&self, query: &str, max: usize) -> Vec<FullTextHit> {
        let Some(index) = &self.fulltext else {
            return Vec::new();
        };
        index
            .search_scored(query, max)
            .into_iter()
            .filter_map(|d| {
                let def = self.resolve(d.doc_ref)?;
                Some(FullTextHit { source: def.source, word: def.word, definition: def.definition, score: d.score })
            })
            .collect()
    }

    pub fn resolve(&self, doc_ref: DocRef) -> Option<Definition> {
        let source = self.sources.get(doc_ref.source as usize)?;
        let (word, def) = source.data.entries().at(doc_ref.word as usize)?;
        Some(Definition { source: source.name.clone(), word: word.to_string(), definition: def.to_string() })
    }

    /// Signature of the currently loaded sources.
    pub fn signature(&self) -> Signature {
        compute_signature(self.sources.iter().map(Source::identity))
    }

    /// Write the full-text index (building it first if needed) stamped with the current signature.
    pub fn save_fulltext<P: AsRef<Path>>(&mut self, path: P) -> Result<(), FormatError> {
        let index = match self.fulltext.take() {
            Some(index) => index,
            None => self.fresh_fulltext(),
        };
        let result = index.save(path, &self.signature().to_string());
        self.fulltext = Some(index);
        result
    }

    /// Parse `path` and decide under `mode` whether it may be used for the loaded sources.
    /// Nothing is installed.
    pub fn check_fulltext<P: AsRef<Path>>(
        &self,
        path: P,
        mode: CompatMode,
    ) -> Result<(FullTextIndex, Acceptance), CompatError> {
        let mut index = FullTextIndex::new();
        index.load(path)?;
        let version = index.version().unwrap_or(FormatVersion::CURRENT);
        let acceptance = evaluate(mode, version, index.signature(), &self.signature())?;
        Ok((index, acceptance))
    }

    /// Load and install a persisted index if `mode` accepts it. On error the
    /// current full-text index is kept.
    pub fn load_fulltext<P: AsRef<Path>>(&mut self, path: P, mode: CompatMode) -> Result<Acceptance, CompatError> {
        let (index, acceptance) = self.check_fulltext(path, mode)?;
        self.fulltext = Some(index);
        Ok(acceptance)
    }

    /// [`Catalog::load_fulltext`] under the configured policy.
    pub fn load_fulltext_default<P: AsRef<Path>>(&mut self, path: P) -> Result<Acceptance, CompatError> {
        let mode = self.config.compat;
        self.load_fulltext(path, mode)
    }

    /// Reuse the file at `path` if the configured policy accepts it, otherwise
    /// rebuild from the loaded sources.
    pub fn load_or_build_fulltext<P: AsRef<Path>>(&mut self, path: P) -> FulltextOrigin {
        let path = path.as_ref();
        match self.load_fulltext_default(path) {
            Ok(acceptance) => FulltextOrigin::Loaded { acceptance },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "full-text index not reused; rebuilding");
                self.build_fulltext();
                FulltextOrigin::Rebuilt { reason: e.reason() }
            }
        }
    }

    /// Re-stamp `input` as UDFT3 with the current signature, accepting
    /// whatever parses. Returns the version that was read.
    pub fn upgrade_fulltext<P: AsRef<Path>, Q: AsRef<Path>>(&self, input: P, output: Q) -> Result<u8, CompatError> {
        let (index, _) = self.check_fulltext(input, CompatMode::Loose)?;
        let from = index.version().map(FormatVersion::number).unwrap_or(0);
        index.save(output, &self.signature().to_string())?;
        Ok(from)
    }

    pub fn save_index<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.engine.save_index(path)
    }

    pub fn load_index<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.engine.load_index(path)
    }
}
