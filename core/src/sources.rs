//! Dictionary sources and the registry of decoders that open them.

use crate::signature::SourceIdentity;
use crate::tokenizer::normalize_word;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Environment variable holding a platform path list of dictionary files.
pub const SOURCES_ENV: &str = "LEXICON_SOURCES";

/// Paths listed in [`SOURCES_ENV`], or none if it is unset.
pub fn source_paths_from_env() -> Vec<PathBuf> {
    std::env::var_os(SOURCES_ENV)
        .map(|v| std::env::split_paths(&v).filter(|p| !p.as_os_str().is_empty()).collect())
        .unwrap_or_default()
}

/// Word/definition pairs in file order, deduplicated by normalized word.
#[derive(Debug, Clone, Default)]
pub struct Entries {
    words: Vec<String>,
    definitions: Vec<String>,
    by_key: HashMap<String, usize>,
}

impl Entries {
    /// Returns false if the word is blank or already present.
    pub fn push(&mut self, word: &str, definition: &str) -> bool {
        let key = normalize_word(word);
        if key.is_empty() || self.by_key.contains_key(&key) {
            return false;
        }
        self.by_key.insert(key, self.words.len());
        self.words.push(word.trim().to_string());
        self.definitions.push(definition.trim().to_string());
        true
    }

    pub fn get(&self, word: &str) -> Option<&str> {
        self.position(word).map(|(_, def)| def)
    }

    /// Index and definition of `word`, matched by normalized form.
    pub fn position(&self, word: &str) -> Option<(usize, &str)> {
        let i = *self.by_key.get(&normalize_word(word))?;
        Some((i, self.definitions.get(i)?.as_str()))
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn at(&self, index: usize) -> Option<(&str, &str)> {
        Some((self.words.get(index)?.as_str(), self.definitions.get(index)?.as_str()))
    }
}

#[derive(Debug, Clone)]
pub enum SourceData {
    Json { description: Option<String>, entries: Entries },
    Tabular { separator: char, description: Option<String>, entries: Entries },
}

impl SourceData {
    pub fn lookup(&self, word: &str) -> Option<&str> {
        match self {
            SourceData::Json { entries, .. } | SourceData::Tabular { entries, .. } => entries.get(word),
        }
    }

    pub fn entries(&self) -> &Entries {
        match self {
            SourceData::Json { entries, .. } | SourceData::Tabular { entries, .. } => entries,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            SourceData::Json { description, .. } | SourceData::Tabular { description, .. } => description.as_deref(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceData::Json { .. } => "json",
            SourceData::Tabular { .. } => "tabular",
        }
    }
}

/// A loaded dictionary.
#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,
    pub data: SourceData,
    /// Files the source was read from: primary first, then companions.
    pub paths: Vec<PathBuf>,
}

impl Source {
    pub fn words(&self) -> &[String] {
        self.data.entries().words()
    }

    pub fn word_count(&self) -> usize {
        self.data.entries().len()
    }

    pub fn lookup(&self, word: &str) -> Option<&str> {
        self.data.lookup(word)
    }

    pub fn identity(&self) -> SourceIdentity<'_> {
        let words = self.words();
        SourceIdentity {
            name: &self.name,
            word_count: words.len(),
            first_word: words.first().map(String::as_str),
            last_word: words.last().map(String::as_str),
            paths: &self.paths,
        }
    }
}

/// Opens one family of dictionary files.
pub trait SourceDecoder: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Lower-case file extensions this decoder claims, without the dot.
    fn extensions(&self) -> &'static [&'static str];

    fn decode(&self, path: &Path) -> Result<Source>;
}

#[derive(Debug, Deserialize)]
struct JsonDictionary {
    name: Option<String>,
    description: Option<String>,
    entries: Vec<JsonEntry>,
}

#[derive(Debug, Deserialize)]
struct JsonEntry {
    word: String,
    #[serde(default)]
    definition: String,
}

pub struct JsonDecoder;

impl SourceDecoder for JsonDecoder {
    fn kind(&self) -> &'static str {
        "json"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["json"]
    }

    fn decode(&self, path: &Path) -> Result<Source> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let dict: JsonDictionary =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        let mut entries = Entries::default();
        for e in &dict.entries {
            entries.push(&e.word, &e.definition);
        }
        if entries.is_empty() {
            bail!("{} has no entries", path.display());
        }
        let name = dict.name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| file_stem(path));
        Ok(Source {
            name,
            data: SourceData::Json { description: dict.description, entries },
            paths: vec![path.to_path_buf()],
        })
    }
}

/// Line-oriented `word<sep>definition` files with an optional `<stem>.info` companion.
pub struct TabularDecoder;

impl TabularDecoder {
    const SEPARATORS: [char; 3] = ['\t', ',', ';'];

    fn companion(path: &Path) -> PathBuf {
        path.with_extension("info")
    }

    fn read_info(path: &Path) -> Result<(Option<String>, Option<String>)> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let mut name = None;
        let mut description = None;
        for line in text.lines() {
            match line.split_once('=') {
                Some((k, v)) if k.trim() == "name" => name = Some(v.trim().to_string()),
                Some((k, v)) if k.trim() == "description" => description = Some(v.trim().to_string()),
                _ => {}
            }
        }
        Ok((name.filter(|n| !n.is_empty()), description))
    }
}

impl SourceDecoder for TabularDecoder {
    fn kind(&self) -> &'static str {
        "tabular"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["tsv", "csv", "txt"]
    }

    fn decode(&self, path: &Path) -> Result<Source> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let mut separator: Option<char> = None;
        let mut entries = Entries::default();
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }
            let sep = match separator {
                Some(s) => s,
                None => match Self::SEPARATORS.into_iter().find(|s| line.contains(*s)) {
                    Some(s) => *separator.insert(s),
                    None => continue,
                },
            };
            if let Some((word, definition)) = line.split_once(sep) {
                entries.push(word, unquote(definition.trim()));
            }
        }
        if entries.is_empty() {
            bail!("{} has no entries", path.display());
        }

        let mut paths = vec![path.to_path_buf()];
        let mut name = None;
        let mut description = None;
        let info = Self::companion(path);
        if info.is_file() {
            (name, description) = Self::read_info(&info)?;
            paths.push(info);
        }
        Ok(Source {
            name: name.unwrap_or_else(|| file_stem(path)),
            data: SourceData::Tabular { separator: separator.unwrap_or('\t'), description, entries },
            paths,
        })
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(s)
}

fn file_stem(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
}

/// The set of decoders a catalog may use, chosen by file extension.
pub struct SourceRegistry {
    decoders: Vec<Box<dyn SourceDecoder>>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl SourceRegistry {
    pub fn empty() -> Self {
        Self { decoders: Vec::new() }
    }

    pub fn with_defaults() -> Self {
        let mut r = Self::empty();
        r.register(Box::new(JsonDecoder));
        r.register(Box::new(TabularDecoder));
        r
    }

    /// Later registrations win for a shared extension.
    pub fn register(&mut self, decoder: Box<dyn SourceDecoder>) {
        self.decoders.insert(0, decoder);
    }

    pub fn decoder_for(&self, path: &Path) -> Option<&dyn SourceDecoder> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        self.decoders
            .iter()
            .find(|d| d.extensions().contains(&ext.as_str()))
            .map(|d| d.as_ref())
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.decoder_for(path).is_some()
    }

    pub fn open(&self, path: &Path) -> Result<Source> {
        let Some(decoder) = self.decoder_for(path) else {
            bail!("no decoder for {}", path.display());
        };
        let source = decoder.decode(path)?;
        tracing::debug!(path = %path.display(), kind = decoder.kind(), name = %source.name, words = source.word_count(), "decoded source");
        Ok(source)
    }

    /// Every supported file under `dir`, sorted by path.
    pub fn discover(&self, dir: &Path) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| self.supports(p))
            .collect();
        found.sort();
        found
    }
}
