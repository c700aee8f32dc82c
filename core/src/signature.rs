//! Binding a persisted full-text index to the exact set of source files it
//! was built from.
//!
//! A [`Signature`] is `<fnv1a-64 hex>|<payload>`. The payload lists every
//! loaded source in load order (name, word count, first and last word) and,
//! for each file the source was read from, its absolute path, size and
//! modification time. The hash is the fast comparison key; the payload is
//! kept so a mismatch can be explained.

use crate::error::CompatError;
use crate::persist::FormatVersion;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::UNIX_EPOCH;
use thiserror::Error;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub fn fnv1a64(data: &[u8]) -> u64 {
    data.iter().fold(FNV_OFFSET, |h, &b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

/// What a loaded source contributes to the signature.
#[derive(Debug, Clone, Copy)]
pub struct SourceIdentity<'a> {
    pub name: &'a str,
    pub word_count: usize,
    pub first_word: Option<&'a str>,
    pub last_word: Option<&'a str>,
    /// Primary file first, then companions; order here does not matter.
    pub paths: &'a [PathBuf],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    hash: u64,
    payload: String,
}

impl Signature {
    pub fn from_payload(payload: String) -> Self {
        Self { hash: fnv1a64(payload.as_bytes()), payload }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (hex, payload) = s.split_once('|')?;
        let hash = u64::from_str_radix(hex, 16).ok()?;
        Some(Self { hash, payload: payload.to_string() })
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// True iff `other` is a signature string for exactly this source set.
    pub fn matches(&self, other: &str) -> bool {
        Signature::parse(other).is_some_and(|o| o.hash == self.hash && o.payload == self.payload)
    }

    /// Explain why `other` (read from a file) differs from `self` (current sources).
    pub fn mismatch_reason(&self, other: &str) -> String {
        if other.is_empty() {
            return "index carries no signature".to_string();
        }
        let Some(other) = Signature::parse(other) else {
            return "index signature is not parseable".to_string();
        };
        if other.payload == self.payload {
            return if other.hash == self.hash {
                "signatures match".to_string()
            } else {
                format!("hash {:016x} does not match payload (expected {:016x})", other.hash, self.hash)
            };
        }
        let theirs: Vec<&str> = other.payload.split(';').collect();
        let ours: Vec<&str> = self.payload.split(';').collect();
        if theirs.first() != ours.first() {
            return format!(
                "source count differs (index {}, loaded {})",
                theirs.first().copied().unwrap_or_default(),
                ours.first().copied().unwrap_or_default()
            );
        }
        for (i, (a, b)) in theirs.iter().zip(&ours).enumerate().skip(1) {
            if a != b {
                return format!("source #{} differs: index has `{}`, loaded `{}`", i - 1, a, b);
            }
        }
        "payload differs".to_string()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}|{}", self.hash, self.payload)
    }
}

/// Fingerprint the given sources, in the order given.
pub fn compute_signature<'a, I>(sources: I) -> Signature
where
    I: IntoIterator<Item = SourceIdentity<'a>>,
{
    let mut body = String::new();
    let mut count = 0usize;
    for src in sources {
        count += 1;
        body.push_str(src.name);
        body.push('|');
        body.push_str(&src.word_count.to_string());
        body.push('|');
        body.push_str(src.first_word.unwrap_or_default());
        body.push('|');
        body.push_str(src.last_word.unwrap_or_default());
        body.push('|');
        let mut files: Vec<PathBuf> = src.paths.iter().map(|p| absolute(p)).collect();
        files.sort();
        for file in &files {
            body.push_str(&file_stamp(file));
            body.push('#');
        }
        body.push(';');
    }
    Signature::from_payload(format!("N={count};{body}"))
}

fn absolute(p: &Path) -> PathBuf {
    fs::canonicalize(p)
        .or_else(|_| std::path::absolute(p))
        .unwrap_or_else(|_| p.to_path_buf())
}

fn file_stamp(path: &Path) -> String {
    match fs::metadata(path) {
        Ok(meta) => {
            let size = if meta.is_file() { meta.len() } else { 0 };
            let mtime = meta.modified().map(|t| match t.duration_since(UNIX_EPOCH) {
                Ok(d) => d.as_nanos() as i128,
                Err(e) => -(e.duration().as_nanos() as i128),
            });
            match mtime {
                Ok(ns) => format!("{}|{}|{}", path.display(), size, ns),
                Err(_) => format!("{}|{}|(no-mtime)", path.display(), size),
            }
        }
        Err(_) => format!("{}|(missing)", path.display()),
    }
}

/// How strictly a persisted index must match the loaded sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompatMode {
    /// Exact signature match only.
    Strict,
    /// Exact match, or a legacy UDFT1 file that has no signature.
    #[default]
    Auto,
    /// Anything that parses.
    Loose,
}

#[derive(Debug, Error)]
#[error("unknown compat mode {0:?} (expected strict, auto or loose)")]
pub struct ParseCompatModeError(String);

impl FromStr for CompatMode {
    type Err = ParseCompatModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(CompatMode::Strict),
            "auto" => Ok(CompatMode::Auto),
            "loose" => Ok(CompatMode::Loose),
            _ => Err(ParseCompatModeError(s.to_string())),
        }
    }
}

impl fmt::Display for CompatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompatMode::Strict => "strict",
            CompatMode::Auto => "auto",
            CompatMode::Loose => "loose",
        })
    }
}

/// Why a persisted index was accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Acceptance {
    Verified,
    /// Pre-signature file accepted by `auto`.
    Legacy { version: u8 },
    /// Signature missing or different, accepted by `loose`.
    Unverified { version: u8, reason: String },
}

impl Acceptance {
    pub fn is_verified(&self) -> bool {
        matches!(self, Acceptance::Verified)
    }
}

/// Decide whether a parsed index with `version` and `file_signature` may be
/// reused for sources whose signature is `current`.
pub fn evaluate(
    mode: CompatMode,
    version: FormatVersion,
    file_signature: &str,
    current: &Signature,
) -> Result<Acceptance, CompatError> {
    if version.has_signature() && current.matches(file_signature) {
        return Ok(Acceptance::Verified);
    }
    let n = version.number();
    let reason = if version.has_signature() {
        current.mismatch_reason(file_signature)
    } else {
        "UDFT1 index carries no signature".to_string()
    };
    match mode {
        CompatMode::Strict if version.has_signature() => Err(CompatError::Mismatch { reason }),
        CompatMode::Strict => Err(CompatError::Rejected { version: n, reason }),
        CompatMode::Auto if version == FormatVersion::Udft1 => {
            tracing::warn!("accepting legacy UDFT1 full-text index without signature (auto mode)");
            Ok(Acceptance::Legacy { version: n })
        }
        CompatMode::Auto => Err(CompatError::Mismatch { reason }),
        CompatMode::Loose => {
            tracing::warn!(version = n, %reason, "full-text index loaded in loose mode; signature not verified");
            Ok(Acceptance::Unverified { version: n, reason })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ident<'a>(name: &'a str, words: &'a [&'a str], paths: &'a [PathBuf]) -> SourceIdentity<'a> {
        SourceIdentity {
            name,
            word_count: words.len(),
            first_word: words.first().copied(),
            last_word: words.last().copied(),
            paths,
        }
    }

    #[test]
    fn fnv_reference_values() {
        assert_eq!(fnv1a64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a64(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn payload_layout() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.tsv");
        std::fs::write(&file, "x\ty\n").unwrap();
        let paths = vec![file.clone()];
        let sig = compute_signature([ident("A", &["x", "z"], &paths)]);
        let abs = std::fs::canonicalize(&file).unwrap();
        let prefix = format!("N=1;A|2|x|z|{}|4|", abs.display());
        assert!(sig.payload().starts_with(&prefix), "{}", sig.payload());
        assert!(sig.payload().ends_with("#;"));
        let text = sig.to_string();
        assert_eq!(&text[16..17], "|");
        assert_eq!(Signature::parse(&text), Some(sig.clone()));
        assert!(sig.matches(&text));
    }

    #[test]
    fn stable_until_a_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.tsv");
        std::fs::write(&file, "x\ty\n").unwrap();
        let paths = vec![file.clone()];
        let a = compute_signature([ident("A", &["x"], &paths)]);
        let b = compute_signature([ident("A", &["x"], &paths)]);
        assert_eq!(a, b);

        let mut f = std::fs::OpenOptions::new().append(true).open(&file).unwrap();
        f.write_all(b"more\tstuff\n").unwrap();
        drop(f);
        let c = compute_signature([ident("A", &["x"], &paths)]);
        assert_ne!(a, c);
        assert!(c.mismatch_reason(&a.to_string()).starts_with("source #0 differs"));
    }

    #[test]
    fn order_and_missing_files_matter() {
        let missing = vec![PathBuf::from("/definitely/not/here.json")];
        let none: Vec<PathBuf> = Vec::new();
        let ab = compute_signature([ident("A", &[], &none), ident("B", &[], &missing)]);
        let ba = compute_signature([ident("B", &[], &missing), ident("A", &[], &none)]);
        assert_ne!(ab.hash(), ba.hash());
        assert!(ab.payload().contains("/definitely/not/here.json|(missing)#"));
        let one = compute_signature([ident("A", &[], &none)]);
        assert!(one.mismatch_reason(&ab.to_string()).starts_with("source count differs"));
    }

    #[test]
    fn policies() {
        let cur = Signature::from_payload("N=0;".into());
        let other = Signature::from_payload("N=1;X|0|||;".into()).to_string();
        let good = cur.to_string();
        use FormatVersion::*;

        assert_eq!(evaluate(CompatMode::Strict, Udft3, &good, &cur).unwrap(), Acceptance::Verified);
        assert!(matches!(evaluate(CompatMode::Strict, Udft3, &other, &cur), Err(CompatError::Mismatch { .. })));
        assert!(matches!(evaluate(CompatMode::Strict, Udft1, "", &cur), Err(CompatError::Rejected { version: 1, .. })));

        assert_eq!(evaluate(CompatMode::Auto, Udft2, &good, &cur).unwrap(), Acceptance::Verified);
        assert_eq!(evaluate(CompatMode::Auto, Udft1, "", &cur).unwrap(), Acceptance::Legacy { version: 1 });
        assert!(evaluate(CompatMode::Auto, Udft3, &other, &cur).is_err());
        assert!(evaluate(CompatMode::Auto, Udft2, "", &cur).is_err());

        match evaluate(CompatMode::Loose, Udft3, &other, &cur).unwrap() {
            Acceptance::Unverified { version, reason } => {
                assert_eq!(version, 3);
                assert!(reason.contains("source count differs"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(evaluate(CompatMode::Loose, Udft3, &good, &cur).unwrap(), Acceptance::Verified);
    }

    #[test]
    fn compat_mode_parsing() {
        assert_eq!("STRICT".parse::<CompatMode>().unwrap(), CompatMode::Strict);
        assert_eq!(" loose ".parse::<CompatMode>().unwrap(), CompatMode::Loose);
        assert!("fast".parse::<CompatMode>().is_err());
        assert_eq!(CompatMode::default().to_string(), "auto");
    }
}
