use crate::codec;
use crate::error::FormatError;
use crate::index::{DocRef, FullTextIndex, Posting, PostingList};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, create_dir_all, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Generations of the full-text file format, identified by a 5-byte magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FormatVersion {
    /// No signature, fixed-width postings.
    Udft1,
    /// Signature block, fixed-width postings.
    Udft2,
    /// Signature block, varint/delta-coded postings decoded lazily.
    Udft3,
}

impl FormatVersion {
    pub const CURRENT: FormatVersion = FormatVersion::Udft3;

    pub fn number(self) -> u8 {
        match self {
            FormatVersion::Udft1 => 1,
            FormatVersion::Udft2 => 2,
            FormatVersion::Udft3 => 3,
        }
    }

    pub fn magic(self) -> &'static [u8; 5] {
        match self {
            FormatVersion::Udft1 => b"UDFT1",
            FormatVersion::Udft2 => b"UDFT2",
            FormatVersion::Udft3 => b"UDFT3",
        }
    }

    pub fn from_magic(magic: &[u8]) -> Option<Self> {
        [FormatVersion::Udft1, FormatVersion::Udft2, FormatVersion::Udft3]
            .into_iter()
            .find(|v| v.magic().as_slice() == magic)
    }

    pub fn has_signature(self) -> bool {
        self != FormatVersion::Udft1
    }

    fn is_compressed(self) -> bool {
        self == FormatVersion::Udft3
    }
}

/// Everything parsed out of a UDFT file, before it becomes a [`FullTextIndex`].
pub(crate) struct LoadedIndex {
    pub version: FormatVersion,
    pub signature: String,
    pub doc_refs: Vec<DocRef>,
    pub postings: HashMap<String, PostingList>,
    pub compressed_terms: usize,
    pub compressed_bytes: u64,
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], FormatError> {
        if self.remaining() < len {
            return Err(FormatError::Truncated(what));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, FormatError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self, len: u32, what: &'static str) -> Result<String, FormatError> {
        let bytes = self.take(len as usize, what)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FormatError::Utf8(what))
    }
}

/// Parse a UDFT1/2/3 file, validating every postings list against the doc table.
/// A doc id may appear at most once per term in every version.
pub(crate) fn read_fulltext(path: &Path) -> Result<LoadedIndex, FormatError> {
    let buf = fs::read(path)?;
    let mut r = ByteReader::new(&buf);
    let magic = r.take(5, "magic")?;
    let version = FormatVersion::from_magic(magic)
        .ok_or_else(|| FormatError::BadMagic(String::from_utf8_lossy(magic).into_owned()))?;

    let signature = if version.has_signature() {
        let len = r.u32("siglen")?;
        r.string(len, "sig")?
    } else {
        String::new()
    };

    let doc_count = r.u32("docs")?;
    let mut doc_refs = Vec::with_capacity((doc_count as usize).min(r.remaining() / 8));
    for _ in 0..doc_count {
        let source = r.u32("docmap")?;
        let word = r.u32("docmap")?;
        doc_refs.push(DocRef { source, word });
    }

    let term_count = r.u32("terms")?;
    let mut postings = HashMap::with_capacity((term_count as usize).min(r.remaining() / 8));
    let mut compressed_terms = 0usize;
    let mut compressed_bytes = 0u64;
    for _ in 0..term_count {
        let len = r.u32("term len")?;
        let term = r.string(len, "term")?;
        let count = r.u32("postings count")?;
        let list = if version.is_compressed() {
            let byte_len = r.u32("compressed len")?;
            let bytes = r.take(byte_len as usize, "compressed data")?;
            match codec::scan_postings(bytes, count) {
                None => return Err(FormatError::Varint { term }),
                Some(Some(last)) if last >= doc_count => {
                    return Err(FormatError::DocOutOfRange { term, doc_id: last, doc_count })
                }
                Some(_) => {}
            }
            compressed_terms += 1;
            compressed_bytes += u64::from(byte_len);
            PostingList::compressed(count, bytes.to_vec())
        } else {
            let mut list = Vec::with_capacity((count as usize).min(r.remaining() / 8));
            for _ in 0..count {
                let doc_id = r.u32("posting")?;
                let tf = r.u32("posting")?;
                if doc_id >= doc_count {
                    return Err(FormatError::DocOutOfRange { term, doc_id, doc_count });
                }
                list.push(Posting { doc_id, tf });
            }
            list.sort_by_key(|p| p.doc_id);
            if let Some(w) = list.windows(2).find(|w| w[0].doc_id == w[1].doc_id) {
                return Err(FormatError::RepeatedDoc { term, doc_id: w[0].doc_id });
            }
            PostingList::decoded(list)
        };
        if postings.contains_key(&term) {
            return Err(FormatError::DuplicateTerm(term));
        }
        postings.insert(term, list);
    }

    Ok(LoadedIndex { version, signature, doc_refs, postings, compressed_terms, compressed_bytes })
}

/// Write `index` as UDFT3 with terms in sorted order.
pub(crate) fn write_fulltext(path: &Path, index: &FullTextIndex, signature: &str) -> Result<(), FormatError> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(FormatVersion::CURRENT.magic())?;
    write_len(&mut out, signature.len(), "signature")?;
    out.write_all(signature.as_bytes())?;

    let doc_refs = index.doc_refs();
    write_len(&mut out, doc_refs.len(), "document count")?;
    for r in doc_refs {
        out.write_all(&r.source.to_le_bytes())?;
        out.write_all(&r.word.to_le_bytes())?;
    }

    let terms = index.sorted_postings();
    write_len(&mut out, terms.len(), "term count")?;
    for (term, list) in terms {
        write_len(&mut out, term.len(), "term")?;
        out.write_all(term.as_bytes())?;
        let (count, bytes) = list.encoded();
        out.write_all(&count.to_le_bytes())?;
        write_len(&mut out, bytes.len(), "postings block")?;
        out.write_all(&bytes)?;
    }
    out.flush()?;
    Ok(())
}

fn write_len<W: Write>(out: &mut W, len: usize, what: &'static str) -> Result<(), FormatError> {
    let v = u32::try_from(len).map_err(|_| FormatError::TooLarge(what))?;
    out.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Build metadata written next to the indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_words: usize,
    pub num_docs: usize,
    pub created_at: String,
    pub version: u8,
    pub signature: String,
}

/// File layout of a build output directory.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn words(&self) -> PathBuf { self.root.join("words.tsv") }
    pub fn fulltext(&self) -> PathBuf { self.root.join("fulltext.udft") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.meta())?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    let mut f = File::open(paths.meta())?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: MetaFile = serde_json::from_str(&buf)?;
    Ok(meta)
}
