use thiserror::Error;

/// Failure to read or write a persisted full-text index.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported format (magic {0:?})")]
    BadMagic(String),

    #[error("truncated ({0})")]
    Truncated(&'static str),

    #[error("decode(varint) failed for term {term:?}")]
    Varint { term: String },

    #[error("term {term:?} references doc {doc_id} but the index has {doc_count} documents")]
    DocOutOfRange { term: String, doc_id: u32, doc_count: u32 },

    #[error("term {term:?} lists doc {doc_id} more than once")]
    RepeatedDoc { term: String, doc_id: u32 },

    #[error("duplicate term {0:?}")]
    DuplicateTerm(String),

    #[error("invalid UTF-8 in {0}")]
    Utf8(&'static str),

    #[error("{0} does not fit the on-disk u32 range")]
    TooLarge(&'static str),
}

/// A persisted index that parsed fine but may not be reused under the active policy.
#[derive(Debug, Error)]
pub enum CompatError {
    #[error("signature mismatch: {reason}")]
    Mismatch { reason: String },

    #[error("UDFT{version} index rejected: {reason}")]
    Rejected { version: u8, reason: String },

    #[error(transparent)]
    Format(#[from] FormatError),
}

impl CompatError {
    /// Human-readable reason, without the variant prefix.
    pub fn reason(&self) -> String {
        match self {
            CompatError::Mismatch { reason } | CompatError::Rejected { reason, .. } => reason.clone(),
            CompatError::Format(e) => e.to_string(),
        }
    }

    pub fn is_format(&self) -> bool {
        matches!(self, CompatError::Format(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_descriptive() {
        assert_eq!(FormatError::Truncated("docmap").to_string(), "truncated (docmap)");
        let e = CompatError::Mismatch { reason: "source 0 differs".into() };
        assert_eq!(e.to_string(), "signature mismatch: source 0 differs");
        assert_eq!(e.reason(), "source 0 differs");
        assert!(!e.is_format());
        let f: CompatError = FormatError::BadMagic("XXXXX".into()).into();
        assert!(f.is_format());
    }
}
