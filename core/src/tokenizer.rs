use lazy_static::lazy_static;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    // ASCII letters, digits, '_' and '-' form words; every other char (non-ASCII included) separates.
    static ref WORD_RE: Regex = Regex::new(r"[A-Za-z0-9_\-]+").expect("valid regex");
}

/// Canonical index key for a headword: NFKC, lowercase, trimmed.
pub fn normalize_word(word: &str) -> String {
    word.nfkc().collect::<String>().to_lowercase().trim().to_string()
}

/// Tokenize definition text into lowercase ASCII terms, in order of appearance.
pub fn tokenize(text: &str) -> Vec<String> {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_ascii_lowercase())
        .collect()
}

/// Byte trigrams of an ASCII term. Terms shorter than three bytes have none.
pub fn trigrams(term: &str) -> impl Iterator<Item = [u8; 3]> + '_ {
    term.as_bytes().windows(3).map(|w| [w[0], w[1], w[2]])
}
