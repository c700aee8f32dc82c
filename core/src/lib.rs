pub mod catalog;
pub mod codec;
pub mod engine;
pub mod error;
pub mod index;
pub mod persist;
pub mod signature;
pub mod sources;
pub mod tokenizer;
pub mod trie;

pub use catalog::{Catalog, CatalogConfig, Definition, FullTextHit, FulltextOrigin, LookupMode};
pub use engine::{IndexEngine, WordEntry, FUZZY_MAX_DISTANCE};
pub use error::{CompatError, FormatError};
pub use index::{DocId, DocRef, FullTextIndex, FullTextStats, IndexState, ScoredDoc, MAX_SUBSTRING_EXPANSIONS};
pub use persist::{FormatVersion, IndexPaths, MetaFile};
pub use signature::{compute_signature, evaluate, Acceptance, CompatMode, Signature, SourceIdentity};
pub use sources::{source_paths_from_env, Source, SourceData, SourceDecoder, SourceRegistry, SOURCES_ENV};
