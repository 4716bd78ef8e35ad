mod error;
mod index;
mod merge;
mod similarity;
mod traits;

pub use error::KbError;
pub use index::{CandidatePair, LexicalIndex};
pub use merge::{
    MergeCandidate, MergeConfig, MergeProvenance, MergeStrategy, Merger, RelatedDocument,
};
pub use similarity::{similarity_ratio, tokenize};
pub use traits::{Document, DocumentStore, DocumentSummary, TagStore};
