use thiserror::Error;

#[derive(Error, Debug)]
pub enum KbError {
    #[error("document #{0} not found")]
    DocumentNotFound(i64),
    #[error("group #{0} not found")]
    GroupNotFound(i64),
    #[error("group #{group} cannot take parent #{parent}: would create a cycle")]
    Cycle { group: i64, parent: i64 },
    #[error("pre-filter threshold {prefilter} must be strictly below similarity threshold {similarity}")]
    InvalidThresholds { prefilter: f64, similarity: f64 },
}
