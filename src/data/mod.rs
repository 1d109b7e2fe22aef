//! # Batching pipeline
//!
//! Converts ragged token, query and label rows into right-padded tensors. Pre-training
//! examples are grouped by (sequence length, query length) before batching so that a batch
//! is only padded to the longest of its own members.
//!
//! The triple builders produce (sequence, query, labels) examples from tokenized text, either
//! by sampling a random span of every sequence as its query or by locating known queries.

mod batching;
mod triples;

pub use batching::{pad_batch, Batches, PretrainingBatch, PretrainingDataset};
pub use triples::{
    build_labelled_triples, build_pretraining_triples, collect_quoted_queries,
    extract_quoted_queries, label_query_span, PretrainingTriples, MAX_QUERY_LENGTH,
    MIN_SEQUENCE_LENGTH, QUOTE_CHARACTERS,
};
