//! # Find Module: query localization with multi-granularity token similarities
//!
//! Given a short query phrase (for example a quoted span of a labeling explanation) and a
//! longer token sequence, the Find Module scores every token of the sequence for how likely
//! it is to belong to an occurrence of the query. It is pre-trained with two objectives:
//! - `L_find`: token-level localization of a query inside a sequence (`FindModule::find_forward_t`)
//! - `L_sim`: metric learning pulling queries that share a label together (`FindModule::sim_forward_t`)
//!
//! Every token is represented at three granularities (unigram, two bigrams, three trigrams)
//! by a single shared bidirectional LSTM re-applied to windows of the sequence, pooled with a
//! learned attention and compared to the pooled query by cosine similarity. The six
//! similarity channels are turned into one raw score (logit) per token by a small recurrent
//! and feed-forward head.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use find_module::find::{label_indicator_matrices, FindModule, FindModuleConfig, DEFAULT_MARGIN};
//! use tch::{nn, no_grad, Device, Kind, Tensor};
//!
//! let device = Device::cuda_if_available();
//! let vs = nn::VarStore::new(device);
//! let config = FindModuleConfig::new(50, 32, 4);
//! let embedding_weights = Tensor::randn([1_000, 50], (Kind::Float, Device::Cpu));
//! let find_module = FindModule::new(vs.root(), &config, &embedding_weights)?;
//!
//! let sequences = Tensor::from_slice(&[1i64, 2, 3, 4, 5, 6, 7, 8, 9, 10]).view([1, 10]);
//! let queries = Tensor::from_slice(&[6i64, 7]).view([1, 2]);
//! let token_scores = no_grad(|| find_module.find_forward_t(&sequences, &queries, -20.0, false))?;
//!
//! let labelled_queries = Tensor::from_slice(&[11i64, 12, 13, 0, 14, 15]).view([3, 2]);
//! let (same, diff) = label_indicator_matrices(&["spam", "spam", "ham"], device);
//! let query_scores = no_grad(|| {
//!     find_module.sim_forward_t(&labelled_queries, &same, &diff, DEFAULT_MARGIN, false)
//! })?;
//! # Ok(())
//! # }
//! ```

mod attention;
mod config;
mod embeddings;
mod encoder;
mod find_model;
pub mod loss;
mod ngram;
mod scorer;
mod similarity;

pub use attention::AttentionPooling;
pub use config::{FindModuleConfig, SUPPORTED_SLIDING_WINDOW_SIZE};
pub use embeddings::TokenEmbeddings;
pub use encoder::ContextualEncoder;
pub use find_model::FindModule;
pub use ngram::{cosine_to_query, l2_normalize, sliding_windows, NGramSimilarities, SlidingWindows};
pub use scorer::SimilarityScorer;
pub use similarity::{
    label_indicator_matrices, query_similarity_scores, QuerySimilarityScores, DEFAULT_MARGIN,
};
