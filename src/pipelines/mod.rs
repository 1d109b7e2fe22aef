//! # Ready-to-use training pipelines
//!
//! #### Find Module pre-training
//! Trains a `FindModule` on (sequence, query, labels) triples with the combined objective
//! `L_find + gamma * L_sim`, where `L_sim` is computed on a set of labelled queries (for example
//! quoted phrases extracted from labeling explanations). Evaluation reports the average losses
//! and the token-level F1 score over length-bucketed batches.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use find_module::data::{build_pretraining_triples, PretrainingDataset};
//! use find_module::find::{FindModule, FindModuleConfig};
//! use find_module::pipelines::pretraining::{FindModulePretrainer, LabelledQueries};
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use tch::{nn, Device, Kind, Tensor};
//!
//! let vs = nn::VarStore::new(Device::cuda_if_available());
//! let config = FindModuleConfig::new(50, 32, 4);
//! let embedding_weights = Tensor::randn([100, 50], (Kind::Float, Device::Cpu));
//! let find_module = FindModule::new(vs.root(), &config, &embedding_weights)?;
//!
//! let token_seqs = vec![vec![10, 11, 12, 13, 14, 15], vec![20, 21, 22, 23]];
//! let mut rng = ChaCha8Rng::seed_from_u64(42);
//! let dataset = build_pretraining_triples(&token_seqs, 2, 3, &mut rng).into_dataset(0)?;
//! let labelled_queries =
//!     LabelledQueries::new(&[vec![11, 12], vec![13], vec![21, 22]], &["a", "a", "b"], 0)?;
//!
//! let mut pretrainer = FindModulePretrainer::new(&vs, 1e-3)?;
//! for epoch in 0..10 {
//!     pretrainer.train_epoch(&find_module, &dataset, Some(&labelled_queries), 32, Some(epoch))?;
//! }
//! let evaluation = pretrainer.evaluate(&find_module, &dataset, Some(&labelled_queries), 32)?;
//! # Ok(())
//! # }
//! ```

pub mod pretraining;
