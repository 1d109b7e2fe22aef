//! # Find Module
//!
//! Rust implementation of the Find Module, a neural component of weak-supervision pipelines that
//! locates a query phrase inside a token sequence. Every token of the sequence receives a raw
//! score (logit) for how likely it is to be part of an occurrence of the query, and pooled query
//! representations are trained so that queries sharing a label stay close to each other.
//!
//! The crate is built on [tch-rs](https://github.com/LaurentMazare/tch-rs) bindings to libtorch.
//! - `find`: the model (`FindModule`), its building blocks, the metric-learning head and the training objectives
//! - `data`: padding, length-bucketed batching and construction of pre-training triples
//! - `pipelines`: a ready-to-use pre-training loop combining `L_find` and `L_sim`
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use find_module::data::PretrainingDataset;
//! use find_module::find::{FindModule, FindModuleConfig};
//! use find_module::pipelines::pretraining::FindModulePretrainer;
//! use tch::{nn, Device, Kind, Tensor};
//!
//! let vs = nn::VarStore::new(Device::cuda_if_available());
//! let config = FindModuleConfig::new(50, 32, 4);
//! let embedding_weights = Tensor::randn([100, 50], (Kind::Float, Device::Cpu));
//! let find_module = FindModule::new(vs.root(), &config, &embedding_weights)?;
//!
//! let dataset = PretrainingDataset::new(
//!     vec![vec![1, 5, 6, 7, 8, 2]],
//!     vec![vec![1, 6, 7, 2]],
//!     vec![vec![0., 0., 1., 1., 0., 0.]],
//!     0,
//! )?;
//! let mut pretrainer = FindModulePretrainer::new(&vs, 1e-3)?;
//! let summary = pretrainer.train_epoch(&find_module, &dataset, None, 32, Some(42))?;
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod data;
pub mod find;
pub mod pipelines;

pub use common::{Config, FindModuleError};
