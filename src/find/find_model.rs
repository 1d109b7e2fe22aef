// Copyright 2024 The Find Module Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::common::dropout::Dropout;
use crate::find::attention::AttentionPooling;
use crate::find::embeddings::TokenEmbeddings;
use crate::find::encoder::ContextualEncoder;
use crate::find::ngram::{l2_normalize, NGramSimilarities};
use crate::find::scorer::SimilarityScorer;
use crate::find::similarity::{query_similarity_scores, QuerySimilarityScores};
use crate::find::FindModuleConfig;
use crate::FindModuleError;
use std::borrow::Borrow;
use tch::{nn, Device, Kind, TchError, Tensor};

/// # Find Module
///
/// Scores every token of a sequence for membership in an occurrence of a query phrase
/// (`find_forward_t`, trained with `L_find`) and embeds queries so that queries sharing a label
/// cluster together (`sim_forward_t`, trained with `L_sim`).
///
/// The module is built on a `nn::Path` whose var store decides the device every parameter and
/// intermediate tensor lives on. Inputs are moved to that device once per call.
pub struct FindModule {
    embeddings: TokenEmbeddings,
    encoder: ContextualEncoder,
    attention_pooling: AttentionPooling,
    scorer: SimilarityScorer,
    encoding_dropout: Dropout,
    padding_idx: i64,
    device: Device,
}

impl FindModule {
    /// Build a new `FindModule`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the Find Module
    /// * `config` - `FindModuleConfig` object defining the model architecture
    /// * `embedding_weights` - pretrained vectors `(vocab_size, embedding_dim)`, row `i` embedding token `i`
    ///
    /// # Example
    ///
    /// ```no_run
    /// use find_module::find::{FindModule, FindModuleConfig};
    /// use tch::{nn, Device, Kind, TchError, Tensor};
    ///
    /// # fn main() -> Result<(), find_module::FindModuleError> {
    /// let device = Device::cuda_if_available();
    /// let vs = nn::VarStore::new(device);
    /// let config = FindModuleConfig::new(300, 150, 4);
    /// let embedding_weights = Tensor::randn([10_000, 300], (Kind::Float, Device::Cpu));
    /// let find_module = FindModule::new(vs.root(), &config, &embedding_weights)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new<'p, P>(
        p: P,
        config: &FindModuleConfig,
        embedding_weights: &Tensor,
    ) -> Result<FindModule, FindModuleError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        config.validate()?;

        let embeddings = TokenEmbeddings::new(p / "embeddings", config, embedding_weights)?;
        let encoder = ContextualEncoder::new(
            p / "encoder",
            config.embedding_dim,
            config.hidden_dim,
            config.n_layers,
        );
        let attention_pooling = AttentionPooling::new(
            p / "attention_pooling",
            config.encoding_dim(),
            config.padding_score,
        );
        let scorer = SimilarityScorer::new(p / "scorer", config);

        log::info!(
            "Find Module on {:?}: {} tuneable / {} total vectors, encoding width {}",
            p.device(),
            embeddings.tuneable_vector_count(),
            embeddings.vocab_size(),
            config.encoding_dim()
        );

        Ok(FindModule {
            embeddings,
            encoder,
            attention_pooling,
            scorer,
            encoding_dropout: Dropout::new(config.encoding_dropout),
            padding_idx: config.padding_idx,
            device: p.device(),
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Embeds and encodes token ids `(N, L)`, returning `(encodings, padding_mask)` of shapes
    /// `(N, L, H)` and `(N, L)`. Encoding dropout is applied in training mode.
    pub fn encode_tokens(
        &self,
        input_ids: &Tensor,
        train: bool,
    ) -> Result<(Tensor, Tensor), FindModuleError> {
        let (embeddings, padding_mask) = self.embeddings.forward(input_ids)?;
        let encodings = self.encoder.forward(&embeddings)?;
        let encodings = self.encoding_dropout.forward_t(&encodings, train)?;
        Ok((encodings, padding_mask))
    }

    /// Forward pass computing the token scores used by `L_find`.
    ///
    /// # Arguments
    ///
    /// * `sequences` - token ids `(N, L)`
    /// * `queries` - query token ids `(N, Lq)`, row `i` being searched for in sequence `i`
    /// * `lower_bound` - floor applied element-wise to the scores
    /// * `train` - enables dropout
    ///
    /// # Returns
    ///
    /// * Raw scores (logits) `(N, L)`, `max(score, lower_bound)`
    ///
    /// # Errors
    ///
    /// A `ValueError` for inputs that are not 2D or do not share their batch dimension, a
    /// `TchError` for any libtorch failure (token ids outside the vocabulary, device memory
    /// exhaustion).
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use find_module::find::{FindModule, FindModuleConfig};
    /// # use tch::{nn, no_grad, Device, Kind, Tensor};
    /// # fn main() -> Result<(), find_module::FindModuleError> {
    /// # let vs = nn::VarStore::new(Device::Cpu);
    /// # let config = FindModuleConfig::new(8, 4, 2);
    /// # let find_module = FindModule::new(vs.root(), &config, &Tensor::randn([16, 8], (Kind::Float, Device::Cpu)))?;
    /// let sequences = Tensor::from_slice(&[1i64, 2, 3, 4, 5, 6, 7, 8, 9, 10]).view([1, 10]);
    /// let queries = Tensor::from_slice(&[6i64, 7]).view([1, 2]);
    /// let scores = no_grad(|| find_module.find_forward_t(&sequences, &queries, -20.0, false))?;
    /// assert_eq!(scores.size(), vec![1, 10]);
    /// # Ok(())
    /// # }
    /// ```
    pub fn find_forward_t(
        &self,
        sequences: &Tensor,
        queries: &Tensor,
        lower_bound: f64,
        train: bool,
    ) -> Result<Tensor, FindModuleError> {
        let (batch_size, seq_len) = batch_shape("sequences", sequences)?;
        let (query_batch_size, _) = batch_shape("queries", queries)?;
        if batch_size != query_batch_size {
            return Err(FindModuleError::ValueError(format!(
                "sequences and queries must share the batch dimension (dim 0), got {} and {}",
                batch_size, query_batch_size
            )));
        }
        if seq_len == 0 {
            log::warn!("Scoring a batch of empty sequences, returning an empty score tensor");
            return Ok(Tensor::f_zeros([batch_size, 0], (Kind::Float, self.device))?);
        }

        let sequences = sequences.f_to_device(self.device)?;
        let queries = self.non_empty_queries(queries)?;

        let (query_encodings, query_padding_mask) = self.encode_tokens(&queries, train)?;
        let pooled_queries = self
            .attention_pooling
            .forward(&query_encodings, Some(&query_padding_mask))?;
        let normalized_queries = l2_normalize(&pooled_queries)?;

        let (sequence_embeddings, sequence_padding_mask) = self.embeddings.forward(&sequences)?;
        let similarity_channels = NGramSimilarities::new(
            &self.encoder,
            &self.attention_pooling,
            self.encoding_dropout,
        )
        .forward_t(
            &sequence_embeddings,
            &sequence_padding_mask,
            &normalized_queries,
            train,
        )?;

        Ok(self
            .scorer
            .forward_t(&similarity_channels, train)?
            .f_clamp_min(lower_bound)?)
    }

    /// L2-normalized pooled query vectors `(N, H)` and their dropout-perturbed counterparts.
    /// Both are pooled with the attention weights computed on the perturbed encodings.
    fn pool_queries(&self, queries: &Tensor, train: bool) -> Result<(Tensor, Tensor), TchError> {
        let queries = self.non_empty_queries(queries)?;
        let (embeddings, padding_mask) = self.embeddings.forward(&queries)?;
        let encodings = self.encoder.forward(&embeddings)?;
        let perturbed_encodings = self.encoding_dropout.forward_t(&encodings, train)?;

        let attention_weights = self
            .attention_pooling
            .attention_weights(&perturbed_encodings, Some(&padding_mask))?;
        let pooled = attention_weights.f_bmm(&encodings)?.f_squeeze_dim(1)?;
        let perturbed_pooled = attention_weights
            .f_bmm(&perturbed_encodings)?
            .f_squeeze_dim(1)?;

        Ok((l2_normalize(&pooled)?, l2_normalize(&perturbed_pooled)?))
    }

    /// L2-normalized pooled representation `(N, H)` of every query.
    pub fn pooled_query_embeddings(
        &self,
        queries: &Tensor,
        train: bool,
    ) -> Result<Tensor, FindModuleError> {
        batch_shape("queries", queries)?;
        let (pooled, _) = self.pool_queries(queries, train)?;
        Ok(pooled)
    }

    /// Forward pass computing the query scores used by `L_sim`.
    ///
    /// # Arguments
    ///
    /// * `queries` - query token ids `(N, Lq)`
    /// * `same_label_matrix` - `(N, N)`, 1.0 where two distinct queries share a label
    /// * `diff_label_matrix` - `(N, N)`, 1.0 where two queries have different labels
    /// * `margin` - cosine margin for same-label pairs (`DEFAULT_MARGIN` is 0.9)
    /// * `train` - enables dropout on the encodings compared against
    ///
    /// # Returns
    ///
    /// * `QuerySimilarityScores` holding non-negative `pos_scores` and `neg_scores` `(N)`
    ///
    /// # Errors
    ///
    /// A `ValueError` when the queries are not 2D or the indicator matrices are not `(N, N)`, a
    /// `TchError` for any libtorch failure.
    pub fn sim_forward_t(
        &self,
        queries: &Tensor,
        same_label_matrix: &Tensor,
        diff_label_matrix: &Tensor,
        margin: f64,
        train: bool,
    ) -> Result<QuerySimilarityScores, FindModuleError> {
        batch_shape("queries", queries)?;
        let (pooled, perturbed_pooled) = self.pool_queries(queries, train)?;
        query_similarity_scores(
            &pooled,
            &perturbed_pooled,
            &same_label_matrix.f_to_device(self.device)?,
            &diff_label_matrix.f_to_device(self.device)?,
            margin,
        )
    }

    /// Moves queries to the model device, replacing a zero-width batch by a single padding column.
    fn non_empty_queries(&self, queries: &Tensor) -> Result<Tensor, TchError> {
        let (batch_size, query_len) = queries.size2()?;
        if query_len == 0 {
            log::warn!("Pooling a batch of empty queries, substituting a padding column");
            Tensor::f_full(
                [batch_size, 1],
                self.padding_idx,
                (Kind::Int64, self.device),
            )
        } else {
            queries.f_to_device(self.device)
        }
    }
}

fn batch_shape(name: &str, input_ids: &Tensor) -> Result<(i64, i64), FindModuleError> {
    let size = input_ids.size();
    if size.len() != 2 {
        return Err(FindModuleError::ValueError(format!(
            "{} must be a 2D (batch, length) tensor, got shape {:?}",
            name, size
        )));
    }
    Ok((size[0], size[1]))
}
