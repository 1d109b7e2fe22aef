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

use crate::find::FindModuleConfig;
use crate::FindModuleError;
use std::borrow::Borrow;
use tch::{nn, Kind, TchError, Tensor};

/// # Token embedding resolver
///
/// Maps token ids to vectors using two disjoint tables built from a pretrained matrix of shape
/// `(vocab_size, embedding_dim)`:
/// - the tuneable table holds rows `[0, k)` and is registered as a trainable variable,
/// - the frozen table holds row 0 followed by rows `[k, vocab_size)` and is never trained.
///
/// An id `>= k` is looked up in the frozen table at `id - (k - 1)`, so that id 0 keeps slot 0
/// of both tables as the shared padding representation.
#[derive(Debug)]
pub struct TokenEmbeddings {
    tuneable_weights: Tensor,
    frozen_weights: Tensor,
    tuneable_vector_count: i64,
    padding_idx: i64,
}

impl TokenEmbeddings {
    pub fn new<'p, P>(
        p: P,
        config: &FindModuleConfig,
        embedding_weights: &Tensor,
    ) -> Result<TokenEmbeddings, FindModuleError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let (vocab_size, embedding_dim) = embedding_weights.size2()?;
        if embedding_dim != config.embedding_dim {
            return Err(FindModuleError::InvalidConfigurationError(format!(
                "embedding matrix width {} does not match embedding_dim {}",
                embedding_dim, config.embedding_dim
            )));
        }
        let k = config.tuneable_vector_count;
        if k < 1 || k > vocab_size {
            return Err(FindModuleError::InvalidConfigurationError(format!(
                "tuneable_vector_count {} must be in [1, {}]",
                k, vocab_size
            )));
        }

        let embedding_weights = embedding_weights
            .f_to_kind(Kind::Float)?
            .f_to_device(p.device())?;
        let tuneable_weights = p.var_copy(
            "tuneable_embeddings",
            &embedding_weights.f_narrow(0, 0, k)?,
        );
        let frozen_source = Tensor::f_cat(
            &[
                embedding_weights.f_narrow(0, 0, 1)?,
                embedding_weights.f_narrow(0, k, vocab_size - k)?,
            ],
            0,
        )?;
        let mut frozen_weights =
            p.zeros_no_train("frozen_embeddings", &[vocab_size - k + 1, embedding_dim]);
        tch::no_grad(|| frozen_weights.f_copy_(&frozen_source))?;

        Ok(TokenEmbeddings {
            tuneable_weights,
            frozen_weights,
            tuneable_vector_count: k,
            padding_idx: config.padding_idx,
        })
    }

    /// Number of ids resolved through the trainable table.
    pub fn tuneable_vector_count(&self) -> i64 {
        self.tuneable_vector_count
    }

    /// Total number of ids the resolver can embed.
    pub fn vocab_size(&self) -> i64 {
        self.tuneable_vector_count + self.frozen_weights.size()[0] - 1
    }

    /// Returns `(embeddings, padding_mask)` for a batch of token ids of shape `(N, L)`.
    /// The embeddings have shape `(N, L, embedding_dim)` and the padding mask `(N, L)` holds
    /// 1.0 where the id equals the padding id and 0.0 elsewhere.
    /// The input ids are never modified. The padding row of the tuneable table receives no
    /// gradient, so it stays equal to the frozen padding row.
    ///
    /// # Errors
    ///
    /// Returns an error for ids outside `[0, vocab_size)`.
    pub fn forward(&self, input_ids: &Tensor) -> Result<(Tensor, Tensor), TchError> {
        let padding_mask = input_ids.f_eq(self.padding_idx)?.f_to_kind(Kind::Float)?;

        let k = self.tuneable_vector_count;
        let is_tuneable = input_ids.f_lt(k)?;
        let zeros = input_ids.f_zeros_like()?;

        let tuneable_ids = input_ids.f_where_self(&is_tuneable, &zeros)?;
        let frozen_ids = input_ids
            .f_sub_scalar(k - 1)?
            .f_where_self(&is_tuneable.f_logical_not()?, &zeros)?;

        let tuneable_padding_idx = if (0..k).contains(&self.padding_idx) {
            self.padding_idx
        } else {
            -1
        };
        let tuneable_embeddings = Tensor::f_embedding(
            &self.tuneable_weights,
            &tuneable_ids,
            tuneable_padding_idx,
            false,
            false,
        )?;
        let frozen_embeddings =
            Tensor::f_embedding(&self.frozen_weights, &frozen_ids, -1, false, false)?;

        let embeddings = tuneable_embeddings
            .f_where_self(&is_tuneable.f_unsqueeze(-1)?, &frozen_embeddings)?;
        Ok((embeddings, padding_mask))
    }
}
