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

use std::borrow::Borrow;
use crate::common::linear::linear_forward;
use tch::{nn, Kind, TchError, Tensor};

/// # Attention pooling
///
/// Scores every position with `v . tanh(W h + b)`, pushes padding positions down by
/// `padding_score` and normalizes the scores with a softmax over the sequence.
/// The pooled vector is the weighted sum of the hidden states.
#[derive(Debug)]
pub struct AttentionPooling {
    attention_matrix: nn::Linear,
    attention_vector: nn::Linear,
    padding_score: f64,
}

impl AttentionPooling {
    pub fn new<'p, P>(p: P, encoding_dim: i64, padding_score: f64) -> AttentionPooling
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let attention_matrix = nn::linear(
            p / "attention_matrix",
            encoding_dim,
            encoding_dim,
            Default::default(),
        );
        let attention_vector = nn::linear(
            p / "attention_vector",
            encoding_dim,
            1,
            nn::LinearConfig {
                bias: false,
                ..Default::default()
            },
        );

        AttentionPooling {
            attention_matrix,
            attention_vector,
            padding_score,
        }
    }

    /// Attention weights of shape `(N, 1, L)` for hidden states `(N, L, H)`.
    /// `padding_mask` `(N, L)` holds 1.0 on padding positions.
    pub fn attention_weights(
        &self,
        hidden_states: &Tensor,
        padding_mask: Option<&Tensor>,
    ) -> Result<Tensor, TchError> {
        let projected = linear_forward(&self.attention_matrix, hidden_states)?.f_tanh()?;
        let scores = linear_forward(&self.attention_vector, &projected)?.f_squeeze_dim(-1)?;

        let scores = match padding_mask {
            Some(mask) => scores.f_add(&mask.f_mul_scalar(self.padding_score)?)?,
            None => scores,
        };
        scores.f_softmax(-1, Kind::Float)?.f_unsqueeze(1)
    }

    /// Pools hidden states `(N, L, H)` into `(N, H)`.
    pub fn forward(
        &self,
        hidden_states: &Tensor,
        padding_mask: Option<&Tensor>,
    ) -> Result<Tensor, TchError> {
        self.attention_weights(hidden_states, padding_mask)?
            .f_bmm(hidden_states)?
            .f_squeeze_dim(1)
    }
}
