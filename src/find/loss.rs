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

//! Training objectives and metrics of the Find Module.
//!
//! Token scores are raw logits: a token is predicted to belong to the query span when
//! `sigmoid(score) > 0.5`, i.e. when `score > 0`.

use crate::FindModuleError;
use tch::{Kind, Reduction, Tensor};

/// Weight of `L_sim` in the combined pre-training objective.
pub const DEFAULT_GAMMA: f64 = 0.5;

/// `L_find`: binary cross-entropy between token logits `(N, L)` and span labels `(N, L)`,
/// averaged over every position.
pub fn find_loss(scores: &Tensor, labels: &Tensor) -> Result<Tensor, FindModuleError> {
    Ok(scores.f_binary_cross_entropy_with_logits::<Tensor>(
        &labels.f_to_kind(scores.kind())?,
        None,
        None,
        Reduction::Mean,
    )?)
}

/// `L_sim`: mean over queries of `pos_scores + neg_scores`.
pub fn sim_loss(pos_scores: &Tensor, neg_scores: &Tensor) -> Result<Tensor, FindModuleError> {
    Ok(pos_scores.f_add(neg_scores)?.f_mean(Kind::Float)?)
}

/// Combined objective `L_find + gamma * L_sim`.
pub fn string_loss(
    find_loss: &Tensor,
    sim_loss: &Tensor,
    gamma: f64,
) -> Result<Tensor, FindModuleError> {
    Ok(find_loss.f_add(&sim_loss.f_mul_scalar(gamma)?)?)
}

/// Binary predictions (1.0 / 0.0) for token logits.
pub fn predict_tokens(scores: &Tensor) -> Result<Tensor, FindModuleError> {
    Ok(scores.f_gt(0.0)?.f_to_kind(Kind::Float)?)
}

/// F1 score of the positive class over all positions of a batch.
/// Returns 0 when there are neither predicted nor true positives.
pub fn token_f1_score(scores: &Tensor, labels: &Tensor) -> Result<f64, FindModuleError> {
    let predictions = predict_tokens(scores)?;
    let labels = labels.f_to_kind(Kind::Float)?;

    let true_positives = predictions
        .f_mul(&labels)?
        .f_sum(Kind::Float)?
        .f_double_value(&[])?;
    let predicted_positives = predictions.f_sum(Kind::Float)?.f_double_value(&[])?;
    let actual_positives = labels.f_sum(Kind::Float)?.f_double_value(&[])?;

    let denominator = predicted_positives + actual_positives;
    Ok(if denominator > 0.0 {
        2.0 * true_positives / denominator
    } else {
        0.0
    })
}
