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

use crate::FindModuleError;
use tch::{Device, Kind, TchError, Tensor};

/// Default cosine margin separating a query from queries sharing its label.
pub const DEFAULT_MARGIN: f64 = 0.9;

/// Offset subtracted from entries that must never win the row-wise maximum.
const MASKED_SCORE: f64 = 1e30;

/// Builds the `(N, N)` indicator matrices for a batch of query labels.
///
/// `same[i][j]` is 1.0 when queries `i != j` share a label, `diff[i][j]` is 1.0 when their labels
/// differ. A query is never its own partner.
pub fn label_indicator_matrices<T: PartialEq>(labels: &[T], device: Device) -> (Tensor, Tensor) {
    let n = labels.len();
    let mut same = Vec::with_capacity(n * n);
    let mut diff = Vec::with_capacity(n * n);
    for (i, label_i) in labels.iter().enumerate() {
        for (j, label_j) in labels.iter().enumerate() {
            let shared = label_i == label_j;
            same.push(if shared && i != j { 1f32 } else { 0f32 });
            diff.push(if shared { 0f32 } else { 1f32 });
        }
    }
    let shape = [n as i64, n as i64];
    (
        Tensor::from_slice(&same).view(shape).to_device(device),
        Tensor::from_slice(&diff).view(shape).to_device(device),
    )
}

/// Output of the metric-learning head, one score per query.
pub struct QuerySimilarityScores {
    /// `max_j (max(margin - cos(q_i, q_j), 0))^2` over same-label partners `j`, floored at 0
    pub pos_scores: Tensor,
    /// `max_j (max(cos(q_i, q_j), 0))^2` over different-label partners `j`, floored at 0
    pub neg_scores: Tensor,
}

/// # Metric-learning head
///
/// Compares every pooled query `(N, H)` with every dropout-perturbed pooled query `(N, H)`
/// (both already L2-normalized) and derives hinge scores against same-label and
/// different-label partners. Entries outside the relevant indicator matrix are pushed
/// far below zero before the row-wise maximum, so a query without any partner of a kind
/// scores 0 for it.
pub fn query_similarity_scores(
    pooled_queries: &Tensor,
    perturbed_pooled_queries: &Tensor,
    same_label_matrix: &Tensor,
    diff_label_matrix: &Tensor,
    margin: f64,
) -> Result<QuerySimilarityScores, FindModuleError> {
    let (n, _) = pooled_queries.size2()?;
    for (name, matrix) in [
        ("same_label_matrix", same_label_matrix),
        ("diff_label_matrix", diff_label_matrix),
    ] {
        if matrix.size() != [n, n] {
            return Err(FindModuleError::ValueError(format!(
                "{} must have shape [{}, {}] to match the query batch, got {:?}",
                name,
                n,
                n,
                matrix.size()
            )));
        }
    }

    let similarities = pooled_queries.f_mm(&perturbed_pooled_queries.f_tr()?)?;

    let pos_similarities = similarities
        .f_neg()?
        .f_add_scalar(margin)?
        .f_clamp_min(0.0)?
        .f_square()?;
    let neg_similarities = similarities.f_clamp_min(0.0)?.f_square()?;

    let pos_scores = masked_row_max(&pos_similarities, same_label_matrix)?;
    let neg_scores = masked_row_max(&neg_similarities, diff_label_matrix)?;

    Ok(QuerySimilarityScores {
        pos_scores,
        neg_scores,
    })
}

/// Row-wise maximum over the entries where `indicator` is 1.0, floored at 0.
fn masked_row_max(scores: &Tensor, indicator: &Tensor) -> Result<Tensor, TchError> {
    let excluded = indicator
        .f_to_kind(Kind::Float)?
        .f_neg()?
        .f_add_scalar(1.0)?
        .f_mul_scalar(MASKED_SCORE)?;
    let (row_max, _) = scores.f_sub(&excluded)?.f_max_dim(1, false)?;
    row_max.f_clamp_min(0.0)
}
