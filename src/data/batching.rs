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
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tch::kind::Element;
use tch::{Device, TchError, Tensor};

/// Right-pads every row to the length of the longest row of `rows` and stacks them into a
/// `(N, max_len)` tensor of the element type `T`.
///
/// # Example
///
/// ```no_run
/// use find_module::data::pad_batch;
/// let batch = pad_batch(&[vec![3i64, 4, 5], vec![6]], 0);
/// assert_eq!(batch.size(), vec![2, 3]);
/// ```
pub fn pad_batch<T, R>(rows: &[R], pad_value: T) -> Tensor
where
    T: Element + Copy,
    R: AsRef<[T]>,
{
    let max_len = rows.iter().map(|row| row.as_ref().len()).max().unwrap_or(0);
    let mut values = Vec::with_capacity(rows.len() * max_len);
    for row in rows {
        let row = row.as_ref();
        values.extend_from_slice(row);
        values.extend(std::iter::repeat(pad_value).take(max_len - row.len()));
    }
    Tensor::from_slice(&values).view([rows.len() as i64, max_len as i64])
}

/// A padded pre-training batch.
pub struct PretrainingBatch {
    /// Sequence token ids `(B, L)`
    pub tokens: Tensor,
    /// Query token ids `(B, Lq)`
    pub queries: Tensor,
    /// Span labels `(B, L)`, 1.0 on the query occurrence and 0.0 elsewhere (including padding)
    pub labels: Tensor,
}

impl PretrainingBatch {
    pub fn to_device(&self, device: Device) -> Result<PretrainingBatch, TchError> {
        Ok(PretrainingBatch {
            tokens: self.tokens.f_to_device(device)?,
            queries: self.queries.f_to_device(device)?,
            labels: self.labels.f_to_device(device)?,
        })
    }

    pub fn batch_size(&self) -> i64 {
        self.tokens.size()[0]
    }
}

/// # Pre-training dataset
///
/// Parallel rows of sequence tokens, query tokens and per-token span labels. Row `i` of
/// every container describes the same example, and `labels[i]` has one entry per token of
/// `tokens[i]`.
#[derive(Debug, Clone)]
pub struct PretrainingDataset {
    tokens: Vec<Vec<i64>>,
    queries: Vec<Vec<i64>>,
    labels: Vec<Vec<f32>>,
    pad_id: i64,
}

impl PretrainingDataset {
    /// Builds a dataset from parallel rows.
    ///
    /// # Arguments
    ///
    /// * `tokens` - sequence token ids
    /// * `queries` - query token ids, one query per sequence
    /// * `labels` - span labels, one per sequence token
    /// * `pad_id` - token id used to pad sequences and queries
    ///
    /// # Errors
    ///
    /// `FindModuleError::ValueError` naming the offending dimension when the containers hold a
    /// different number of rows, or when a label row and its token row differ in length.
    pub fn new(
        tokens: Vec<Vec<i64>>,
        queries: Vec<Vec<i64>>,
        labels: Vec<Vec<f32>>,
        pad_id: i64,
    ) -> Result<PretrainingDataset, FindModuleError> {
        if tokens.len() != queries.len() || tokens.len() != labels.len() {
            return Err(FindModuleError::ValueError(format!(
                "tokens, queries and labels must have the same number of rows (dim 0), got {}, {} and {}",
                tokens.len(),
                queries.len(),
                labels.len()
            )));
        }
        if let Some((index, (token_row, label_row))) = tokens
            .iter()
            .zip(labels.iter())
            .enumerate()
            .find(|(_, (token_row, label_row))| token_row.len() != label_row.len())
        {
            return Err(FindModuleError::ValueError(format!(
                "tokens and labels must have the same length (dim 1) at row {}, got {} and {}",
                index,
                token_row.len(),
                label_row.len()
            )));
        }
        Ok(PretrainingDataset {
            tokens,
            queries,
            labels,
            pad_id,
        })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn pad_id(&self) -> i64 {
        self.pad_id
    }

    /// Groups the examples into batches of at most `batch_size` examples.
    ///
    /// Examples are ordered by (sequence length, query length) and cut into consecutive
    /// batches, the last one possibly smaller. Without shuffling the batches come in
    /// ascending length order, identical for every call. With shuffling, examples of equal
    /// lengths are permuted and the batch order is randomized using a `ChaCha8Rng` seeded with
    /// `seed` (from entropy when `None`): two calls with the same seed return the same batches
    /// in the same order.
    ///
    /// The returned iterator is lazy and finite; padding happens as batches are drawn.
    pub fn make_batches(
        &self,
        batch_size: usize,
        shuffle: bool,
        seed: Option<u64>,
    ) -> Result<Batches<'_>, FindModuleError> {
        if batch_size == 0 {
            return Err(FindModuleError::ValueError(
                "batch_size must be at least 1".to_string(),
            ));
        }

        let mut rng = if shuffle {
            Some(match seed {
                Some(seed) => ChaCha8Rng::seed_from_u64(seed),
                None => ChaCha8Rng::from_entropy(),
            })
        } else {
            None
        };

        let mut order: Vec<usize> = (0..self.len()).collect();
        if let Some(rng) = rng.as_mut() {
            order.shuffle(rng);
        }
        order.sort_by_key(|&index| (self.tokens[index].len(), self.queries[index].len()));

        let mut plan: Vec<Vec<usize>> = order
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        if let Some(rng) = rng.as_mut() {
            plan.shuffle(rng);
        }

        log::debug!(
            "Batching {} examples into {} batches of at most {} (shuffle: {}, seed: {:?})",
            self.len(),
            plan.len(),
            batch_size,
            shuffle,
            seed
        );

        Ok(Batches {
            dataset: self,
            plan,
            position: 0,
        })
    }

    fn batch(&self, indices: &[usize]) -> PretrainingBatch {
        let tokens: Vec<&[i64]> = indices.iter().map(|&i| self.tokens[i].as_slice()).collect();
        let queries: Vec<&[i64]> = indices.iter().map(|&i| self.queries[i].as_slice()).collect();
        let labels: Vec<&[f32]> = indices.iter().map(|&i| self.labels[i].as_slice()).collect();
        PretrainingBatch {
            tokens: pad_batch(&tokens, self.pad_id),
            queries: pad_batch(&queries, self.pad_id),
            labels: pad_batch(&labels, 0f32),
        }
    }
}

/// Lazy, finite sequence of padded batches over a `PretrainingDataset`.
/// Call `make_batches` again to start a new epoch.
pub struct Batches<'a> {
    dataset: &'a PretrainingDataset,
    plan: Vec<Vec<usize>>,
    position: usize,
}

impl<'a> Batches<'a> {
    /// Dataset row indices of every batch, in iteration order.
    pub fn plan(&self) -> &[Vec<usize>] {
        &self.plan
    }
}

impl<'a> Iterator for Batches<'a> {
    type Item = PretrainingBatch;

    fn next(&mut self) -> Option<Self::Item> {
        let indices = self.plan.get(self.position)?;
        self.position += 1;
        Some(self.dataset.batch(indices))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.plan.len() - self.position;
        (remaining, Some(remaining))
    }
}

impl<'a> ExactSizeIterator for Batches<'a> {}
