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

//! # Find Module pre-training
//!
//! `FindModulePretrainer` owns an Adam optimizer over the trainable variables of a var store
//! (the frozen embedding partition is registered as non-trainable and is never updated) and
//! drives one epoch of `L_find + gamma * L_sim` at a time.

use crate::data::{pad_batch, PretrainingBatch, PretrainingDataset};
use crate::find::loss::{find_loss, sim_loss, string_loss, token_f1_score, DEFAULT_GAMMA};
use crate::find::{label_indicator_matrices, FindModule, DEFAULT_MARGIN};
use crate::FindModuleError;
use tch::{nn, nn::OptimizerConfig, no_grad, Device, Tensor};

/// Default floor applied to token scores during training and evaluation.
pub const DEFAULT_LOWER_BOUND: f64 = -20.0;

/// # Labelled queries
/// Padded query token ids with the label indicator matrices used to compute `L_sim`.
pub struct LabelledQueries {
    queries: Tensor,
    same_label_matrix: Tensor,
    diff_label_matrix: Tensor,
}

impl LabelledQueries {
    /// Pads `queries` with `pad_id` and builds the indicator matrices of `labels`.
    ///
    /// # Errors
    ///
    /// `FindModuleError::ValueError` when `queries` and `labels` differ in length.
    pub fn new<T: PartialEq>(
        queries: &[Vec<i64>],
        labels: &[T],
        pad_id: i64,
    ) -> Result<LabelledQueries, FindModuleError> {
        if queries.len() != labels.len() {
            return Err(FindModuleError::ValueError(format!(
                "queries and labels must have the same number of rows (dim 0), got {} and {}",
                queries.len(),
                labels.len()
            )));
        }
        let (same_label_matrix, diff_label_matrix) = label_indicator_matrices(labels, Device::Cpu);
        Ok(LabelledQueries {
            queries: pad_batch(queries, pad_id),
            same_label_matrix,
            diff_label_matrix,
        })
    }

    pub fn len(&self) -> usize {
        self.queries.size()[0] as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sim_loss_t(
        &self,
        model: &FindModule,
        margin: f64,
        train: bool,
    ) -> Result<Tensor, FindModuleError> {
        let scores = model.sim_forward_t(
            &self.queries,
            &self.same_label_matrix,
            &self.diff_label_matrix,
            margin,
            train,
        )?;
        sim_loss(&scores.pos_scores, &scores.neg_scores)
    }
}

/// Average losses over the batches of one training epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingSummary {
    pub loss: f64,
    pub find_loss: f64,
    pub sim_loss: f64,
    pub batch_count: usize,
}

/// Average losses and token F1 score over the batches of an evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationSummary {
    pub loss: f64,
    pub find_loss: f64,
    pub sim_loss: f64,
    pub f1_score: f64,
    pub batch_count: usize,
}

#[derive(Default)]
struct Totals {
    loss: f64,
    find_loss: f64,
    sim_loss: f64,
    f1_score: f64,
    batch_count: usize,
}

impl Totals {
    fn average(&self, total: f64) -> f64 {
        if self.batch_count > 0 {
            total / self.batch_count as f64
        } else {
            0.0
        }
    }
}

/// # Find Module pre-training driver
pub struct FindModulePretrainer {
    optimizer: nn::Optimizer,
    gamma: f64,
    margin: f64,
    lower_bound: f64,
}

impl FindModulePretrainer {
    /// Builds an Adam optimizer with learning rate `learning_rate` over the trainable variables
    /// of `vs`. `gamma`, `margin` and `lower_bound` take their default values.
    pub fn new(
        vs: &nn::VarStore,
        learning_rate: f64,
    ) -> Result<FindModulePretrainer, FindModuleError> {
        let optimizer = nn::Adam::default().build(vs, learning_rate)?;
        Ok(FindModulePretrainer {
            optimizer,
            gamma: DEFAULT_GAMMA,
            margin: DEFAULT_MARGIN,
            lower_bound: DEFAULT_LOWER_BOUND,
        })
    }

    /// Weight of `L_sim` in the combined objective.
    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_margin(mut self, margin: f64) -> Self {
        self.margin = margin;
        self
    }

    /// Floor applied to the token scores.
    pub fn with_lower_bound(mut self, lower_bound: f64) -> Self {
        self.lower_bound = lower_bound;
        self
    }

    /// Runs one shuffled pass over `dataset`, taking an optimizer step per batch.
    ///
    /// # Arguments
    ///
    /// * `model` - Find Module built on the var store of this pretrainer
    /// * `dataset` - pre-training triples
    /// * `labelled_queries` - queries for `L_sim`, recomputed at every step. `None` trains on `L_find` only.
    /// * `batch_size` - maximum number of triples per batch
    /// * `seed` - shuffling seed, entropy when `None`
    pub fn train_epoch(
        &mut self,
        model: &FindModule,
        dataset: &PretrainingDataset,
        labelled_queries: Option<&LabelledQueries>,
        batch_size: usize,
        seed: Option<u64>,
    ) -> Result<TrainingSummary, FindModuleError> {
        let mut totals = Totals::default();
        for batch in dataset.make_batches(batch_size, true, seed)? {
            let batch = batch.to_device(model.device())?;
            let (batch_find_loss, batch_sim_loss) =
                self.batch_losses(model, &batch, labelled_queries, true)?;
            let loss = string_loss(&batch_find_loss, &batch_sim_loss, self.gamma)?;

            self.optimizer.backward_step(&loss);

            totals.loss += loss.f_double_value(&[])?;
            totals.find_loss += batch_find_loss.f_double_value(&[])?;
            totals.sim_loss += batch_sim_loss.f_double_value(&[])?;
            totals.batch_count += 1;
        }

        let summary = TrainingSummary {
            loss: totals.average(totals.loss),
            find_loss: totals.average(totals.find_loss),
            sim_loss: totals.average(totals.sim_loss),
            batch_count: totals.batch_count,
        };
        log::info!(
            "Training epoch over {} batches: loss {:.4}, L_find {:.4}, L_sim {:.4}",
            summary.batch_count,
            summary.loss,
            summary.find_loss,
            summary.sim_loss
        );
        Ok(summary)
    }

    /// Evaluates `model` on `dataset` in evaluation mode without gradient tracking, iterating
    /// the batches in their fixed, unshuffled order. `L_sim` is 0 when `labelled_queries` is `None`.
    pub fn evaluate(
        &self,
        model: &FindModule,
        dataset: &PretrainingDataset,
        labelled_queries: Option<&LabelledQueries>,
        batch_size: usize,
    ) -> Result<EvaluationSummary, FindModuleError> {
        let mut totals = Totals::default();
        no_grad(|| -> Result<(), FindModuleError> {
            for batch in dataset.make_batches(batch_size, false, None)? {
                let batch = batch.to_device(model.device())?;
                let token_scores =
                    model.find_forward_t(&batch.tokens, &batch.queries, self.lower_bound, false)?;
                let batch_find_loss = find_loss(&token_scores, &batch.labels)?;
                let batch_sim_loss = self.sim_loss_t(model, labelled_queries, false)?;
                let loss = string_loss(&batch_find_loss, &batch_sim_loss, self.gamma)?;

                totals.loss += loss.f_double_value(&[])?;
                totals.find_loss += batch_find_loss.f_double_value(&[])?;
                totals.sim_loss += batch_sim_loss.f_double_value(&[])?;
                totals.f1_score += token_f1_score(&token_scores, &batch.labels)?;
                totals.batch_count += 1;
            }
            Ok(())
        })?;

        let summary = EvaluationSummary {
            loss: totals.average(totals.loss),
            find_loss: totals.average(totals.find_loss),
            sim_loss: totals.average(totals.sim_loss),
            f1_score: totals.average(totals.f1_score),
            batch_count: totals.batch_count,
        };
        log::info!(
            "Evaluation over {} batches: loss {:.4}, L_find {:.4}, L_sim {:.4}, F1 {:.4}",
            summary.batch_count,
            summary.loss,
            summary.find_loss,
            summary.sim_loss,
            summary.f1_score
        );
        Ok(summary)
    }

    /// Evaluation restricted to `L_find` and the token F1 score.
    pub fn evaluate_find_loss(
        &self,
        model: &FindModule,
        dataset: &PretrainingDataset,
        batch_size: usize,
    ) -> Result<EvaluationSummary, FindModuleError> {
        self.evaluate(model, dataset, None, batch_size)
    }

    fn batch_losses(
        &self,
        model: &FindModule,
        batch: &PretrainingBatch,
        labelled_queries: Option<&LabelledQueries>,
        train: bool,
    ) -> Result<(Tensor, Tensor), FindModuleError> {
        let token_scores =
            model.find_forward_t(&batch.tokens, &batch.queries, self.lower_bound, train)?;
        Ok((
            find_loss(&token_scores, &batch.labels)?,
            self.sim_loss_t(model, labelled_queries, train)?,
        ))
    }

    fn sim_loss_t(
        &self,
        model: &FindModule,
        labelled_queries: Option<&LabelledQueries>,
        train: bool,
    ) -> Result<Tensor, FindModuleError> {
        match labelled_queries {
            Some(labelled_queries) => labelled_queries.sim_loss_t(model, self.margin, train),
            None => Ok(Tensor::from(0f32).f_to_device(model.device())?),
        }
    }
}
