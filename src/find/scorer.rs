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
use crate::common::linear::linear_forward;
use crate::find::encoder::ContextualEncoder;
use crate::find::FindModuleConfig;
use std::borrow::Borrow;
use tch::{nn, TchError, Tensor};

/// # Similarity scorer
///
/// Smooths the per-token similarity channels `(N, L, 6)` with a single-layer bidirectional
/// recurrent pass and maps the result to one raw score (logit) per token through a
/// feed-forward network of decreasing width (`2c -> c -> c/2 -> c/4 -> 1` for a recurrent width
/// `c`) with leaky ReLU activations. Dropout precedes every linear layer in training mode.
pub struct SimilarityScorer {
    cosine_encoder: ContextualEncoder,
    encoding_dropout: Dropout,
    layer_1: nn::Linear,
    layer_2: nn::Linear,
    layer_3: nn::Linear,
    final_layer: nn::Linear,
    mlp_dropout: Dropout,
}

impl SimilarityScorer {
    pub fn new<'p, P>(p: P, config: &FindModuleConfig) -> SimilarityScorer
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let width = config.cosine_hidden_dim;

        let cosine_encoder = ContextualEncoder::new(
            p / "cosine_encoder",
            config.number_of_cosines(),
            width,
            1,
        );
        let layer_1 = nn::linear(p / "layer_1", 2 * width, width, Default::default());
        let layer_2 = nn::linear(p / "layer_2", width, width / 2, Default::default());
        let layer_3 = nn::linear(p / "layer_3", width / 2, width / 4, Default::default());
        let final_layer = nn::linear(p / "final_layer", width / 4, 1, Default::default());

        SimilarityScorer {
            cosine_encoder,
            encoding_dropout: Dropout::new(config.encoding_dropout),
            layer_1,
            layer_2,
            layer_3,
            final_layer,
            mlp_dropout: Dropout::new(config.mlp_dropout),
        }
    }

    /// Maps similarity channels `(N, L, C)` to raw scores `(N, L)`.
    pub fn forward_t(&self, channels: &Tensor, train: bool) -> Result<Tensor, TchError> {
        let encodings = self.cosine_encoder.forward(channels)?;
        let mut hidden = self.encoding_dropout.forward_t(&encodings, train)?;
        for layer in [&self.layer_1, &self.layer_2, &self.layer_3] {
            let activations = linear_forward(layer, &hidden)?.f_leaky_relu()?;
            hidden = self.mlp_dropout.forward_t(&activations, train)?;
        }
        linear_forward(&self.final_layer, &hidden)?.f_squeeze_dim(-1)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn one_score_per_token() -> anyhow::Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = FindModuleConfig::new(8, 4, 2);
        let scorer = SimilarityScorer::new(vs.root(), &config);
        let channels = Tensor::rand([3, 9, 6], (Kind::Float, Device::Cpu));

        let scores = scorer.forward_t(&channels, false)?;

        assert_eq!(scores.size(), vec![3, 9]);
        Ok(())
    }

    #[test]
    fn evaluation_mode_is_deterministic() -> anyhow::Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = FindModuleConfig::new(8, 4, 2);
        let scorer = SimilarityScorer::new(vs.root(), &config);
        let channels = Tensor::rand([2, 4, 6], (Kind::Float, Device::Cpu));

        let first = scorer.forward_t(&channels, false)?;
        let second = scorer.forward_t(&channels, false)?;

        assert!(first.equal(&second));
        Ok(())
    }

    #[test]
    fn wrong_channel_count_is_an_error() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = FindModuleConfig::new(8, 4, 2);
        let scorer = SimilarityScorer::new(vs.root(), &config);
        let channels = Tensor::rand([2, 4, 5], (Kind::Float, Device::Cpu));

        assert!(scorer.forward_t(&channels, false).is_err());
    }
}
