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
use crate::find::encoder::ContextualEncoder;
use tch::{Kind, TchError, Tensor};

/// Added to every component before L2 normalization so that all-zero vectors stay finite.
pub const NORMALIZATION_EPSILON: f64 = 1e-5;

/// L2-normalizes the last dimension of `tensor` after shifting it by [`NORMALIZATION_EPSILON`].
pub fn l2_normalize(tensor: &Tensor) -> Result<Tensor, TchError> {
    let shifted = tensor.f_add_scalar(NORMALIZATION_EPSILON)?;
    let norm = shifted
        .f_square()?
        .f_sum_dim_intlist([-1].as_slice(), true, Kind::Float)?
        .f_sqrt()?
        .f_clamp_min(1e-12)?;
    shifted.f_div(&norm)
}

/// Fixed-width windows over a batch of vector sequences.
pub struct SlidingWindows {
    /// Window contents, `(N * (L + width - 1), width, E)`
    pub windows: Tensor,
    /// Padding indicators for every window slot, `(N * (L + width - 1), width)`
    pub padding_mask: Tensor,
    /// Number of windows per sequence, `L + width - 1`
    pub windows_per_sequence: i64,
}

/// Builds every window of `width` consecutive positions over `sequence` `(N, L, E)`.
///
/// Each sequence is padded with `width - 1` zero vectors on both sides, marked as padding in
/// the mask. Window `j` covers original positions `j - (width - 1) ..= j`: window `i` ends at
/// token `i`, window `i + width - 1` starts at token `i`, and for a width of 3 window `i + 1`
/// is centered on token `i`.
pub fn sliding_windows(
    sequence: &Tensor,
    padding_mask: &Tensor,
    width: i64,
) -> Result<SlidingWindows, TchError> {
    let (batch_size, seq_len, embedding_dim) = sequence.size3()?;
    let boundary = width - 1;
    let windows_per_sequence = seq_len + boundary;

    let zero_vectors = Tensor::f_zeros(
        [batch_size, boundary, embedding_dim],
        (sequence.kind(), sequence.device()),
    )?;
    let boundary_mask = Tensor::f_ones(
        [batch_size, boundary],
        (padding_mask.kind(), padding_mask.device()),
    )?;

    let padded_sequence = Tensor::f_cat(&[&zero_vectors, sequence, &zero_vectors], 1)?;
    let padded_mask = Tensor::f_cat(&[&boundary_mask, padding_mask, &boundary_mask], 1)?;

    let windows = padded_sequence
        .f_unfold(1, width, 1)?
        .f_permute([0, 1, 3, 2])?
        .f_reshape([batch_size * windows_per_sequence, width, embedding_dim])?;
    let padding_mask = padded_mask
        .f_unfold(1, width, 1)?
        .f_reshape([batch_size * windows_per_sequence, width])?;

    Ok(SlidingWindows {
        windows,
        padding_mask,
        windows_per_sequence,
    })
}

/// Cosine similarity between every token representation `(N, L, H)` and an already
/// normalized query vector `(N, H)`, returned as `(N, L)`.
pub fn cosine_to_query(
    token_representations: &Tensor,
    normalized_query: &Tensor,
) -> Result<Tensor, TchError> {
    l2_normalize(token_representations)?
        .f_matmul(&normalized_query.f_unsqueeze(-1)?)?
        .f_squeeze_dim(-1)
}

/// # Multi-granularity similarity engine
///
/// Represents every token by one unigram, two bigram (forward, backward) and three trigram
/// (forward, middle, backward) contextual vectors, all produced by the shared contextual
/// encoder, and compares each of them with the pooled query.
pub struct NGramSimilarities<'a> {
    encoder: &'a ContextualEncoder,
    pooling: &'a AttentionPooling,
    dropout: Dropout,
}

impl<'a> NGramSimilarities<'a> {
    pub fn new(
        encoder: &'a ContextualEncoder,
        pooling: &'a AttentionPooling,
        dropout: Dropout,
    ) -> NGramSimilarities<'a> {
        NGramSimilarities {
            encoder,
            pooling,
            dropout,
        }
    }

    /// Encodes every token on its own, `(N, L, E)` to `(N, L, H)`.
    pub fn unigram_hidden_states(&self, embeddings: &Tensor) -> Result<Tensor, TchError> {
        let (batch_size, seq_len, embedding_dim) = embeddings.size3()?;
        let unigrams = embeddings.f_reshape([batch_size * seq_len, 1, embedding_dim])?;
        self.encoder
            .forward(&unigrams)?
            .f_reshape([batch_size, seq_len, self.encoder.output_dim()])
    }

    /// Encodes and pools every window of `width` tokens, `(N, L, E)` to `(N, L + width - 1, H)`.
    ///
    /// Attention weights are computed on the dropout-perturbed encodings and applied to the
    /// clean ones.
    pub fn ngram_pooled_states(
        &self,
        embeddings: &Tensor,
        padding_mask: &Tensor,
        width: i64,
        train: bool,
    ) -> Result<Tensor, TchError> {
        let (batch_size, _, _) = embeddings.size3()?;
        let windows = sliding_windows(embeddings, padding_mask, width)?;

        let hidden_states = self.encoder.forward(&windows.windows)?;
        let perturbed_hidden_states = self.dropout.forward_t(&hidden_states, train)?;
        let attention_weights = self
            .pooling
            .attention_weights(&perturbed_hidden_states, Some(&windows.padding_mask))?;

        attention_weights.f_bmm(&hidden_states)?.f_reshape([
            batch_size,
            windows.windows_per_sequence,
            self.encoder.output_dim(),
        ])
    }

    /// Returns the six similarity channels `(N, L, 6)` in the order unigram, forward bigram,
    /// backward bigram, forward trigram, middle trigram, backward trigram.
    pub fn forward_t(
        &self,
        embeddings: &Tensor,
        padding_mask: &Tensor,
        normalized_query: &Tensor,
        train: bool,
    ) -> Result<Tensor, TchError> {
        let (_, seq_len, _) = embeddings.size3()?;

        let unigram_cosines =
            cosine_to_query(&self.unigram_hidden_states(embeddings)?, normalized_query)?;

        let bigram_cosines = cosine_to_query(
            &self.ngram_pooled_states(embeddings, padding_mask, 2, train)?,
            normalized_query,
        )?;
        let backward_bigram_cosines = bigram_cosines.f_narrow(1, 0, seq_len)?;
        let forward_bigram_cosines = bigram_cosines.f_narrow(1, 1, seq_len)?;

        let trigram_cosines = cosine_to_query(
            &self.ngram_pooled_states(embeddings, padding_mask, 3, train)?,
            normalized_query,
        )?;
        let backward_trigram_cosines = trigram_cosines.f_narrow(1, 0, seq_len)?;
        let middle_trigram_cosines = trigram_cosines.f_narrow(1, 1, seq_len)?;
        let forward_trigram_cosines = trigram_cosines.f_narrow(1, 2, seq_len)?;

        Tensor::f_stack(
            &[
                unigram_cosines,
                forward_bigram_cosines,
                backward_bigram_cosines,
                forward_trigram_cosines,
                middle_trigram_cosines,
                backward_trigram_cosines,
            ],
            -1,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::convert::TryFrom;
    use tch::{nn, Device};

    #[test]
    fn trigram_windows_are_aligned_to_positions() -> anyhow::Result<()> {
        let sequence = Tensor::from_slice(&[1f32, 2., 3., 4.]).view([1, 4, 1]);
        let padding_mask = Tensor::zeros([1, 4], (Kind::Float, Device::Cpu));

        let windows = sliding_windows(&sequence, &padding_mask, 3)?;

        assert_eq!(windows.windows_per_sequence, 6);
        let contents = Vec::<Vec<f32>>::try_from(&windows.windows.squeeze_dim(-1).contiguous())?;
        assert_eq!(
            contents,
            vec![
                vec![0., 0., 1.],
                vec![0., 1., 2.],
                vec![1., 2., 3.],
                vec![2., 3., 4.],
                vec![3., 4., 0.],
                vec![4., 0., 0.],
            ]
        );
        let mask = Vec::<Vec<f32>>::try_from(&windows.padding_mask.contiguous())?;
        assert_eq!(mask[0], vec![1., 1., 0.]);
        assert_eq!(mask[2], vec![0., 0., 0.]);
        assert_eq!(mask[5], vec![0., 1., 1.]);
        Ok(())
    }

    #[test]
    fn bigram_windows_keep_sequences_apart() -> anyhow::Result<()> {
        let sequence = Tensor::from_slice(&[1f32, 2., 3., 4.]).view([2, 2, 1]);
        let padding_mask = Tensor::zeros([2, 2], (Kind::Float, Device::Cpu));

        let windows = sliding_windows(&sequence, &padding_mask, 2)?;

        let contents = Vec::<Vec<f32>>::try_from(&windows.windows.squeeze_dim(-1).contiguous())?;
        assert_eq!(
            contents,
            vec![
                vec![0., 1.],
                vec![1., 2.],
                vec![2., 0.],
                vec![0., 3.],
                vec![3., 4.],
                vec![4., 0.],
            ]
        );
        Ok(())
    }

    #[test]
    fn normalized_vectors_have_unit_norm() -> anyhow::Result<()> {
        let input = Tensor::from_slice(&[3f32, 4., 0., 0., 0., 0.]).view([2, 3]);
        let normalized = l2_normalize(&input)?;
        let norms = normalized
            .square()
            .sum_dim_intlist([-1].as_slice(), false, Kind::Float);

        assert!(norms.allclose(&norms.ones_like(), 1e-5, 1e-5, false));
        assert_eq!(i64::try_from(normalized.isnan().sum(Kind::Int64))?, 0);
        Ok(())
    }

    #[test]
    fn six_channels_per_token() -> anyhow::Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let encoder = ContextualEncoder::new(vs.root() / "encoder", 3, 2, 1);
        let pooling = AttentionPooling::new(vs.root() / "pooling", 4, -1e30);
        let similarities = NGramSimilarities::new(&encoder, &pooling, Dropout::new(0.1));

        let embeddings = Tensor::rand([2, 5, 3], (Kind::Float, Device::Cpu));
        let padding_mask = Tensor::zeros([2, 5], (Kind::Float, Device::Cpu));
        let query = l2_normalize(&Tensor::rand([2, 4], (Kind::Float, Device::Cpu)))?;

        let channels = similarities.forward_t(&embeddings, &padding_mask, &query, false)?;

        assert_eq!(channels.size(), vec![2, 5, 6]);
        let max_abs = f64::try_from(channels.abs().max())?;
        assert!(max_abs <= 1.0 + 1e-5);
        Ok(())
    }

    #[test]
    fn each_channel_sees_its_own_neighbourhood() -> anyhow::Result<()> {
        tch::manual_seed(7);
        let vs = nn::VarStore::new(Device::Cpu);
        let encoder = ContextualEncoder::new(vs.root() / "encoder", 3, 2, 1);
        let pooling = AttentionPooling::new(vs.root() / "pooling", 4, -1e30);
        let similarities = NGramSimilarities::new(&encoder, &pooling, Dropout::new(0.0));

        let seq_len = 7;
        let changed_position = 3;
        let baseline = Tensor::zeros([1, seq_len, 3], (Kind::Float, Device::Cpu));
        let token = Tensor::from_slice(&[1.5f32, -2., 3.]).view([1, 1, 3]);
        let modified = Tensor::cat(
            &[
                baseline.narrow(1, 0, changed_position),
                token,
                baseline.narrow(1, changed_position + 1, seq_len - changed_position - 1),
            ],
            1,
        );
        let padding_mask = Tensor::zeros([1, seq_len], (Kind::Float, Device::Cpu));
        let query = l2_normalize(&Tensor::rand([1, 4], (Kind::Float, Device::Cpu)))?;

        let reference = similarities.forward_t(&baseline, &padding_mask, &query, false)?;
        let channels = similarities.forward_t(&modified, &padding_mask, &query, false)?;
        let differences =
            Vec::<Vec<f32>>::try_from(&(channels - reference).abs().squeeze_dim(0).contiguous())?;

        // Positions whose score depends on the modified token, per channel:
        // unigram, forward bigram, backward bigram, forward, middle and backward trigram.
        let expected: [&[usize]; 6] = [
            &[3],
            &[2, 3],
            &[3, 4],
            &[1, 2, 3],
            &[2, 3, 4],
            &[3, 4, 5],
        ];
        for (channel, positions) in expected.iter().enumerate() {
            let changed: Vec<usize> = (0..seq_len as usize)
                .filter(|&position| differences[position][channel] > 1e-6)
                .collect();
            assert_eq!(changed.as_slice(), *positions, "channel {}", channel);
        }
        Ok(())
    }
}
