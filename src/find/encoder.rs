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
use tch::{nn, TchError, Tensor};

/// # Bidirectional recurrent encoder
///
/// Turns a batch of vector sequences `(N, L, input_dim)` into contextual encodings
/// `(N, L, 2 * hidden_dim)`, forward and backward states concatenated. The initial state is
/// zero on every call, no state is carried between batches.
///
/// The same encoder is applied to whole sequences and to length-1, length-2 and length-3
/// windows reshaped into the batch dimension.
///
/// Parameters are registered under `lstm` with the libtorch names
/// (`weight_ih_l{layer}{_reverse}`, `weight_hh_l..`, `bias_ih_l..`, `bias_hh_l..`) and
/// passed to the fused LSTM kernel in its flat-weight order.
pub struct ContextualEncoder {
    flat_weights: Vec<Tensor>,
    hidden_dim: i64,
    num_layers: i64,
}

impl ContextualEncoder {
    pub fn new<'p, P>(p: P, input_dim: i64, hidden_dim: i64, num_layers: i64) -> ContextualEncoder
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow() / "lstm";
        let gate_dim = 4 * hidden_dim;

        let mut flat_weights = Vec::with_capacity(8 * num_layers.max(0) as usize);
        for layer in 0..num_layers {
            let layer_input_dim = if layer == 0 { input_dim } else { 2 * hidden_dim };
            for suffix in ["", "_reverse"] {
                flat_weights.push(p.kaiming_uniform(
                    &format!("weight_ih_l{}{}", layer, suffix),
                    &[gate_dim, layer_input_dim],
                ));
                flat_weights.push(p.kaiming_uniform(
                    &format!("weight_hh_l{}{}", layer, suffix),
                    &[gate_dim, hidden_dim],
                ));
                flat_weights.push(p.zeros(&format!("bias_ih_l{}{}", layer, suffix), &[gate_dim]));
                flat_weights.push(p.zeros(&format!("bias_hh_l{}{}", layer, suffix), &[gate_dim]));
            }
        }

        ContextualEncoder {
            flat_weights,
            hidden_dim,
            num_layers,
        }
    }

    pub fn output_dim(&self) -> i64 {
        2 * self.hidden_dim
    }

    /// Encodes `(N, L, input_dim)` into `(N, L, 2 * hidden_dim)`.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor, TchError> {
        let (batch_size, _, _) = input.size3()?;
        let state_shape = [2 * self.num_layers, batch_size, self.hidden_dim];
        let hidden_state = Tensor::f_zeros(state_shape, (input.kind(), input.device()))?;
        let cell_state = Tensor::f_zeros(state_shape, (input.kind(), input.device()))?;

        let (output, _, _) = input.f_lstm(
            &[hidden_state, cell_state],
            &self.flat_weights,
            true,
            self.num_layers,
            0.0,
            true,
            true,
            true,
        )?;
        Ok(output)
    }
}
