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

use tch::{TchError, Tensor};

/// Element-wise dropout driven by the `train` flag of the forward pass.
///
/// In evaluation mode, or with a zero probability, the input is returned as a shallow clone so
/// that two evaluation passes over the same parameters produce identical tensors.
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
    probability: f64,
}

impl Dropout {
    pub fn new(probability: f64) -> Dropout {
        Dropout { probability }
    }

    fn is_active(&self, train: bool) -> bool {
        train && self.probability > 0.0
    }

    pub fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor, TchError> {
        if self.is_active(train) {
            input.f_dropout(self.probability, true)
        } else {
            Ok(input.shallow_clone())
        }
    }
}
