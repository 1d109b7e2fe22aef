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

use tch::{nn, TchError, Tensor};

/// Applies `layer` to `input`, returning libtorch failures instead of panicking.
pub(crate) fn linear_forward(layer: &nn::Linear, input: &Tensor) -> Result<Tensor, TchError> {
    input.f_linear(&layer.ws, layer.bs.as_ref())
}

#[cfg(test)]
mod test {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn matches_module_application() -> anyhow::Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let layer = nn::linear(vs.root(), 4, 3, Default::default());
        let input = Tensor::rand([2, 5, 4], (Kind::Float, Device::Cpu));

        let output = linear_forward(&layer, &input)?;

        assert!(output.allclose(&input.apply(&layer), 1e-6, 1e-6, false));
        assert!(linear_forward(&layer, &Tensor::rand([2, 3], (Kind::Float, Device::Cpu))).is_err());
        Ok(())
    }
}
