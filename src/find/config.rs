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

use crate::{Config, FindModuleError};
use serde::{Deserialize, Serialize};

/// Only trigram-wide sliding windows are implemented.
pub const SUPPORTED_SLIDING_WINDOW_SIZE: i64 = 3;

fn default_padding_idx() -> i64 {
    0
}

fn default_n_layers() -> i64 {
    2
}

fn default_encoding_dropout() -> f64 {
    0.1
}

fn default_mlp_dropout() -> f64 {
    0.1
}

fn default_sliding_window_size() -> i64 {
    SUPPORTED_SLIDING_WINDOW_SIZE
}

fn default_padding_score() -> f64 {
    -1e30
}

fn default_cosine_hidden_dim() -> i64 {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// # Find Module configuration
/// Defines the Find Module architecture (embedding and encoding widths, encoder depth, dropout
/// probabilities and the split of the vocabulary into tuneable and frozen vectors).
pub struct FindModuleConfig {
    /// Width of the pretrained token vectors
    pub embedding_dim: i64,
    /// Width of each direction of the contextual encoder (the encoding width is twice this value)
    pub hidden_dim: i64,
    /// Token id used for padding
    #[serde(default = "default_padding_idx")]
    pub padding_idx: i64,
    /// Number of leading vocabulary entries (ids `[0, k)`) updated during training
    pub tuneable_vector_count: i64,
    /// Number of stacked layers in the contextual encoder
    #[serde(default = "default_n_layers")]
    pub n_layers: i64,
    /// Dropout applied to contextual encodings
    #[serde(default = "default_encoding_dropout")]
    pub encoding_dropout: f64,
    /// Dropout applied before each linear layer of the similarity scorer
    #[serde(default = "default_mlp_dropout")]
    pub mlp_dropout: f64,
    /// Widest n-gram window used for token representations
    #[serde(default = "default_sliding_window_size")]
    pub sliding_window_size: i64,
    /// Attention score added to padding positions before normalization
    #[serde(default = "default_padding_score")]
    pub padding_score: f64,
    /// Width of each direction of the recurrent pass over similarity channels
    #[serde(default = "default_cosine_hidden_dim")]
    pub cosine_hidden_dim: i64,
}

impl Config for FindModuleConfig {}

impl FindModuleConfig {
    /// Creates a configuration with default values for every optional field.
    pub fn new(embedding_dim: i64, hidden_dim: i64, tuneable_vector_count: i64) -> Self {
        FindModuleConfig {
            embedding_dim,
            hidden_dim,
            padding_idx: default_padding_idx(),
            tuneable_vector_count,
            n_layers: default_n_layers(),
            encoding_dropout: default_encoding_dropout(),
            mlp_dropout: default_mlp_dropout(),
            sliding_window_size: default_sliding_window_size(),
            padding_score: default_padding_score(),
            cosine_hidden_dim: default_cosine_hidden_dim(),
        }
    }

    /// Width of the bidirectional encodings.
    pub fn encoding_dim(&self) -> i64 {
        2 * self.hidden_dim
    }

    /// Number of similarity channels per token: 1 + 2 + ... + window size.
    pub fn number_of_cosines(&self) -> i64 {
        (1..=self.sliding_window_size).sum()
    }

    /// Checks the configuration before a model is built from it.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidConfigurationError` when the sliding window size is not 3, when a width
    /// or layer count is not positive, when a dropout probability lies outside `[0, 1)`, when
    /// `cosine_hidden_dim` is below 4 (the scorer narrows it down to a quarter), or when
    /// `tuneable_vector_count` is below 1.
    pub fn validate(&self) -> Result<(), FindModuleError> {
        if self.sliding_window_size != SUPPORTED_SLIDING_WINDOW_SIZE {
            return Err(FindModuleError::InvalidConfigurationError(format!(
                "sliding window size {} is not supported, only {} is implemented",
                self.sliding_window_size, SUPPORTED_SLIDING_WINDOW_SIZE
            )));
        }
        for (name, value) in [
            ("embedding_dim", self.embedding_dim),
            ("hidden_dim", self.hidden_dim),
            ("n_layers", self.n_layers),
            ("cosine_hidden_dim", self.cosine_hidden_dim),
        ] {
            if value <= 0 {
                return Err(FindModuleError::InvalidConfigurationError(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("encoding_dropout", self.encoding_dropout),
            ("mlp_dropout", self.mlp_dropout),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(FindModuleError::InvalidConfigurationError(format!(
                    "{} must be in [0, 1), got {}",
                    name, value
                )));
            }
        }
        if self.cosine_hidden_dim < 4 {
            return Err(FindModuleError::InvalidConfigurationError(format!(
                "cosine_hidden_dim must be at least 4, got {}",
                self.cosine_hidden_dim
            )));
        }
        if self.tuneable_vector_count < 1 {
            return Err(FindModuleError::InvalidConfigurationError(format!(
                "tuneable_vector_count must be at least 1 (id 0 is always tuneable), got {}",
                self.tuneable_vector_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_unsupported_window_size() {
        let mut config = FindModuleConfig::new(8, 4, 2);
        config.sliding_window_size = 2;
        assert!(matches!(
            config.validate(),
            Err(FindModuleError::InvalidConfigurationError(_))
        ));
        config.sliding_window_size = 3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        let valid = FindModuleConfig::new(8, 4, 2);
        let mut invalid_configs = Vec::new();

        let mut config = valid.clone();
        config.hidden_dim = 0;
        invalid_configs.push(config);
        let mut config = valid.clone();
        config.n_layers = -1;
        invalid_configs.push(config);
        let mut config = valid.clone();
        config.encoding_dropout = 1.0;
        invalid_configs.push(config);
        let mut config = valid.clone();
        config.mlp_dropout = -0.1;
        invalid_configs.push(config);
        let mut config = valid.clone();
        config.cosine_hidden_dim = 3;
        invalid_configs.push(config);
        let mut config = valid.clone();
        config.tuneable_vector_count = 0;
        invalid_configs.push(config);

        assert!(valid.validate().is_ok());
        for config in invalid_configs {
            assert!(matches!(
                config.validate(),
                Err(FindModuleError::InvalidConfigurationError(_))
            ));
        }
    }

    #[test]
    fn defaults_are_filled_from_json() {
        let config: FindModuleConfig = serde_json::from_str(
            r#"{"embedding_dim": 300, "hidden_dim": 150, "tuneable_vector_count": 4}"#,
        )
        .unwrap();
        assert_eq!(config, FindModuleConfig::new(300, 150, 4));
        assert_eq!(config.encoding_dim(), 300);
        assert_eq!(config.number_of_cosines(), 6);
        assert_eq!(config.padding_score, -1e30);
    }
}
