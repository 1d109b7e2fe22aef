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
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// # Utility to deserialize JSON config files
pub trait Config
where
    for<'de> Self: Deserialize<'de> + Serialize,
{
    /// Loads a `Config` object from a JSON file. The format is expected to be aligned with the
    /// field names of the implementing struct, missing optional fields taking their serde default.
    ///
    /// # Arguments
    ///
    /// * `path` - `Path` to the configuration JSON file.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use find_module::find::FindModuleConfig;
    /// use find_module::Config;
    /// use std::path::Path;
    ///
    /// let config_path = Path::new("path/to/config.json");
    /// let config = FindModuleConfig::from_file(config_path).unwrap();
    /// ```
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, FindModuleError> {
        let f = File::open(path)?;
        let br = BufReader::new(f);
        Ok(serde_json::from_reader(br)?)
    }

    /// Writes the configuration to a JSON file, overwriting it if it exists.
    fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), FindModuleError> {
        let f = File::create(path)?;
        let bw = BufWriter::new(f);
        serde_json::to_writer_pretty(bw, self)?;
        Ok(())
    }
}
