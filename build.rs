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

// Test and bench binaries link libtorch dynamically: record its location as an rpath and keep
// the torch libraries as needed entries so CUDA kernels registered at load time are found.
fn main() {
    println!("cargo:rerun-if-env-changed=LIBTORCH");
    println!("cargo:rerun-if-env-changed=DEP_TCH_LIBTORCH_LIB");

    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "linux" && target_os != "windows" {
        return;
    }
    if let Some(libtorch_lib) = std::env::var_os("DEP_TCH_LIBTORCH_LIB") {
        println!(
            "cargo:rustc-link-arg=-Wl,-rpath={}",
            libtorch_lib.to_string_lossy()
        );
    }
    for link_arg in ["-Wl,--no-as-needed", "-Wl,--copy-dt-needed-entries", "-ltorch"] {
        println!("cargo:rustc-link-arg={}", link_arg);
    }
}
