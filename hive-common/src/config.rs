// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Loads a configuration section by merging, in order of precedence:
/// compiled-in defaults, an optional TOML config file and `HIVE_*`
/// environment variable overrides (`__` separates nesting levels).
pub struct ConfigLoader<T: ConfigLoaderConfig> {
    pub config_file_name: PathBuf,
    phantom_data: PhantomData<T>,
}

pub trait ConfigLoaderConfig: Default + Serialize + DeserializeOwned {}

impl<T: Default + Serialize + DeserializeOwned> ConfigLoaderConfig for T {}

impl<T: ConfigLoaderConfig> ConfigLoader<T> {
    pub fn new(config_file_name: &Path) -> ConfigLoader<T> {
        ConfigLoader {
            config_file_name: config_file_name.to_path_buf(),
            phantom_data: PhantomData,
        }
    }

    pub fn figment(&self) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(T::default()))
            .merge(Toml::file(self.config_file_name.clone()))
            .merge(Env::prefixed("HIVE_").split("__"))
    }

    pub fn load(&self) -> figment::Result<T> {
        self.figment().extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::path::Path;
    use test_r::test;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Section {
        name: String,
        count: usize,
    }

    impl Default for Section {
        fn default() -> Self {
            Self {
                name: "default".to_string(),
                count: 4,
            }
        }
    }

    #[test]
    fn defaults_apply_without_a_config_file() {
        let loader: ConfigLoader<Section> = ConfigLoader::new(Path::new("does-not-exist.toml"));
        let loaded = loader.load().unwrap();
        assert_eq!(loaded, Section::default());
    }
}
