use std::path::Path;

use serde::de::DeserializeOwned;

use crate::environment::Environment;

/// Directory containing configuration files relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Base configuration file loaded for all environments.
const BASE_CONFIG_FILE: &str = "base.yaml";

/// Prefix for environment variable configuration overrides.
const ENV_PREFIX: &str = "APP";

/// Separator between environment variable prefix and key segments.
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested configuration keys in environment variables.
///
/// Example: `APP_DESTINATION__HOST` sets the `destination.host` field.
const ENV_SEPARATOR: &str = "__";

/// Separator for list elements in environment variables.
const LIST_SEPARATOR: &str = ",";

/// Trait defining the keys that should be parsed as lists in a given [`Config`]
/// implementation.
pub trait Config {
    /// Keys parsed as `,`-separated lists when read from environment variables.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Loads hierarchical configuration from YAML files and environment variables.
///
/// Sources, later ones overriding earlier ones:
/// 1. `configuration/base.yaml`
/// 2. `configuration/{environment}.yaml` (optional)
/// 3. Environment variables prefixed with `APP`, nested with `__`
///
/// Environment values are parsed into numbers and booleans where possible, so
/// `APP_DESTINATION__PORT=5432` yields an integer port.
pub fn load_config<T>() -> Result<T, config::ConfigError>
where
    T: Config + DeserializeOwned,
{
    let base_path = std::env::current_dir().map_err(|err| {
        config::ConfigError::Message(format!("failed to determine the current directory: {err}"))
    })?;
    let configuration_directory = base_path.join(CONFIGURATION_DIR);

    let environment =
        Environment::load().map_err(|err| config::ConfigError::Message(err.to_string()))?;
    let environment_filename = format!("{environment}.yaml");

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join(BASE_CONFIG_FILE),
        ))
        .add_source(
            config::File::from(configuration_directory.join(environment_filename)).required(false),
        )
        .add_source(environment_source::<T>())
        .build()?;

    settings.try_deserialize::<T>()
}

/// Loads configuration from one explicit file, still honoring `APP_` environment
/// overrides.
///
/// The format is inferred from the file extension (`.yaml`, `.yml`, `.json`, ...).
pub fn load_config_from_file<T>(path: &Path) -> Result<T, config::ConfigError>
where
    T: Config + DeserializeOwned,
{
    let settings = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(environment_source::<T>())
        .build()?;

    settings.try_deserialize::<T>()
}

fn environment_source<T: Config>() -> config::Environment {
    let mut environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true);

    if !<T as Config>::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source.list_separator(LIST_SEPARATOR);

        for key in <T as Config>::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    environment_source
}
