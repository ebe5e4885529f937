//! Layered configuration loading
//!
//! Priority, highest first: environment variables, YAML file, serde defaults.

use std::path::Path;

use errors::{ServiceError, ServiceResult};
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

/// Separator between nested keys in environment variable names
pub const ENV_NESTING_SEPARATOR: &str = "__";

/// Build the provider stack without extracting
///
/// `env_prefix` is matched case-sensitively and stripped, e.g. with prefix
/// `GENSRV_` the variable `GENSRV_MQTT__HOST` sets `mqtt.host`.
pub fn figment_for(path: Option<&Path>, env_prefix: &str) -> Figment {
    let mut figment = Figment::new();
    if let Some(path) = path {
        figment = figment.merge(Yaml::file(path));
    }
    figment.merge(Env::prefixed(env_prefix).split(ENV_NESTING_SEPARATOR))
}

/// Load a config struct from an optional YAML file plus prefixed environment
///
/// A path that is given but does not exist is an error; pass `None` to run
/// on defaults and environment only.
pub fn load_layered<T: DeserializeOwned>(path: Option<&Path>, env_prefix: &str) -> ServiceResult<T> {
    if let Some(path) = path {
        if !path.exists() {
            return Err(errors::config_error!(
                "config file not found: {}",
                path.display()
            ));
        }
        info!("Loading configuration from: {}", path.display());
    } else {
        debug!("No config file given, using defaults and {}* environment", env_prefix);
    }

    figment_for(path, env_prefix)
        .extract()
        .map_err(|e| ServiceError::Configuration(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        #[serde(default)]
        inner: Inner,
    }

    #[derive(Debug, Default, Deserialize)]
    struct Inner {
        #[serde(default)]
        port: u16,
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name: bridge\ninner:\n  port: 1883").unwrap();

        let sample: Sample = load_layered(Some(file.path()), "CFGLOADER_FILE_").unwrap();
        assert_eq!(sample.name, "bridge");
        assert_eq!(sample.inner.port, 1883);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name: bridge\ninner:\n  port: 1883").unwrap();

        std::env::set_var("CFGLOADER_ENV_INNER__PORT", "8883");
        let sample: Sample = load_layered(Some(file.path()), "CFGLOADER_ENV_").unwrap();
        std::env::remove_var("CFGLOADER_ENV_INNER__PORT");

        assert_eq!(sample.inner.port, 8883);
    }

    #[test]
    fn test_missing_file_is_error() {
        let result: ServiceResult<Sample> =
            load_layered(Some(Path::new("/nonexistent/bridge.yaml")), "CFGLOADER_MISSING_");
        assert!(matches!(result, Err(ServiceError::Configuration(_))));
    }
}
