//! Service startup helpers: banner, development environment, config path

use std::path::PathBuf;

use tracing::info;

/// Service metadata for startup
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Service name (e.g. "gensrv")
    pub name: String,
    /// Version of the service binary
    pub version: String,
    pub description: String,
}

impl ServiceInfo {
    /// Create service info; pass `env!("CARGO_PKG_VERSION")` from the binary crate
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }

    /// Environment variable naming an explicit config file, e.g. `GENSRV_CONFIG`
    pub fn config_env_var(&self) -> String {
        format!("{}_CONFIG", self.name.to_uppercase())
    }
}

/// Print the startup banner
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = r#"
  ██████╗ ███████╗███╗   ██╗███████╗██████╗ ██╗   ██╗
 ██╔════╝ ██╔════╝████╗  ██║██╔════╝██╔══██╗██║   ██║
 ██║  ███╗█████╗  ██╔██╗ ██║███████╗██████╔╝██║   ██║
 ██║   ██║██╔══╝  ██║╚██╗██║╚════██║██╔══██╗╚██╗ ██╔╝
 ╚██████╔╝███████╗██║ ╚████║███████║██║  ██║ ╚████╔╝
  ╚═════╝ ╚══════╝╚═╝  ╚═══╝╚══════╝╚═╝  ╚═╝  ╚═══╝
    "#;

    info!("{}", banner);
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!("");
}

/// Load variables from `.env` in debug builds
///
/// Variables already present in the environment are left untouched. Release
/// builds expect the environment to be set externally.
pub fn load_development_env() {
    #[cfg(debug_assertions)]
    {
        if let Ok(content) = std::fs::read_to_string(".env") {
            for (key, value) in parse_env_lines(&content) {
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
    }
}

fn parse_env_lines(content: &str) -> Vec<(&str, &str)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim().trim_matches('"')))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Resolve the config file: CLI flag > `<NAME>_CONFIG` > `config/<name>.yaml`
pub fn get_config_path(service: &ServiceInfo, cli_path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_path {
        return path;
    }

    if let Ok(path) = std::env::var(service.config_env_var()) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    PathBuf::from(format!("config/{}.yaml", service.name))
}
