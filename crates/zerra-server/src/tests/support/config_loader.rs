//! Configuration loaders for bootstrap scenarios.

use zerra_config::{Config, ConfigError, ConfigLayer, HttpEndpoint};

use crate::bootstrap::ConfigLoader;

/// Configuration binding an ephemeral loopback port.
#[must_use]
pub fn loopback_config() -> Config {
    Config {
        listen: HttpEndpoint::new("127.0.0.1", 0),
        ..Config::default()
    }
}

/// Loader whose merged layer names an unsupported listen scheme.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, ConfigError> {
        ConfigLayer {
            listen: Some("ftp://nowhere:21".to_owned()),
            ..ConfigLayer::default()
        }
        .validate()
    }
}
