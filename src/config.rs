//! Facilities for reading runtime configuration values
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// Command driver configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    /// The device or image to read
    #[serde(default = "Config::default_device")]
    pub device: String,
    /// Where extracted files go when no destination is given
    #[serde(default = "Config::default_output_path")]
    pub output_path: String,
}

impl Config {
    /// Loads the configuration from `udf.toml` and the `UDF__` environment
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let config: Self = Figment::new()
            .merge(Toml::file("udf.toml"))
            .merge(Env::prefixed("UDF__").split("__"))
            .extract()
            .map_err(|err| {
                error!("Failed to validate configuration: {}", err);
                err
            })?;
        if config.device.is_empty() {
            return Err("Value of `device` is empty".into());
        }
        debug!("{config:?}");
        Ok(config)
    }

    /// Returns a default device value
    fn default_device() -> String {
        "/dev/dvd".to_string()
    }

    /// Returns a default output path value
    fn default_output_path() -> String {
        ".".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config: Config = Figment::new().extract().unwrap();
        assert_eq!(config.device, "/dev/dvd");
        assert_eq!(config.output_path, ".");
    }

    #[test]
    fn environment_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("udf.toml", "device = \"image.iso\"\noutput_path = \"/tmp\"")?;
            jail.set_env("UDF__OUTPUT_PATH", "out");
            let config = Config::new().map_err(|e| e.to_string())?;
            assert_eq!(config.device, "image.iso");
            assert_eq!(config.output_path, "out");
            Ok(())
        });
    }
}
