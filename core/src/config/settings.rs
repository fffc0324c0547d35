use super::BrokerConfig;
use crate::{RelaymqError, Result};
use config::{Config, Environment};

impl BrokerConfig {
    /// Loads `RELAYMQ_*` environment overrides on top of the defaults,
    /// e.g. `RELAYMQ_PORT=7000` or `RELAYMQ_DATA_DIR=/var/lib/relaymq`.
    pub fn from_env() -> Result<Self> {
        let settings = Config::builder()
            .add_source(Environment::with_prefix("RELAYMQ").try_parsing(true))
            .build()
            .map_err(|e| RelaymqError::Config(e.to_string()))?;

        let config = settings
            .try_deserialize::<BrokerConfig>()
            .map_err(|e| RelaymqError::Config(e.to_string()))?;

        config.validate().map_err(RelaymqError::Config)?;
        Ok(config)
    }
}
