use std::time::Duration;

use leep_protocol::Version;

use crate::acquire::AcqConfig;
use crate::regmap::Token;

#[derive(Debug, Clone)]
pub struct Config {
    /// How long to wait for the reply to a single datagram
    pub timeout: Duration,
    pub version: Version,
    /// Instance tokens prepended to the instance of every call
    pub instance: Vec<Token>,
    pub acquisition: AcqConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            version: Version::default(),
            instance: Vec::new(),
            acquisition: AcqConfig::default(),
        }
    }
}

/// Builder to create a [Config]
///
/// # Example
///
/// ```
/// use leep_client::config::Builder;
/// use leep_protocol::Version;
/// use std::time::Duration;
///
/// let config = Builder::new()
///     .timeout(Duration::from_millis(250))
///     .version(Version::V1)
///     .instance([0])
///     .build();
/// assert_eq!(config.instance.len(), 1);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set the time to wait for each reply
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the anti-spoof scheme of the device
    pub fn version(mut self, version: Version) -> Self {
        self.config.version = version;
        self
    }

    /// Set the instance prefix applied to every register name lookup
    pub fn instance<T: Into<Token>>(mut self, instance: impl IntoIterator<Item = T>) -> Self {
        self.config.instance = instance.into_iter().map(Into::into).collect();
        self
    }

    /// Set the acquisition register names and constants
    pub fn acquisition(mut self, acquisition: AcqConfig) -> Self {
        self.config.acquisition = acquisition;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
