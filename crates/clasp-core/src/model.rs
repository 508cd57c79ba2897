// Configuration model
// Typed accessors over the layered `config::Config` used by every Clasp component

use std::path::Path;

use config::{Config, Environment};

use clasp_common::{
    ClaspError, ClusterNode, DEFAULT_LOCK_SERVICE_NAME, DEFAULT_PARTITION_NAME, local_ip,
};

pub const NODE_NAME_PROPERTY: &str = "clasp.node.name";
pub const NODE_PORT_PROPERTY: &str = "clasp.node.port";
pub const PARTITION_NAME_PROPERTY: &str = "clasp.partition.name";
pub const PARTITION_REQUEST_TIMEOUT_PROPERTY: &str = "clasp.partition.request-timeout";
pub const LOCK_SERVICE_NAME_PROPERTY: &str = "clasp.lock.service-name";
pub const LOCK_POLICY_PROPERTY: &str = "clasp.lock.policy";
pub const LOCK_TIMEOUT_PROPERTY: &str = "clasp.lock.timeout";

pub const DEFAULT_NODE_PORT: u16 = 7800;

/// Application configuration loaded from an optional file and `CLASP__*` environment variables
///
/// `CLASP__LOCK__POLICY=globally-exclusive` overrides `clasp.lock.policy`.
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Create a new configuration from a Config instance
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Load configuration from `path` (if given) overlaid with environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ClaspError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("clasp")
                .keep_prefix(true)
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| ClaspError::ConfigError(e.to_string()))?;

        Ok(Self { config })
    }

    // ===================== Node Configuration =====================

    /// Get the local node port (default: 7800)
    pub fn node_port(&self) -> u16 {
        self.config
            .get_int(NODE_PORT_PROPERTY)
            .map(|p| p as u16)
            .unwrap_or(DEFAULT_NODE_PORT)
    }

    /// Get the local node name (default: `<local ip>:<port>`)
    pub fn node_name(&self) -> String {
        self.config
            .get_string(NODE_NAME_PROPERTY)
            .unwrap_or_else(|_| format!("{}:{}", local_ip(), self.node_port()))
    }

    /// Get the local node identity, validating the configured name
    pub fn local_node(&self) -> Result<ClusterNode, ClaspError> {
        ClusterNode::parse(&self.node_name())
    }

    // ===================== Partition Configuration =====================

    pub fn partition_name(&self) -> String {
        self.config
            .get_string(PARTITION_NAME_PROPERTY)
            .unwrap_or_else(|_| DEFAULT_PARTITION_NAME.to_string())
    }

    /// Get the per-member RPC timeout in milliseconds (default: 5000ms)
    pub fn partition_request_timeout_ms(&self) -> Result<u64, ClaspError> {
        self.millis(PARTITION_REQUEST_TIMEOUT_PROPERTY, 5000)
    }

    // ===================== Cluster Lock Configuration =====================

    pub fn lock_service_name(&self) -> String {
        self.config
            .get_string(LOCK_SERVICE_NAME_PROPERTY)
            .unwrap_or_else(|_| DEFAULT_LOCK_SERVICE_NAME.to_string())
    }

    /// Get the lock policy name (default: "non-globally-exclusive")
    pub fn lock_policy(&self) -> String {
        self.config
            .get_string(LOCK_POLICY_PROPERTY)
            .unwrap_or_else(|_| "non-globally-exclusive".to_string())
    }

    /// Get the default lock acquisition timeout in milliseconds (default: 30000ms)
    pub fn lock_timeout_ms(&self) -> Result<u64, ClaspError> {
        self.millis(LOCK_TIMEOUT_PROPERTY, 30000)
    }

    /// Read a duration in milliseconds; negative values are rejected
    fn millis(&self, key: &str, default: u64) -> Result<u64, ClaspError> {
        match self.config.get_int(key) {
            Ok(value) => u64::try_from(value).map_err(|_| {
                ClaspError::IllegalArgument(format!("'{}' must not be negative, got {}", key, value))
            }),
            Err(_) => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let configuration = Configuration::default();

        assert_eq!(configuration.node_port(), DEFAULT_NODE_PORT);
        assert!(configuration.node_name().ends_with(":7800"));
        assert_eq!(configuration.partition_name(), DEFAULT_PARTITION_NAME);
        assert_eq!(configuration.partition_request_timeout_ms().unwrap(), 5000);
        assert_eq!(configuration.lock_service_name(), DEFAULT_LOCK_SERVICE_NAME);
        assert_eq!(configuration.lock_policy(), "non-globally-exclusive");
        assert_eq!(configuration.lock_timeout_ms().unwrap(), 30000);
    }

    #[test]
    fn test_overrides() {
        let config = Config::builder()
            .set_default(NODE_NAME_PROPERTY, "node-7")
            .unwrap()
            .set_default(LOCK_POLICY_PROPERTY, "globally-exclusive")
            .unwrap()
            .set_default(PARTITION_REQUEST_TIMEOUT_PROPERTY, 250)
            .unwrap()
            .build()
            .unwrap();
        let configuration = Configuration::from_config(config);

        assert_eq!(configuration.local_node().unwrap(), ClusterNode::new("node-7"));
        assert_eq!(configuration.lock_policy(), "globally-exclusive");
        assert_eq!(configuration.partition_request_timeout_ms().unwrap(), 250);
    }

    #[test]
    fn test_negative_timeouts_are_rejected() {
        let config = Config::builder()
            .set_default(LOCK_TIMEOUT_PROPERTY, -1)
            .unwrap()
            .set_default(PARTITION_REQUEST_TIMEOUT_PROPERTY, -250)
            .unwrap()
            .build()
            .unwrap();
        let configuration = Configuration::from_config(config);

        assert!(matches!(
            configuration.lock_timeout_ms(),
            Err(ClaspError::IllegalArgument(_))
        ));
        assert!(matches!(
            configuration.partition_request_timeout_ms(),
            Err(ClaspError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_invalid_node_name() {
        let config = Config::builder()
            .set_default(NODE_NAME_PROPERTY, "not a node")
            .unwrap()
            .build()
            .unwrap();
        let configuration = Configuration::from_config(config);

        assert!(configuration.local_node().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[clasp.lock]\nservice-name = \"SingletonLock\"\ntimeout = 1500"
        )
        .unwrap();

        let configuration = Configuration::load(Some(file.path())).unwrap();

        assert_eq!(configuration.lock_service_name(), "SingletonLock");
        assert_eq!(configuration.lock_timeout_ms().unwrap(), 1500);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = Configuration::load(Some(Path::new("/nonexistent/clasp.toml")));
        assert!(matches!(result, Err(ClaspError::ConfigError(_))));
    }
}
