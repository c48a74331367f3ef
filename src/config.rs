//! Bus-wide configuration surface
//!
//! One struct per configuration section (pipeline, transport, discovery,
//! health monitor, DLQ, flow controller), composed into [`ConduitConfig`]
//! with `development`/`production`/`testing` presets and cross-field
//! validation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::correlator::dlq::DlqConfig;
use crate::flow_control::FlowControllerConfig;
use crate::registry::dispatcher::ErrorStrategy;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::health_monitor::HealthThresholds;

/// Errors raised while validating or (de)serializing a [`ConduitConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field's value is out of range or inconsistent with another field
    #[error("invalid configuration: {field} - {reason}")]
    Validation {
        /// The offending field, in `snake_case`
        field: String,
        /// Human-readable explanation
        reason: String,
    },
    /// Reading or writing the configuration file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file was not valid JSON for this shape
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Pipeline configuration knobs, per spec's enumeration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct PipelineConfig {
    /// Whether the behavior pipeline runs at all
    pub is_enabled: bool,
    /// Whether handlers are invoked off the calling task
    pub async_execution: bool,
    /// Maximum number of concurrently executing pipelines
    pub max_concurrency: usize,
    /// Per-dispatch timeout
    pub timeout: Duration,
    /// Maximum retry attempts a failed dispatch gets
    pub max_retries: u32,
    /// Delay between retry attempts
    pub retry_delay: Duration,
    /// Whether event fan-out preserves handler registration order
    pub preserve_order: bool,
    /// Whether a single event-handler failure aborts the remaining handlers
    pub fail_fast: bool,
    /// Whether the caching behavior is active
    pub cache_enabled: bool,
    /// What the dispatcher does with unhandled failures
    pub error_strategy: ErrorStrategy,
    /// Default per-operation timeout when none is set on the message context
    pub default_timeout: Duration,
    /// Default TTL for cached responses
    pub default_cache_duration: Duration,
    /// Whether dispatch metrics are recorded
    pub metrics_enabled: bool,
    /// Whether dispatch spans are recorded
    pub tracing_enabled: bool,
    /// Maximum number of entries the caching behavior retains
    pub max_cache_size: usize,
    /// Whether the validation behavior runs
    pub validation_enabled: bool,
    /// Whether exhausted resilience routes to the DLQ instead of surfacing to the caller
    pub dead_letter_enabled: bool,
    /// Circuit breaker tripped around `send_command` dispatch
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            is_enabled: true,
            async_execution: true,
            max_concurrency: num_cpus::get() * 4,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            preserve_order: false,
            fail_fast: false,
            cache_enabled: false,
            error_strategy: ErrorStrategy::ContinueOnError,
            default_timeout: Duration::from_secs(30),
            default_cache_duration: Duration::from_secs(60),
            metrics_enabled: true,
            tracing_enabled: true,
            max_cache_size: 10_000,
            validation_enabled: true,
            dead_letter_enabled: true,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Connection-level transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct TransportConnectionConfig {
    /// Time budget for establishing a connection
    pub connect_timeout: Duration,
    /// Time budget for a single read
    pub read_timeout: Duration,
    /// Time budget for a single write
    pub write_timeout: Duration,
    /// Interval between keep-alive probes
    pub keep_alive_interval: Duration,
    /// Maximum reconnect attempts
    pub max_retries: u32,
    /// Delay between reconnect attempts
    pub retry_delay: Duration,
    /// Whether a dropped connection reconnects automatically
    pub auto_reconnect: bool,
    /// Delay before an automatic reconnect attempt
    pub reconnect_delay: Duration,
    /// Maximum simultaneous connections to one destination
    pub max_concurrent_connections: usize,
    /// Connection pool size, where a pool is used
    pub pool_size: usize,
    /// Idle duration after which a pooled connection is retired
    pub idle_timeout: Duration,
}

impl Default for TransportConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            keep_alive_interval: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(2),
            max_concurrent_connections: 16,
            pool_size: 8,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Wire-protocol transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportProtocolConfig {
    /// Protocol version this binding prefers to negotiate
    pub preferred_version: String,
    /// Protocol versions this binding can speak
    pub supported_versions: Vec<String>,
    /// Largest message the transport will accept
    pub max_message_size: usize,
    /// Whether payload compression is negotiated
    pub compression_enabled: bool,
    /// Minimum payload size before compression is applied
    pub compression_threshold: usize,
    /// Headers sent with every connection handshake
    pub headers: std::collections::HashMap<String, String>,
}

impl Default for TransportProtocolConfig {
    fn default() -> Self {
        Self {
            preferred_version: "1.0".to_string(),
            supported_versions: vec!["1.0".to_string()],
            max_message_size: 10 * 1024 * 1024,
            compression_enabled: false,
            compression_threshold: 8192,
            headers: std::collections::HashMap::new(),
        }
    }
}

/// Transport-level security settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct TransportSecurityConfig {
    /// Whether TLS is required
    pub tls_enabled: bool,
    /// Whether the peer hostname is verified against the certificate
    pub verify_hostname: bool,
    /// Whether the peer certificate chain is verified
    pub verify_certificate: bool,
    /// Path to this endpoint's client certificate
    pub certificate_path: Option<PathBuf>,
    /// Password protecting `certificate_path`
    pub certificate_password: Option<String>,
    /// Path to the trusted CA bundle
    pub trusted_certificate_path: Option<PathBuf>,
    /// Lowest TLS version accepted
    pub minimum_tls_version: String,
    /// Whether the peer must present a client certificate
    pub require_client_certificate: bool,
    /// Username for transports that authenticate with credentials
    pub username: Option<String>,
    /// Password for transports that authenticate with credentials
    pub password: Option<String>,
    /// Bearer token for transports that authenticate with a token
    pub token: Option<String>,
}

impl Default for TransportSecurityConfig {
    fn default() -> Self {
        Self {
            tls_enabled: false,
            verify_hostname: true,
            verify_certificate: true,
            certificate_path: None,
            certificate_password: None,
            trusted_certificate_path: None,
            minimum_tls_version: "1.2".to_string(),
            require_client_certificate: false,
            username: None,
            password: None,
            token: None,
        }
    }
}

/// Transport performance-tuning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct TransportPerformanceConfig {
    /// OS send-buffer size hint
    pub send_buffer_size: usize,
    /// OS receive-buffer size hint
    pub receive_buffer_size: usize,
    /// Whether Nagle's algorithm is disabled
    pub no_delay: bool,
    /// Whether TCP keep-alive is enabled
    pub keep_alive: bool,
    /// Maximum unacknowledged messages a subscriber may hold
    pub prefetch_count: u32,
    /// Maximum messages grouped into one batch send
    pub batch_size: usize,
    /// Maximum time a partial batch waits before flushing
    pub batch_timeout: Duration,
    /// Maximum concurrent in-flight operations
    pub max_concurrent_operations: usize,
    /// Whether outbound batching is enabled
    pub batching_enabled: bool,
    /// Whether request pipelining is enabled
    pub pipelining_enabled: bool,
}

impl Default for TransportPerformanceConfig {
    fn default() -> Self {
        Self {
            send_buffer_size: 64 * 1024,
            receive_buffer_size: 64 * 1024,
            no_delay: true,
            keep_alive: true,
            prefetch_count: 100,
            batch_size: 50,
            batch_timeout: Duration::from_millis(50),
            max_concurrent_operations: 256,
            batching_enabled: false,
            pipelining_enabled: false,
        }
    }
}

/// One transport binding's full configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Binding kind, e.g. `in-memory`
    pub transport_type: String,
    /// Operator-facing name for this binding
    pub name: String,
    /// Whether this binding is active
    pub enabled: bool,
    /// Connection-level settings
    pub connection: TransportConnectionConfig,
    /// Wire-protocol settings
    pub protocol: TransportProtocolConfig,
    /// Security settings
    pub security: TransportSecurityConfig,
    /// Performance-tuning settings
    pub performance: TransportPerformanceConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            transport_type: "in-memory".to_string(),
            name: "default".to_string(),
            enabled: true,
            connection: TransportConnectionConfig::default(),
            protocol: TransportProtocolConfig::default(),
            security: TransportSecurityConfig::default(),
            performance: TransportPerformanceConfig::default(),
        }
    }
}

/// Component discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Directories scanned by `DirectoryScanStrategy`
    pub plugin_directories: Vec<PathBuf>,
    /// Package/module prefixes scanned by `InProcessScanStrategy`
    pub scan_packages: Vec<String>,
    /// Glob patterns a manifest file must match to be considered
    pub include_patterns: Vec<String>,
    /// Glob patterns that exclude an otherwise-matching manifest file
    pub exclude_patterns: Vec<String>,
    /// Whether a single strategy's error aborts discovery or is skipped
    pub ignore_errors: bool,
    /// Whether `FileWatchStrategy` is active
    pub enable_hot_reload: bool,
    /// Debounce window the file watcher coalesces bursts within
    pub hot_reload_debounce: Duration,
    /// Whether discovered components default to `IsolationLevel::Plugin`
    pub enable_isolation: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            plugin_directories: Vec::new(),
            scan_packages: Vec::new(),
            include_patterns: vec!["*.json".to_string()],
            exclude_patterns: Vec::new(),
            ignore_errors: true,
            enable_hot_reload: false,
            hot_reload_debounce: Duration::from_millis(500),
            enable_isolation: true,
        }
    }
}

/// Health monitor configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthMonitorConfig {
    /// How often the scheduled probe runs
    pub health_check_interval: Duration,
    /// Window `AnalyzeErrors` considers when feeding the probe
    pub analysis_time_window: Duration,
    /// Error rate above which the score is penalized
    pub error_rate_threshold: f64,
    /// Critical-error rate above which the score is penalized
    pub critical_error_threshold: f64,
    /// Absolute critical-error count that forces `Critical` status regardless of score
    pub max_critical_errors: u32,
    /// Score thresholds for `Unhealthy`/`Degraded`/`Healthy`
    pub thresholds: HealthThresholds,
    /// Slowest acceptable average dispatch time before the performance term degrades
    pub max_acceptable_response_time: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(60),
            analysis_time_window: Duration::from_secs(300),
            error_rate_threshold: 0.1,
            critical_error_threshold: 0.05,
            max_critical_errors: 10,
            thresholds: HealthThresholds::default(),
            max_acceptable_response_time: Duration::from_secs(1),
        }
    }
}

/// Top-level bus configuration, composing every subsystem's section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConduitConfig {
    /// Behavior pipeline and dispatcher settings
    pub pipeline: PipelineConfig,
    /// Transport bindings this bus wires at start
    pub transports: Vec<TransportConfig>,
    /// Component discovery settings
    pub discovery: DiscoveryConfig,
    /// Health monitor settings
    pub health_monitor: HealthMonitorConfig,
    /// Dead-letter queue settings
    pub dlq: DlqConfig,
    /// Flow controller (admission) settings
    pub flow_control: FlowControllerConfig,
}

impl ConduitConfig {
    /// Settings favoring observability and fast feedback over throughput
    #[must_use]
    pub fn development() -> Self {
        Self {
            pipeline: PipelineConfig {
                max_concurrency: 4,
                ..PipelineConfig::default()
            },
            transports: vec![TransportConfig::default()],
            discovery: DiscoveryConfig {
                enable_hot_reload: true,
                ..DiscoveryConfig::default()
            },
            health_monitor: HealthMonitorConfig {
                health_check_interval: Duration::from_secs(10),
                ..HealthMonitorConfig::default()
            },
            dlq: DlqConfig {
                max_capacity: 1_000,
                ..DlqConfig::default()
            },
            flow_control: FlowControllerConfig {
                max_concurrent_messages: 16,
                ..FlowControllerConfig::default()
            },
        }
    }

    /// Settings favoring throughput and resilience over observability overhead
    #[must_use]
    pub fn production() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            transports: vec![TransportConfig::default()],
            discovery: DiscoveryConfig {
                enable_hot_reload: false,
                ..DiscoveryConfig::default()
            },
            health_monitor: HealthMonitorConfig::default(),
            dlq: DlqConfig::default(),
            flow_control: FlowControllerConfig::default(),
        }
    }

    /// Minimal-resource settings for test suites
    #[must_use]
    pub fn testing() -> Self {
        Self {
            pipeline: PipelineConfig {
                max_concurrency: 1,
                metrics_enabled: false,
                tracing_enabled: false,
                ..PipelineConfig::default()
            },
            transports: vec![TransportConfig::default()],
            discovery: DiscoveryConfig::default(),
            health_monitor: HealthMonitorConfig {
                health_check_interval: Duration::from_millis(100),
                ..HealthMonitorConfig::default()
            },
            dlq: DlqConfig {
                max_capacity: 100,
                retention_period: Duration::from_secs(60),
            },
            flow_control: FlowControllerConfig {
                max_concurrent_messages: 2,
                max_queue_size: 100,
                ..FlowControllerConfig::default()
            },
        }
    }

    /// Checks cross-field consistency; individual field ranges are enforced
    /// by their own types (`nutype` newtypes, `Duration`) at construction
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.max_concurrency == 0 {
            return Err(ConfigError::Validation {
                field: "pipeline.max_concurrency".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.pipeline.retry_delay >= self.pipeline.timeout {
            return Err(ConfigError::Validation {
                field: "pipeline.retry_delay".to_string(),
                reason: "must be less than pipeline.timeout".to_string(),
            });
        }
        if self.flow_control.max_concurrent_messages == 0 {
            return Err(ConfigError::Validation {
                field: "flow_control.max_concurrent_messages".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.dlq.max_capacity == 0 {
            return Err(ConfigError::Validation {
                field: "dlq.max_capacity".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Serializes to pretty JSON and writes to `path`
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reads and validates a configuration from `path`
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ConduitConfig {
    fn default() -> Self {
        Self::development()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_config_validates() {
        assert!(ConduitConfig::development().validate().is_ok());
    }

    #[test]
    fn production_config_validates() {
        assert!(ConduitConfig::production().validate().is_ok());
    }

    #[test]
    fn testing_config_validates() {
        assert!(ConduitConfig::testing().validate().is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = ConduitConfig::testing();
        config.pipeline.max_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let config = ConduitConfig::development();
        let json = serde_json::to_string(&config).unwrap();
        let restored: ConduitConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.pipeline.max_concurrency, config.pipeline.max_concurrency);
    }

    #[test]
    fn file_round_trip() {
        let config = ConduitConfig::testing();
        let file = tempfile::NamedTempFile::new().unwrap();
        config.save_to_file(file.path()).unwrap();
        let loaded = ConduitConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded.dlq.max_capacity, config.dlq.max_capacity);
    }
}
