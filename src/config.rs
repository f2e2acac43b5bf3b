//! Configuration loading and validation.
//!
//! Loads the service configuration from `./config.toml` (or
//! `$TRIAGE_CONFIG_PATH`). Environment variables override file values; file
//! values override defaults. Every setting has a documented default so the
//! service can run from environment variables alone.
//!
//! Precedence: env vars > config file > defaults.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// Placeholder shown instead of secret values.
const REDACTED: &str = "[REDACTED]";

/// Accepted `auto.offset.reset` policies.
const OFFSET_RESET_POLICIES: &[&str] = &[
    "earliest",
    "latest",
    "smallest",
    "largest",
    "beginning",
    "end",
    "error",
];

// ── Top-level config ────────────────────────────────────────────

/// Top-level service configuration.
///
/// Constructed once at startup and shared by `Arc` with every component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service identity.
    pub service: ServiceConfig,
    /// Log level, format and optional file output.
    pub logging: LoggingConfig,
    /// Kafka consumer settings.
    pub kafka: KafkaConfig,
    /// Language model settings.
    pub model: ModelConfig,
    /// Backstage catalog and notification settings.
    pub backstage: BackstageConfig,
    /// Status endpoint settings.
    pub health: HealthConfig,
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$TRIAGE_CONFIG_PATH` or `./config.toml`.
    /// If the file does not exist, defaults are used.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load configuration using a custom env resolver (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let path = config_path_with(&env);
        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file found, using defaults");
                Config::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "failed to read config file {}: {e}",
                    path.display()
                ))
            }
        };
        config.apply_overrides(env);
        Ok(config)
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has wrongly typed fields.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability. Invalid values for numeric
    /// or enumerated settings are ignored with a warning.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Service.
        set_string(&env, "SERVICE_NAME", &mut self.service.name);
        set_string(&env, "SERVICE_DESCRIPTION", &mut self.service.description);

        // Logging.
        set_string(&env, "LOG_LEVEL", &mut self.logging.level);
        set_parsed(&env, "LOG_FORMAT", &mut self.logging.format);
        if let Some(v) = env("LOG_DIR") {
            self.logging.dir = if v.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(v))
            };
        }

        // Kafka.
        set_string(&env, "KAFKA_BROKER", &mut self.kafka.broker);
        set_string(
            &env,
            "KAFKA_SECURITY_PROTOCOL",
            &mut self.kafka.security_protocol,
        );
        set_string(&env, "KAFKA_SASL_MECHANISM", &mut self.kafka.sasl_mechanism);
        set_string(&env, "KAFKA_SASL_USERNAME", &mut self.kafka.sasl_username);
        set_string(&env, "KAFKA_SASL_PASSWORD", &mut self.kafka.sasl_password);
        set_string(&env, "CONSUMER_GROUP", &mut self.kafka.consumer_group);
        set_string(&env, "MONITORED_TOPIC", &mut self.kafka.monitored_topic);
        set_string(
            &env,
            "KAFKA_AUTO_OFFSET_RESET",
            &mut self.kafka.auto_offset_reset,
        );
        set_parsed(
            &env,
            "KAFKA_AUTO_COMMIT_INTERVAL_MS",
            &mut self.kafka.auto_commit_interval_ms,
        );

        // Model.
        set_string(&env, "AI_MODEL", &mut self.model.name);
        set_string(&env, "INFERENCE_SERVER_URL", &mut self.model.inference_url);
        set_string(&env, "AI_API_KEY", &mut self.model.api_key);
        set_parsed(&env, "AI_TEMPERATURE", &mut self.model.temperature);
        set_parsed(&env, "AI_MAX_TOKENS", &mut self.model.max_tokens);
        set_parsed(&env, "AI_MAX_ITERATIONS", &mut self.model.max_iterations);
        set_parsed(&env, "AI_TOOL_MODE", &mut self.model.tool_mode);
        set_parsed(
            &env,
            "AI_NATIVE_TOOL_CALLING",
            &mut self.model.native_tool_calling,
        );
        set_parsed(
            &env,
            "AI_REQUEST_TIMEOUT_SECS",
            &mut self.model.request_timeout_secs,
        );

        // Backstage.
        set_string(&env, "BACKSTAGE_API_URL", &mut self.backstage.api_url);
        set_string(&env, "BACKSTAGE_TOKEN", &mut self.backstage.token);
        set_string(
            &env,
            "NOTIFICATION_TITLE",
            &mut self.backstage.notification_title,
        );
        set_string(
            &env,
            "NOTIFICATION_RECIPIENT_ENTITY",
            &mut self.backstage.recipient_entity,
        );
        set_parsed(&env, "BACKSTAGE_TIMEOUT_SECS", &mut self.backstage.timeout_secs);

        // Status endpoint.
        set_string(&env, "HEALTH_CHECK_HOST", &mut self.health.host);
        set_parsed(&env, "HEALTH_CHECK_PORT", &mut self.health.port);
    }

    /// Check the configuration for values the service cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.kafka.monitored_topic.trim().is_empty() {
            anyhow::bail!("MONITORED_TOPIC must not be empty");
        }
        if self.kafka.broker.trim().is_empty() {
            anyhow::bail!("KAFKA_BROKER must not be empty");
        }
        if self.kafka.consumer_group.trim().is_empty() {
            anyhow::bail!("CONSUMER_GROUP must not be empty");
        }
        let reset = self.kafka.auto_offset_reset.to_ascii_lowercase();
        if !OFFSET_RESET_POLICIES.contains(&reset.as_str()) {
            anyhow::bail!(
                "KAFKA_AUTO_OFFSET_RESET '{}' is not one of {}",
                self.kafka.auto_offset_reset,
                OFFSET_RESET_POLICIES.join(", ")
            );
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            anyhow::bail!(
                "AI_TEMPERATURE must be between 0 and 2, got {}",
                self.model.temperature
            );
        }
        if self.model.max_tokens == 0 {
            anyhow::bail!("AI_MAX_TOKENS must be greater than zero");
        }
        if self.model.max_iterations == 0 {
            anyhow::bail!("AI_MAX_ITERATIONS must be greater than zero");
        }
        Url::parse(&self.model.inference_url)
            .with_context(|| format!("invalid INFERENCE_SERVER_URL '{}'", self.model.inference_url))?;
        Url::parse(&self.backstage.api_url)
            .with_context(|| format!("invalid BACKSTAGE_API_URL '{}'", self.backstage.api_url))?;
        if !is_entity_ref(&self.backstage.recipient_entity) {
            anyhow::bail!(
                "NOTIFICATION_RECIPIENT_ENTITY '{}' is not an entity reference (kind:namespace/name)",
                self.backstage.recipient_entity
            );
        }
        if self.backstage.notification_title.trim().is_empty() {
            anyhow::bail!("NOTIFICATION_TITLE must not be empty");
        }
        self.health.socket_addr()?;
        Ok(())
    }

    /// A copy with every secret replaced by a placeholder, safe to print.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        redact(&mut copy.kafka.sasl_password);
        redact(&mut copy.backstage.token);
        redact(&mut copy.model.api_key);
        copy
    }
}

/// Resolve config file path using a custom env resolver.
///
/// Checks `$TRIAGE_CONFIG_PATH` first, then `./config.toml`.
fn config_path_with(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("TRIAGE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

fn set_string(env: &impl Fn(&str) -> Option<String>, key: &str, target: &mut String) {
    if let Some(v) = env(key) {
        *target = v;
    }
}

fn set_parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    if let Some(v) = env(key) {
        match v.trim().parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(var = key, value = %v, "ignoring invalid env override"),
        }
    }
}

fn redact(value: &mut String) {
    if !value.is_empty() {
        *value = REDACTED.to_owned();
    }
}

fn secret_marker(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        REDACTED
    }
}

/// Whether `s` looks like a Backstage entity reference.
///
/// Accepts `kind:namespace/name` and the short `kind:name` form.
pub fn is_entity_ref(s: &str) -> bool {
    match Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*:([^/\s:]+/)?[^/\s:]+$") {
        Ok(re) => re.is_match(s),
        Err(_) => false,
    }
}

// ── Service ─────────────────────────────────────────────────────

/// Service identity, reported by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "message-analysis".to_owned(),
            description: "message analysis".to_owned(),
        }
    }
}

// ── Logging ─────────────────────────────────────────────────────

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable console output.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(anyhow::anyhow!("unknown log format: {other}")),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub level: String,
    /// Console output format.
    pub format: LogFormat,
    /// Directory for daily-rotated JSON log files, if any.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Json,
            dir: None,
        }
    }
}

// ── Kafka ───────────────────────────────────────────────────────

/// Kafka consumer settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Bootstrap broker address (`host:port`, comma separated for several).
    pub broker: String,
    /// `security.protocol` (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: String,
    /// `sasl.mechanism`, used with SASL protocols only.
    pub sasl_mechanism: String,
    /// SASL username.
    pub sasl_username: String,
    /// SASL password.
    pub sasl_password: String,
    /// Consumer group id.
    pub consumer_group: String,
    /// The single topic to monitor.
    pub monitored_topic: String,
    /// `auto.offset.reset` policy for a group without committed offsets.
    pub auto_offset_reset: String,
    /// Interval between automatic offset commits.
    pub auto_commit_interval_ms: u64,
}

impl KafkaConfig {
    /// Whether the security protocol requires SASL credentials.
    pub fn uses_sasl(&self) -> bool {
        self.security_protocol
            .to_ascii_uppercase()
            .starts_with("SASL")
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            broker: "kafka-kafka-bootstrap.kafka.svc.cluster.local:9092".to_owned(),
            security_protocol: "SASL_SSL".to_owned(),
            sasl_mechanism: "SCRAM-SHA-512".to_owned(),
            sasl_username: String::new(),
            sasl_password: String::new(),
            consumer_group: "message-analysis".to_owned(),
            monitored_topic: "review".to_owned(),
            auto_offset_reset: "latest".to_owned(),
            auto_commit_interval_ms: 1000,
        }
    }
}

impl fmt::Debug for KafkaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaConfig")
            .field("broker", &self.broker)
            .field("security_protocol", &self.security_protocol)
            .field("sasl_mechanism", &self.sasl_mechanism)
            .field("sasl_username", &self.sasl_username)
            .field("sasl_password", &secret_marker(&self.sasl_password))
            .field("consumer_group", &self.consumer_group)
            .field("monitored_topic", &self.monitored_topic)
            .field("auto_offset_reset", &self.auto_offset_reset)
            .field("auto_commit_interval_ms", &self.auto_commit_interval_ms)
            .finish()
    }
}

// ── Model ───────────────────────────────────────────────────────

/// How the tool catalog is presented to the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolMode {
    /// Tools are described in the prompt; the model answers in the
    /// Thought/Action/Observation text protocol.
    #[default]
    React,
    /// Tools are sent as function definitions; calls arrive as `tool_calls`.
    Native,
}

impl ToolMode {
    /// Lowercase name used in config and status output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::React => "react",
            Self::Native => "native",
        }
    }
}

impl FromStr for ToolMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "react" => Ok(Self::React),
            "native" => Ok(Self::Native),
            other => Err(anyhow::anyhow!("unknown tool mode: {other}")),
        }
    }
}

/// Language model settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier sent with every completion request.
    pub name: String,
    /// Base URL of the OpenAI-compatible inference server.
    pub inference_url: String,
    /// Bearer key for the inference server.
    pub api_key: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
    /// Upper bound on reasoning rounds per message.
    pub max_iterations: u32,
    /// Tool presentation mode.
    pub tool_mode: ToolMode,
    /// Whether the inference server parses native tool calls. When it does
    /// not, `native` mode runs the text protocol instead.
    pub native_tool_calling: bool,
    /// Timeout for a single completion request.
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "granite-8b-lab-v1-version-1".to_owned(),
            inference_url:
                "http://granite-8b-lab-v1-version-1-predictor.granite.svc.cluster.local:8080"
                    .to_owned(),
            api_key: "placeholder-key-for-rhoai-without-auth".to_owned(),
            temperature: 0.3,
            max_tokens: 500,
            max_iterations: 5,
            tool_mode: ToolMode::React,
            native_tool_calling: true,
            request_timeout_secs: 30,
        }
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("name", &self.name)
            .field("inference_url", &self.inference_url)
            .field("api_key", &secret_marker(&self.api_key))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_iterations", &self.max_iterations)
            .field("tool_mode", &self.tool_mode)
            .field("native_tool_calling", &self.native_tool_calling)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

// ── Backstage ───────────────────────────────────────────────────

/// Backstage catalog and notification settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackstageConfig {
    /// API base URL (the catalog and notification paths are appended).
    pub api_url: String,
    /// Bearer token for both APIs.
    pub token: String,
    /// Title used when the service reports an analysis the model did not send.
    pub notification_title: String,
    /// Entity reference that receives every notification.
    pub recipient_entity: String,
    /// Timeout for a single catalog or notification request.
    pub timeout_secs: u64,
}

impl Default for BackstageConfig {
    fn default() -> Self {
        Self {
            api_url: "http://backstage-developer-hub.ai-rhdh.svc.cluster.local/api".to_owned(),
            token: String::new(),
            notification_title: "Message Routing Failure Detected".to_owned(),
            recipient_entity: "user:default/btison".to_owned(),
            timeout_secs: 30,
        }
    }
}

impl fmt::Debug for BackstageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackstageConfig")
            .field("api_url", &self.api_url)
            .field("token", &secret_marker(&self.token))
            .field("notification_title", &self.notification_title)
            .field("recipient_entity", &self.recipient_entity)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── Status endpoint ─────────────────────────────────────────────

/// Status endpoint bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl HealthConfig {
    /// Resolve the bind address.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid status endpoint address {}:{}", self.host, self.port))
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
        }
    }
}
