//! Configuration for the upload client and the receiver.

use crate::errors::{ConfigurationError, OnboardingError, OnboardingResult};
use crate::resilience::RetryConfig;
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Raw bytes per chunk before base64 expansion (300 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 300 * 1024;

/// Default wait for the submission lock.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(30);

/// Default idle time after which an upload session expires.
pub const DEFAULT_SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default period of the session sweeper.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default request body ceiling of the receiver.
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Default sheet receiving onboarding rows.
pub const DEFAULT_SHEET_NAME: &str = "Onboarding";

/// Default id of the container holding per-application folders.
pub const DEFAULT_ROOT_CONTAINER: &str = "onboarding-root";

/// Environment variable names.
pub mod env {
    /// Receiver bind address.
    pub const BIND_ADDR: &str = "ONBOARDING_BIND_ADDR";
    /// Public base URL used in share links.
    pub const PUBLIC_URL: &str = "ONBOARDING_PUBLIC_URL";
    /// Storage backend (`memory` or `filesystem:<dir>`).
    pub const STORAGE: &str = "ONBOARDING_STORAGE";
    /// Root container id.
    pub const ROOT_FOLDER_ID: &str = "ONBOARDING_ROOT_FOLDER_ID";
    /// Sheet name.
    pub const SHEET_NAME: &str = "ONBOARDING_SHEET_NAME";
    /// Notification recipient.
    pub const RECIPIENT_EMAIL: &str = "ONBOARDING_RECIPIENT_EMAIL";
    /// SMTP relay host.
    pub const SMTP_HOST: &str = "ONBOARDING_SMTP_HOST";
    /// SMTP relay port.
    pub const SMTP_PORT: &str = "ONBOARDING_SMTP_PORT";
    /// Envelope sender.
    pub const SMTP_SENDER: &str = "ONBOARDING_SMTP_SENDER";
    /// SMTP username.
    pub const SMTP_USERNAME: &str = "ONBOARDING_SMTP_USERNAME";
    /// SMTP password.
    pub const SMTP_PASSWORD: &str = "ONBOARDING_SMTP_PASSWORD";
    /// Submission lock wait in seconds.
    pub const LOCK_WAIT_SECS: &str = "ONBOARDING_LOCK_WAIT_SECS";
    /// Session idle timeout in seconds.
    pub const SESSION_IDLE_SECS: &str = "ONBOARDING_SESSION_IDLE_SECS";
    /// Sweeper period in seconds.
    pub const SWEEP_INTERVAL_SECS: &str = "ONBOARDING_SWEEP_INTERVAL_SECS";
    /// Request body ceiling in bytes.
    pub const MAX_BODY_BYTES: &str = "ONBOARDING_MAX_BODY_BYTES";
    /// Sales managers as `id=Name,id=Name`.
    pub const SALES_MANAGERS: &str = "ONBOARDING_SALES_MANAGERS";
    /// Browser origins allowed to call the receiver, comma-separated.
    pub const CORS_ORIGINS: &str = "ONBOARDING_CORS_ORIGINS";
    /// Receiver endpoint used by the client.
    pub const ENDPOINT: &str = "ONBOARDING_ENDPOINT";
    /// Client chunk size in bytes.
    pub const CHUNK_SIZE: &str = "ONBOARDING_CHUNK_SIZE";
    /// Attempts per chunk.
    pub const MAX_ATTEMPTS: &str = "ONBOARDING_MAX_ATTEMPTS";
    /// Delay between attempts in milliseconds.
    pub const RETRY_DELAY_MS: &str = "ONBOARDING_RETRY_DELAY_MS";
    /// Client request timeout in seconds.
    pub const TIMEOUT_SECS: &str = "ONBOARDING_TIMEOUT_SECS";
    /// Files uploaded concurrently.
    pub const FILE_CONCURRENCY: &str = "ONBOARDING_FILE_CONCURRENCY";
}

/// Where the receiver keeps files and rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process memory; lost on restart.
    Memory,
    /// Directory tree rooted at the given path.
    Filesystem(PathBuf),
}

impl FromStr for StorageBackend {
    type Err = OnboardingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("memory") {
            return Ok(StorageBackend::Memory);
        }
        match s.split_once(':') {
            Some((kind, dir)) if kind.eq_ignore_ascii_case("filesystem") && !dir.is_empty() => {
                Ok(StorageBackend::Filesystem(PathBuf::from(dir)))
            }
            _ => Err(OnboardingError::configuration(format!(
                "Unknown storage backend '{}', expected 'memory' or 'filesystem:<dir>'",
                s
            ))),
        }
    }
}

/// SMTP relay settings.
#[derive(Clone)]
pub struct SmtpConfig {
    /// Relay host.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// Envelope and header sender.
    pub sender: String,
    /// Optional AUTH PLAIN username.
    pub username: Option<String>,
    /// Optional AUTH PLAIN password.
    pub password: Option<SecretString>,
    /// Timeout applied to connect and to every command.
    pub timeout: Duration,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("sender", &self.sender)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Configuration of the receiver service.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Address the HTTP server binds to.
    pub bind_addr: SocketAddr,
    /// Base URL prefixed to share links.
    pub public_base_url: Url,
    /// Storage backend.
    pub storage: StorageBackend,
    /// Container that receives one folder per application.
    pub root_container_id: String,
    /// Sheet receiving onboarding rows.
    pub sheet_name: String,
    /// Notification recipient; no mail is sent when unset.
    pub recipient: Option<String>,
    /// SMTP relay; notifications are only logged when unset.
    pub smtp: Option<SmtpConfig>,
    /// Bounded wait for the submission lock.
    pub lock_wait: Duration,
    /// Idle time after which an upload session expires.
    pub session_idle_timeout: Duration,
    /// Period of the session sweeper.
    pub sweep_interval: Duration,
    /// Request body ceiling in bytes.
    pub max_body_bytes: usize,
    /// Sales manager id to display name.
    pub sales_managers: BTreeMap<String, String>,
    /// Origins allowed to read replies from a browser; any origin when empty.
    pub cors_origins: Vec<String>,
}

impl ReceiverConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ReceiverConfigBuilder {
        ReceiverConfigBuilder::new()
    }

    /// Creates a configuration from environment variables.
    ///
    /// Every variable in [`env`] is optional; unset values keep their defaults.
    pub fn from_env() -> OnboardingResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> OnboardingResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = ReceiverConfigBuilder::new();

        if let Some(addr) = lookup(env::BIND_ADDR) {
            builder = builder.bind_addr(parse_setting::<SocketAddr>(env::BIND_ADDR, &addr)?);
        }
        if let Some(url) = lookup(env::PUBLIC_URL) {
            builder = builder.public_base_url(url);
        }
        if let Some(storage) = lookup(env::STORAGE) {
            builder = builder.storage(storage.parse()?);
        }
        if let Some(root) = lookup(env::ROOT_FOLDER_ID) {
            builder = builder.root_container_id(root);
        }
        if let Some(sheet) = lookup(env::SHEET_NAME) {
            builder = builder.sheet_name(sheet);
        }
        if let Some(recipient) = lookup(env::RECIPIENT_EMAIL).filter(|r| !r.trim().is_empty()) {
            builder = builder.recipient(recipient);
        }
        if let Some(host) = lookup(env::SMTP_HOST).filter(|h| !h.trim().is_empty()) {
            let port = match lookup(env::SMTP_PORT) {
                Some(raw) => parse_setting::<u16>(env::SMTP_PORT, &raw)?,
                None => 25,
            };
            let sender = lookup(env::SMTP_SENDER).ok_or_else(|| {
                OnboardingError::Configuration(ConfigurationError::MissingSetting(
                    env::SMTP_SENDER.to_string(),
                ))
            })?;
            builder = builder.smtp(SmtpConfig {
                host,
                port,
                sender,
                username: lookup(env::SMTP_USERNAME),
                password: lookup(env::SMTP_PASSWORD).map(SecretString::new),
                timeout: Duration::from_secs(30),
            });
        }
        if let Some(raw) = lookup(env::LOCK_WAIT_SECS) {
            builder = builder.lock_wait(Duration::from_secs(parse_setting(
                env::LOCK_WAIT_SECS,
                &raw,
            )?));
        }
        if let Some(raw) = lookup(env::SESSION_IDLE_SECS) {
            builder = builder.session_idle_timeout(Duration::from_secs(parse_setting(
                env::SESSION_IDLE_SECS,
                &raw,
            )?));
        }
        if let Some(raw) = lookup(env::SWEEP_INTERVAL_SECS) {
            builder = builder.sweep_interval(Duration::from_secs(parse_setting(
                env::SWEEP_INTERVAL_SECS,
                &raw,
            )?));
        }
        if let Some(raw) = lookup(env::MAX_BODY_BYTES) {
            builder = builder.max_body_bytes(parse_setting(env::MAX_BODY_BYTES, &raw)?);
        }
        if let Some(raw) = lookup(env::SALES_MANAGERS) {
            builder = builder.sales_managers(parse_sales_managers(&raw)?);
        }
        if let Some(raw) = lookup(env::CORS_ORIGINS) {
            for origin in raw.split(',').map(str::trim).filter(|o| !o.is_empty()) {
                builder = builder.cors_origin(origin);
            }
        }

        builder.build()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> OnboardingResult<()> {
        check_http_url("Public base URL", &self.public_base_url)?;

        if self.root_container_id.trim().is_empty() {
            return Err(OnboardingError::configuration(
                "Root container id must not be empty",
            ));
        }
        if self.sheet_name.trim().is_empty() {
            return Err(OnboardingError::configuration("Sheet name must not be empty"));
        }
        if self.session_idle_timeout.is_zero() || self.sweep_interval.is_zero() {
            return Err(OnboardingError::configuration(
                "Session idle timeout and sweep interval must be positive",
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(OnboardingError::configuration(
                "Max body size must be positive",
            ));
        }
        if let Some(smtp) = &self.smtp {
            if smtp.host.trim().is_empty() || smtp.sender.trim().is_empty() {
                return Err(OnboardingError::configuration(
                    "SMTP host and sender must not be empty",
                ));
            }
        }
        for origin in &self.cors_origins {
            check_origin(origin)?;
        }

        Ok(())
    }

    /// Base of share links, without a trailing slash.
    pub fn link_base(&self) -> &str {
        self.public_base_url.as_str().trim_end_matches('/')
    }

    /// Share link of a stored file.
    pub fn share_url(&self, file_id: &str) -> String {
        crate::storage::share_link(self.link_base(), file_id)
    }
}

/// Builder for ReceiverConfig.
pub struct ReceiverConfigBuilder {
    bind_addr: SocketAddr,
    public_base_url: Option<String>,
    storage: StorageBackend,
    root_container_id: String,
    sheet_name: String,
    recipient: Option<String>,
    smtp: Option<SmtpConfig>,
    lock_wait: Duration,
    session_idle_timeout: Duration,
    sweep_interval: Duration,
    max_body_bytes: usize,
    sales_managers: BTreeMap<String, String>,
    cors_origins: Vec<String>,
}

impl ReceiverConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            public_base_url: None,
            storage: StorageBackend::Memory,
            root_container_id: DEFAULT_ROOT_CONTAINER.to_string(),
            sheet_name: DEFAULT_SHEET_NAME.to_string(),
            recipient: None,
            smtp: None,
            lock_wait: DEFAULT_LOCK_WAIT,
            session_idle_timeout: DEFAULT_SESSION_IDLE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            sales_managers: BTreeMap::new(),
            cors_origins: Vec::new(),
        }
    }

    /// Sets the bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Sets the public base URL. Defaults to `http://{bind_addr}`.
    pub fn public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = Some(url.into());
        self
    }

    /// Sets the storage backend.
    pub fn storage(mut self, storage: StorageBackend) -> Self {
        self.storage = storage;
        self
    }

    /// Sets the root container id.
    pub fn root_container_id(mut self, id: impl Into<String>) -> Self {
        self.root_container_id = id.into();
        self
    }

    /// Sets the sheet name.
    pub fn sheet_name(mut self, name: impl Into<String>) -> Self {
        self.sheet_name = name.into();
        self
    }

    /// Sets the notification recipient.
    pub fn recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    /// Sets the SMTP relay.
    pub fn smtp(mut self, smtp: SmtpConfig) -> Self {
        self.smtp = Some(smtp);
        self
    }

    /// Sets the submission lock wait.
    pub fn lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Sets the upload session idle timeout.
    pub fn session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout = timeout;
        self
    }

    /// Sets the sweeper period.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the request body ceiling.
    pub fn max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    /// Adds one sales manager.
    pub fn sales_manager(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.sales_managers.insert(id.into(), name.into());
        self
    }

    /// Replaces the sales manager directory.
    pub fn sales_managers(mut self, managers: BTreeMap<String, String>) -> Self {
        self.sales_managers = managers;
        self
    }

    /// Allows a browser origin such as `https://apply.example.com`.
    pub fn cors_origin(mut self, origin: impl Into<String>) -> Self {
        let origin = origin.into();
        self.cors_origins
            .push(origin.trim().trim_end_matches('/').to_string());
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> OnboardingResult<ReceiverConfig> {
        let public_base_url = match self.public_base_url {
            Some(raw) => parse_url("Public base URL", &raw)?,
            None => parse_url("Public base URL", &format!("http://{}", self.bind_addr))?,
        };

        let config = ReceiverConfig {
            bind_addr: self.bind_addr,
            public_base_url,
            storage: self.storage,
            root_container_id: self.root_container_id,
            sheet_name: self.sheet_name,
            recipient: self.recipient,
            smtp: self.smtp,
            lock_wait: self.lock_wait,
            session_idle_timeout: self.session_idle_timeout,
            sweep_interval: self.sweep_interval,
            max_body_bytes: self.max_body_bytes,
            sales_managers: self.sales_managers,
            cors_origins: self.cors_origins,
        };

        config.validate()?;

        Ok(config)
    }
}

impl Default for ReceiverConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration of the upload client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Receiver endpoint.
    pub endpoint: Url,
    /// Raw bytes per chunk.
    pub chunk_size: usize,
    /// Per-chunk retry policy.
    pub retry: RetryConfig,
    /// Per-request timeout; the transport default applies when unset.
    pub timeout: Option<Duration>,
    /// Independent file pipelines run at once by `upload_all`.
    pub file_concurrency: usize,
}

impl ClientConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `ONBOARDING_ENDPOINT` (required): receiver URL
    /// - `ONBOARDING_CHUNK_SIZE` (optional): raw bytes per chunk
    /// - `ONBOARDING_MAX_ATTEMPTS` (optional): attempts per chunk
    /// - `ONBOARDING_RETRY_DELAY_MS` (optional): delay between attempts
    /// - `ONBOARDING_TIMEOUT_SECS` (optional): request timeout
    /// - `ONBOARDING_FILE_CONCURRENCY` (optional): parallel file pipelines
    pub fn from_env() -> OnboardingResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> OnboardingResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = lookup(env::ENDPOINT).ok_or_else(|| {
            OnboardingError::Configuration(ConfigurationError::MissingSetting(
                env::ENDPOINT.to_string(),
            ))
        })?;

        let mut builder = ClientConfigBuilder::new().endpoint(endpoint);

        if let Some(raw) = lookup(env::CHUNK_SIZE) {
            builder = builder.chunk_size(parse_setting(env::CHUNK_SIZE, &raw)?);
        }
        if let Some(raw) = lookup(env::MAX_ATTEMPTS) {
            builder = builder.max_attempts(parse_setting(env::MAX_ATTEMPTS, &raw)?);
        }
        if let Some(raw) = lookup(env::RETRY_DELAY_MS) {
            builder = builder.retry_delay(Duration::from_millis(parse_setting(
                env::RETRY_DELAY_MS,
                &raw,
            )?));
        }
        if let Some(raw) = lookup(env::TIMEOUT_SECS) {
            builder = builder.timeout(Duration::from_secs(parse_setting(env::TIMEOUT_SECS, &raw)?));
        }
        if let Some(raw) = lookup(env::FILE_CONCURRENCY) {
            builder = builder.file_concurrency(parse_setting(env::FILE_CONCURRENCY, &raw)?);
        }

        builder.build()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> OnboardingResult<()> {
        check_http_url("Endpoint", &self.endpoint)?;

        if self.chunk_size == 0 {
            return Err(OnboardingError::configuration("Chunk size must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(OnboardingError::configuration(
                "Retry policy needs at least one attempt",
            ));
        }
        if self.file_concurrency == 0 {
            return Err(OnboardingError::configuration(
                "File concurrency must be at least 1",
            ));
        }

        Ok(())
    }
}

/// Builder for ClientConfig.
pub struct ClientConfigBuilder {
    endpoint: Option<String>,
    chunk_size: usize,
    retry: RetryConfig,
    timeout: Option<Duration>,
    file_concurrency: usize,
}

impl ClientConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            endpoint: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryConfig::default(),
            timeout: None,
            file_concurrency: 1,
        }
    }

    /// Sets the receiver endpoint.
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    /// Sets the chunk size in raw bytes.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the whole retry policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the attempts per chunk.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.retry.max_attempts = attempts;
        self
    }

    /// Sets the delay between attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry.delay = delay;
        self
    }

    /// Sets the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets how many files `upload_all` sends at once.
    pub fn file_concurrency(mut self, concurrency: usize) -> Self {
        self.file_concurrency = concurrency;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> OnboardingResult<ClientConfig> {
        let endpoint = self.endpoint.ok_or_else(|| {
            OnboardingError::Configuration(ConfigurationError::MissingSetting(
                "endpoint".to_string(),
            ))
        })?;

        let config = ClientConfig {
            endpoint: parse_url("Endpoint", &endpoint)?,
            chunk_size: self.chunk_size,
            retry: self.retry,
            timeout: self.timeout,
            file_concurrency: self.file_concurrency,
        };

        config.validate()?;

        Ok(config)
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses `id=Name,id=Name` into a sales manager map.
///
/// Entries without `=` are rejected; a blank name keeps the id but leaves it
/// unassigned.
pub fn parse_sales_managers(raw: &str) -> OnboardingResult<BTreeMap<String, String>> {
    let mut managers = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, name) = entry.split_once('=').ok_or_else(|| {
            OnboardingError::configuration(format!(
                "Sales manager entry '{}' is not of the form id=Name",
                entry
            ))
        })?;
        let id = id.trim();
        if id.is_empty() {
            return Err(OnboardingError::configuration(format!(
                "Sales manager entry '{}' has an empty id",
                entry
            )));
        }
        managers.insert(id.to_string(), name.trim().to_string());
    }
    Ok(managers)
}

fn parse_setting<T: FromStr>(name: &str, raw: &str) -> OnboardingResult<T> {
    raw.trim().parse::<T>().map_err(|_| {
        OnboardingError::configuration(format!("{} has an invalid value '{}'", name, raw))
    })
}

fn parse_url(what: &str, raw: &str) -> OnboardingResult<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| OnboardingError::configuration(format!("{} is invalid: {}", what, e)))?;
    check_http_url(what, &url)?;
    Ok(url)
}

fn check_origin(origin: &str) -> OnboardingResult<()> {
    let url = parse_url("CORS origin", origin)?;
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(OnboardingError::configuration(format!(
            "CORS origin '{}' must be scheme, host and optional port only",
            origin
        )));
    }
    Ok(())
}

fn check_http_url(what: &str, url: &Url) -> OnboardingResult<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(OnboardingError::configuration(format!(
            "{} must use http or https, got '{}'",
            what, other
        ))),
    }
}
