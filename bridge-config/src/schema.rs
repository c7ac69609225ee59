//! Strongly typed server configuration.

use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bridge_primitives::{ServerManifest, ServerManifestBuilder};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::origins::AllowedOrigins;

/// Interface the server binds to unless told otherwise.
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Port the server binds to unless told otherwise.
pub const DEFAULT_PORT: u16 = 8000;
/// Environment variable holding the bearer secret unless told otherwise.
pub const DEFAULT_TOKEN_ENV: &str = "APP_TOKEN";
/// Name advertised through discovery unless told otherwise.
pub const DEFAULT_SERVER_NAME: &str = "mcp-tools-server";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const DEFAULT_MAX_CONCURRENCY: usize = 64;

/// Validated, immutable startup configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    tools_directory: PathBuf,
    host: String,
    port: u16,
    auth_token_env: String,
    server_name: String,
    allowed_origins: AllowedOrigins,
    invocation_timeout: Option<Duration>,
    max_concurrency: NonZeroUsize,
    shutdown_grace: Duration,
    discovery_requires_auth: bool,
    strict_arguments: bool,
}

impl ServerConfig {
    /// Starts a builder for a server exposing `tools_directory`.
    #[must_use]
    pub fn builder(tools_directory: impl Into<PathBuf>) -> ServerConfigBuilder {
        ServerConfigBuilder {
            tools_directory: tools_directory.into(),
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            auth_token_env: DEFAULT_TOKEN_ENV.to_owned(),
            server_name: DEFAULT_SERVER_NAME.to_owned(),
            allowed_origins: AllowedOrigins::Any,
            invocation_timeout: Some(DEFAULT_TIMEOUT),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            discovery_requires_auth: true,
            strict_arguments: true,
        }
    }

    /// Directory scanned for tool modules.
    #[must_use]
    pub fn tools_directory(&self) -> &Path {
        &self.tools_directory
    }

    /// Interface to bind.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port to bind; zero picks an ephemeral port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Name of the environment variable holding the bearer secret.
    #[must_use]
    pub fn auth_token_env(&self) -> &str {
        &self.auth_token_env
    }

    /// Name advertised through discovery.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Browser origins allowed to call the server.
    #[must_use]
    pub fn allowed_origins(&self) -> &AllowedOrigins {
        &self.allowed_origins
    }

    /// Default per-invocation timeout; `None` disables it.
    #[must_use]
    pub const fn invocation_timeout(&self) -> Option<Duration> {
        self.invocation_timeout
    }

    /// Maximum number of concurrently running invocations.
    #[must_use]
    pub const fn max_concurrency(&self) -> NonZeroUsize {
        self.max_concurrency
    }

    /// How long in-flight invocations may run after shutdown starts.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    /// Whether the discovery endpoint demands a bearer token.
    #[must_use]
    pub const fn discovery_requires_auth(&self) -> bool {
        self.discovery_requires_auth
    }

    /// Whether undeclared arguments are rejected.
    #[must_use]
    pub const fn strict_arguments(&self) -> bool {
        self.strict_arguments
    }

    /// `host:port` for log lines.
    #[must_use]
    pub fn display_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Server identity for discovery responses.
    ///
    /// # Errors
    ///
    /// Propagates manifest validation errors; the builder already rejects an
    /// empty name, so this only fails for an empty `version`.
    pub fn manifest(&self, version: &str) -> bridge_primitives::Result<ServerManifest> {
        ServerManifest::builder()
            .name(self.server_name.clone())
            .and_then(|builder| builder.version(version))
            .and_then(ServerManifestBuilder::build)
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    tools_directory: PathBuf,
    host: String,
    port: u16,
    auth_token_env: String,
    server_name: String,
    allowed_origins: AllowedOrigins,
    invocation_timeout: Option<Duration>,
    max_concurrency: usize,
    shutdown_grace: Duration,
    discovery_requires_auth: bool,
    strict_arguments: bool,
}

impl ServerConfigBuilder {
    /// Sets the interface to bind.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the port to bind.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the name of the environment variable holding the secret.
    #[must_use]
    pub fn auth_token_env(mut self, name: impl Into<String>) -> Self {
        self.auth_token_env = name.into();
        self
    }

    /// Sets the advertised server name.
    #[must_use]
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Sets the allowed origins.
    #[must_use]
    pub fn allowed_origins(mut self, origins: AllowedOrigins) -> Self {
        self.allowed_origins = origins;
        self
    }

    /// Parses and sets a comma-separated origin list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOrigin`] for malformed entries.
    pub fn cors_origins(self, raw: &str) -> ConfigResult<Self> {
        Ok(self.allowed_origins(AllowedOrigins::parse(raw)?))
    }

    /// Sets the default per-invocation timeout; `None` disables it.
    #[must_use]
    pub const fn invocation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.invocation_timeout = timeout;
        self
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub const fn max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit;
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Controls whether discovery requires authentication.
    #[must_use]
    pub const fn discovery_requires_auth(mut self, required: bool) -> Self {
        self.discovery_requires_auth = required;
        self
    }

    /// Controls whether undeclared arguments are rejected.
    #[must_use]
    pub const fn strict_arguments(mut self, strict: bool) -> Self {
        self.strict_arguments = strict;
        self
    }

    /// Validates and freezes the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first invalid value.
    pub fn build(self) -> ConfigResult<ServerConfig> {
        validate_tools_directory(&self.tools_directory)?;
        validate_host(&self.host)?;
        validate_token_env(&self.auth_token_env)?;
        if self.server_name.trim().is_empty() {
            return Err(ConfigError::EmptyServerName);
        }
        let max_concurrency =
            NonZeroUsize::new(self.max_concurrency).ok_or(ConfigError::InvalidConcurrency)?;

        let config = ServerConfig {
            tools_directory: self.tools_directory,
            host: self.host,
            port: self.port,
            auth_token_env: self.auth_token_env,
            server_name: self.server_name,
            allowed_origins: self.allowed_origins,
            invocation_timeout: self.invocation_timeout.filter(|t| !t.is_zero()),
            max_concurrency,
            shutdown_grace: self.shutdown_grace,
            discovery_requires_auth: self.discovery_requires_auth,
            strict_arguments: self.strict_arguments,
        };
        debug!(?config, "server configuration validated");
        Ok(config)
    }
}

fn validate_tools_directory(path: &Path) -> ConfigResult<()> {
    let reason = match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => "is not a directory".to_owned(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => "does not exist".to_owned(),
        Err(err) => format!("is unreadable: {err}"),
    };
    Err(ConfigError::ToolsDirectory {
        path: path.to_path_buf(),
        reason,
    })
}

fn validate_host(host: &str) -> ConfigResult<()> {
    let valid_name = !host.is_empty()
        && host.len() <= 253
        && host
            .split('.')
            .all(|label| {
                !label.is_empty()
                    && !label.starts_with('-')
                    && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            });
    if host.parse::<IpAddr>().is_ok() || valid_name {
        Ok(())
    } else {
        Err(ConfigError::InvalidHost {
            host: host.to_owned(),
        })
    }
}

fn validate_token_env(name: &str) -> ConfigResult<()> {
    let reason = if name.is_empty() {
        "name cannot be empty"
    } else if name.contains(['=', '\0']) {
        "name cannot contain `=` or NUL"
    } else {
        return Ok(());
    };
    Err(ConfigError::InvalidTokenVariable {
        name: name.to_owned(),
        reason: reason.to_owned(),
    })
}
