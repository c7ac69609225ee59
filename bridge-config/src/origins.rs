//! Cross-origin allow-list.

use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, ConfigResult};

/// Browser origins permitted to call the server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// Every origin is allowed.
    #[default]
    Any,
    /// Only matching origins are allowed; an empty list allows none.
    List(Vec<OriginPattern>),
}

impl AllowedOrigins {
    /// Parses a comma-separated list. A `*` entry anywhere allows every origin.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOrigin`] for malformed entries.
    pub fn parse(raw: &str) -> ConfigResult<Self> {
        let mut patterns: Vec<OriginPattern> = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            if entry == "*" {
                return Ok(Self::Any);
            }
            let pattern = OriginPattern::parse(entry)?;
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }
        Ok(Self::List(patterns))
    }

    /// Returns `true` when every origin is allowed.
    #[must_use]
    pub const fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Returns `true` when `origin` may call the server.
    #[must_use]
    pub fn allows(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(patterns) => patterns.iter().any(|pattern| pattern.matches(origin)),
        }
    }
}

impl FromStr for AllowedOrigins {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AllowedOrigins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::List(patterns) => {
                let joined: Vec<String> = patterns.iter().map(ToString::to_string).collect();
                f.write_str(&joined.join(","))
            }
        }
    }
}

/// One allow-list entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OriginPattern {
    /// Exact origin such as `https://app.example.com`.
    Exact(String),
    /// Any subdomain, written `https://*.example.com`.
    Subdomain {
        /// `scheme://`
        prefix: String,
        /// `.example.com`, including any port.
        suffix: String,
    },
}

impl OriginPattern {
    /// Parses an origin or subdomain pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOrigin`] when the scheme is not http(s),
    /// the host is missing, a path is present, or `*` appears anywhere other
    /// than a leading `*.` label.
    pub fn parse(raw: &str) -> ConfigResult<Self> {
        let invalid = |reason: &str| ConfigError::InvalidOrigin {
            origin: raw.to_owned(),
            reason: reason.to_owned(),
        };

        let lowered = raw.trim_end_matches('/').to_ascii_lowercase();
        let Some((scheme, authority)) = lowered.split_once("://") else {
            return Err(invalid("expected scheme://host[:port]"));
        };
        if !matches!(scheme, "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        if authority.is_empty() {
            return Err(invalid("host is missing"));
        }
        if authority
            .chars()
            .any(|c| c == '/' || c.is_whitespace())
        {
            return Err(invalid("origins cannot contain a path or whitespace"));
        }

        let prefix = format!("{scheme}://");
        match authority.strip_prefix("*.") {
            Some(suffix) if !suffix.is_empty() && !suffix.contains('*') => Ok(Self::Subdomain {
                prefix,
                suffix: format!(".{suffix}"),
            }),
            Some(_) => Err(invalid("wildcard must be followed by a domain")),
            None if authority.contains('*') => {
                Err(invalid("wildcards are only allowed as a leading `*.` label"))
            }
            None => Ok(Self::Exact(format!("{prefix}{authority}"))),
        }
    }

    /// Returns `true` when `origin` matches this pattern.
    #[must_use]
    pub fn matches(&self, origin: &str) -> bool {
        let origin = origin.to_ascii_lowercase();
        match self {
            Self::Exact(expected) => origin == *expected,
            Self::Subdomain { prefix, suffix } => {
                let Some(rest) = origin.strip_prefix(prefix.as_str()) else {
                    return false;
                };
                let Some(label) = rest.strip_suffix(suffix.as_str()) else {
                    return false;
                };
                !label.is_empty()
                    && label
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
            }
        }
    }
}

impl fmt::Display for OriginPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(origin) => f.write_str(origin),
            Self::Subdomain { prefix, suffix } => write!(f, "{prefix}*{suffix}"),
        }
    }
}
