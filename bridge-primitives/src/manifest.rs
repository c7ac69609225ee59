//! Server identity advertised to discovery clients.

use serde::{Deserialize, Serialize};

/// Human-readable description of the server exposing the catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerManifest {
    name: String,
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl ServerManifest {
    /// Starts building a [`ServerManifest`].
    #[must_use]
    pub fn builder() -> ServerManifestBuilder {
        ServerManifestBuilder::default()
    }

    /// Returns the server display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the version string identifying the server build.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the optional description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// Builder for [`ServerManifest`].
#[derive(Debug, Default)]
pub struct ServerManifestBuilder {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
}

impl ServerManifestBuilder {
    /// Sets the server name.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidManifest`] when the name is empty.
    pub fn name(mut self, name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(crate::Error::InvalidManifest {
                reason: "server name cannot be empty".into(),
            });
        }
        self.name = Some(name);
        Ok(self)
    }

    /// Sets the version string.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidManifest`] when the version string is empty.
    pub fn version(mut self, version: impl Into<String>) -> crate::Result<Self> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(crate::Error::InvalidManifest {
                reason: "server version cannot be empty".into(),
            });
        }
        self.version = Some(version);
        Ok(self)
    }

    /// Sets an optional description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Consumes the builder and returns the manifest.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidManifest`] if the name or version is missing.
    pub fn build(self) -> crate::Result<ServerManifest> {
        let name = self.name.ok_or_else(|| crate::Error::InvalidManifest {
            reason: "server name must be provided".into(),
        })?;
        let version = self.version.ok_or_else(|| crate::Error::InvalidManifest {
            reason: "server version must be provided".into(),
        })?;

        Ok(ServerManifest {
            name,
            version,
            description: self.description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_manifest() {
        let manifest = ServerManifest::builder()
            .name("mcp-tools-server")
            .and_then(|b| b.version("0.1.0"))
            .map(|b| b.description("weather tools"))
            .and_then(ServerManifestBuilder::build)
            .expect("manifest");

        assert_eq!(manifest.name(), "mcp-tools-server");
        assert_eq!(manifest.version(), "0.1.0");
        assert_eq!(manifest.description(), Some("weather tools"));
    }

    #[test]
    fn requires_name_and_version() {
        let err = ServerManifest::builder()
            .name("only-name")
            .and_then(ServerManifestBuilder::build)
            .expect_err("missing version");
        assert!(matches!(err, crate::Error::InvalidManifest { .. }));

        assert!(ServerManifest::builder().name("  ").is_err());
    }

    #[test]
    fn omits_missing_description_on_the_wire() {
        let manifest = ServerManifest::builder()
            .name("srv")
            .and_then(|b| b.version("1"))
            .and_then(ServerManifestBuilder::build)
            .expect("manifest");
        let json = serde_json::to_value(&manifest).expect("serialize");
        assert_eq!(json, serde_json::json!({ "name": "srv", "version": "1" }));
    }
}
