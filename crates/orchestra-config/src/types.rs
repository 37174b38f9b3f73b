use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use orchestra_types::{GatewayError, GatewayResult, NAMESPACE_SEPARATOR};

/// Top-level application configuration.
///
/// Loaded once at startup from a YAML file; never reloaded. Backend order in
/// the file is registration order, which in turn fixes aggregation order.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redaction: Option<RedactionConfig>,
}

/// Gateway-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Name advertised to the upstream client during initialize
    #[serde(default = "default_gateway_name")]
    pub name: String,

    /// Version advertised to the upstream client
    #[serde(default = "default_gateway_version")]
    pub version: String,

    /// Bound on every backend-facing request, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_gateway_name() -> String {
    "orchestra-gateway".to_string()
}

fn default_gateway_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            name: default_gateway_name(),
            version: default_gateway_version(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// Launch parameters for one backend MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique backend identifier, used as the namespace prefix.
    /// Must not contain the namespace separator.
    pub id: String,

    /// Command line to spawn, as a single string (parsed with shell-words),
    /// e.g. `npx -y @modelcontextprotocol/server-everything`
    pub command: String,

    /// Extra environment variables for the spawned process
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl BackendConfig {
    /// Parse the command string into (program, args)
    pub fn parse_command(&self) -> GatewayResult<(String, Vec<String>)> {
        let mut parts = shell_words::split(&self.command).map_err(|e| {
            GatewayError::Config(format!("Invalid command for backend '{}': {}", self.id, e))
        })?;

        if parts.is_empty() {
            return Err(GatewayError::Config(format!(
                "Empty command for backend '{}'",
                self.id
            )));
        }

        let program = parts.remove(0);
        Ok((program, parts))
    }
}

/// Entity categories the redaction stage can recognize
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PiiEntity {
    EmailAddress,
    PhoneNumber,
    IpAddress,
    CreditCardNumber,
}

impl PiiEntity {
    /// Label used as the replacement token in `Replace` mode
    pub fn label(self) -> &'static str {
        match self {
            PiiEntity::EmailAddress => "EMAIL_ADDRESS",
            PiiEntity::PhoneNumber => "PHONE_NUMBER",
            PiiEntity::IpAddress => "IP_ADDRESS",
            PiiEntity::CreditCardNumber => "CREDIT_CARD_NUMBER",
        }
    }
}

/// How matched entities are rewritten
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EditMode {
    /// Substitute the match with `<ENTITY_LABEL>`
    #[default]
    Replace,
    /// Substitute the match with asterisks of the same length
    Mask,
}

/// Redaction stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionConfig {
    pub entities: Vec<PiiEntity>,

    #[serde(default)]
    pub edit_mode: EditMode,
}

impl AppConfig {
    /// Validate the configuration.
    ///
    /// Backend ids must be unique, non-empty, and free of the namespace
    /// separator — the codec splits composite identifiers on the first
    /// separator occurrence, so a separator inside an id would make routing
    /// ambiguous.
    pub fn validate(&self) -> GatewayResult<()> {
        let mut seen = std::collections::HashSet::new();

        for backend in &self.backends {
            if backend.id.is_empty() {
                return Err(GatewayError::Config(
                    "Backend id must not be empty".to_string(),
                ));
            }

            if backend.id.contains(NAMESPACE_SEPARATOR) {
                return Err(GatewayError::Config(format!(
                    "Backend id '{}' must not contain the namespace separator '{}'",
                    backend.id, NAMESPACE_SEPARATOR
                )));
            }

            if !seen.insert(backend.id.as_str()) {
                return Err(GatewayError::DuplicateBackend(backend.id.clone()));
            }

            // Surface malformed commands at load time rather than at spawn
            backend.parse_command()?;
        }

        if let Some(redaction) = &self.redaction {
            if redaction.entities.is_empty() {
                return Err(GatewayError::Config(
                    "Redaction is configured with no entities".to_string(),
                ));
            }
        }

        Ok(())
    }
}
