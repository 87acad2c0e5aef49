//! Server table and timeouts.
//!
//! Raw deserialization structs stay private; the public types are only
//! constructed through validation, so holding a [`ServerConfig`] proves its
//! command and language id are non-empty.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("server command must not be empty")]
    EmptyCommand,
    #[error("language_id must not be empty")]
    EmptyLanguageId,
}

#[derive(Deserialize)]
struct RawServerConfig {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    language_id: Option<String>,
    #[serde(default)]
    file_extensions: Vec<String>,
}

/// Launch and routing settings for one language.
///
/// `language_id` is the identifier sent in `textDocument/didOpen`. When
/// omitted in config it defaults to the table key (see [`LspConfig`]).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawServerConfig")]
pub struct ServerConfig {
    command: String,
    args: Vec<String>,
    language_id: String,
    file_extensions: Vec<String>,
}

impl TryFrom<RawServerConfig> for ServerConfig {
    type Error = ConfigError;

    fn try_from(raw: RawServerConfig) -> Result<Self, Self::Error> {
        if raw.command.trim().is_empty() {
            return Err(ConfigError::EmptyCommand);
        }
        let language_id = match raw.language_id {
            Some(id) if id.trim().is_empty() => return Err(ConfigError::EmptyLanguageId),
            Some(id) => id,
            // Filled in from the table key by `LspConfig`.
            None => String::new(),
        };
        Ok(Self {
            command: raw.command,
            args: raw.args,
            language_id,
            file_extensions: raw
                .file_extensions
                .iter()
                .map(|e| normalize_extension(e))
                .filter(|e| !e.is_empty())
                .collect(),
        })
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

impl ServerConfig {
    pub fn new(
        command: impl Into<String>,
        args: &[&str],
        language_id: impl Into<String>,
        file_extensions: &[&str],
    ) -> Result<Self, ConfigError> {
        Self::try_from(RawServerConfig {
            command: command.into(),
            args: args.iter().map(ToString::to_string).collect(),
            language_id: Some(language_id.into()),
            file_extensions: file_extensions.iter().map(ToString::to_string).collect(),
        })
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    #[must_use]
    pub fn file_extensions(&self) -> &[String] {
        &self.file_extensions
    }
}

const fn default_request_secs() -> u64 {
    30
}

const fn default_initialize_secs() -> u64 {
    60
}

const fn default_shutdown_secs() -> u64 {
    2
}

/// Bounded waits applied by every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_request_secs")]
    request_secs: u64,
    #[serde(default = "default_initialize_secs")]
    initialize_secs: u64,
    #[serde(default = "default_shutdown_secs")]
    shutdown_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            request_secs: default_request_secs(),
            initialize_secs: default_initialize_secs(),
            shutdown_secs: default_shutdown_secs(),
        }
    }
}

impl Timeouts {
    #[must_use]
    pub fn new(request: Duration, initialize: Duration, shutdown: Duration) -> Self {
        Self {
            request_secs: request.as_secs().max(1),
            initialize_secs: initialize.as_secs().max(1),
            shutdown_secs: shutdown.as_secs().max(1),
        }
    }

    #[must_use]
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    #[must_use]
    pub fn initialize(&self) -> Duration {
        Duration::from_secs(self.initialize_secs)
    }

    #[must_use]
    pub fn shutdown(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs)
    }
}

#[derive(Deserialize)]
struct RawLspConfig {
    #[serde(default)]
    servers: BTreeMap<String, ServerConfig>,
    #[serde(default)]
    timeouts: Timeouts,
}

/// Server table keyed by language identifier, plus timeouts.
///
/// Deserializes from e.g.
///
/// ```toml
/// [servers.python]
/// command = "pyright-langserver"
/// args = ["--stdio"]
/// file_extensions = ["py", "pyi"]
///
/// [timeouts]
/// request_secs = 10
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "RawLspConfig")]
pub struct LspConfig {
    servers: BTreeMap<String, ServerConfig>,
    timeouts: Timeouts,
}

impl From<RawLspConfig> for LspConfig {
    fn from(raw: RawLspConfig) -> Self {
        let mut config = Self {
            servers: BTreeMap::new(),
            timeouts: raw.timeouts,
        };
        for (language, server) in raw.servers {
            config = config.with_server(language, server);
        }
        config
    }
}

impl LspConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in table: Go, Python, Rust, TypeScript/JavaScript.
    #[must_use]
    pub fn with_default_servers() -> Self {
        let defaults: [(&str, &str, &[&str], &[&str]); 4] = [
            ("go", "gopls", &[], &["go"]),
            ("python", "pyright-langserver", &["--stdio"], &["py", "pyi"]),
            ("rust", "rust-analyzer", &[], &["rs"]),
            (
                "typescript",
                "typescript-language-server",
                &["--stdio"],
                &["ts", "tsx", "js", "jsx", "mjs", "cjs"],
            ),
        ];
        let mut config = Self::default();
        for (language, command, args, exts) in defaults {
            if let Ok(server) = ServerConfig::new(command, args, language, exts) {
                config = config.with_server(language, server);
            }
        }
        config
    }

    /// Add or replace the server for `language`.
    #[must_use]
    pub fn with_server(mut self, language: impl Into<String>, mut server: ServerConfig) -> Self {
        let language = language.into();
        if server.language_id.is_empty() {
            server.language_id.clone_from(&language);
        }
        self.servers.insert(language, server);
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn servers(&self) -> &BTreeMap<String, ServerConfig> {
        &self.servers
    }

    #[must_use]
    pub fn server(&self, language: &str) -> Option<&ServerConfig> {
        self.servers.get(language)
    }

    #[must_use]
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Extension → language routing table.
    ///
    /// Languages are visited in sorted order, so an extension claimed by
    /// two languages deterministically goes to the first.
    #[must_use]
    pub fn extension_map(&self) -> HashMap<String, String> {
        let mut map: HashMap<String, String> = HashMap::new();
        for (language, server) in &self.servers {
            for ext in server.file_extensions() {
                if let Some(existing) = map.get(ext) {
                    tracing::warn!(
                        "Extension '{ext}' configured for both '{existing}' and '{language}'. Using '{existing}'."
                    );
                    continue;
                }
                map.insert(ext.clone(), language.clone());
            }
        }
        map
    }
}
