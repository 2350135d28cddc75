use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   config.toml:     [chat]
//                    echo_to_sender = false
//
//   env var:         LISTING_CHAT_CHAT__ECHO_TO_SENDER=false   (double underscore = nesting)

/// What to do when a principal opens a second connection to the same conversation.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateConnectionPolicy {
    /// Every device gets its own live connection.
    #[default]
    Allow,
    /// The newest connection wins; older ones for the same principal are closed.
    Replace,
}

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub database: DatabaseFileConfig,
    #[serde(default)]
    pub chat: ChatFileConfig,
}

/// Listener settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Lives under `[database]` in config.toml.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DatabaseFileConfig {
    /// Overrides `<data-dir>/listing_chat.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Real-time messaging knobs (lives under `[chat]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatFileConfig {
    #[serde(default = "default_send_channel_capacity")]
    pub send_channel_capacity: usize,
    #[serde(default = "default_echo_to_sender")]
    pub echo_to_sender: bool,
    #[serde(default)]
    pub duplicate_connections: DuplicateConnectionPolicy,
}

impl Default for ChatFileConfig {
    fn default() -> Self {
        Self {
            send_channel_capacity: default_send_channel_capacity(),
            echo_to_sender: default_echo_to_sender(),
            duplicate_connections: DuplicateConnectionPolicy::default(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_send_channel_capacity() -> usize {
    64
}
fn default_echo_to_sender() -> bool {
    true
}

/// Build a figment that layers: defaults → config.toml → LISTING_CHAT_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `LISTING_CHAT_SERVER__PORT=9000`  →  `server.port = 9000`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("LISTING_CHAT_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig, shared through AppState)
// =============================================================================

const MIN_SEND_CHANNEL_CAPACITY: usize = 2;

/// Runtime view of the `[chat]` section.
#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// Outbound frames queued per connection before it is considered slow.
    /// The `connection_established` ack occupies one slot until it is written.
    pub send_channel_capacity: usize,
    /// Deliver a sender's own `chat_message` back to the connection it came from.
    pub echo_to_sender: bool,
    pub duplicate_connections: DuplicateConnectionPolicy,
}

impl ChatConfig {
    pub fn from_file(fc: &ChatFileConfig) -> Self {
        Self {
            // One slot for the ack plus at least one for broadcasts.
            send_channel_capacity: fc.send_channel_capacity.max(MIN_SEND_CHANNEL_CAPACITY),
            echo_to_sender: fc.echo_to_sender,
            duplicate_connections: fc.duplicate_connections,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::from_file(&ChatFileConfig::default())
    }
}

// =============================================================================
// Directory layout config (not tunable via figment, derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ListingChatConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl ListingChatConfig {
    pub fn new(custom_dir: Option<PathBuf>, db_override: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".listing-chat"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = db_override.unwrap_or_else(|| data_dir.join("listing_chat.db"));

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
