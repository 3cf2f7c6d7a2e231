//! Configuration for the konnect CLI.
//!
//! Config file lives at `~/.config/konnect/cli.toml` (or the platform
//! equivalent). It is only ever read; nothing is written back.

use std::path::{Path, PathBuf};

use konnect_sdk::ClientConfig;
use serde::Deserialize;

/// Default IRC server.
pub const DEFAULT_SERVER: &str = "localhost";
/// Default plain-text IRC port.
pub const DEFAULT_PORT: u16 = 6667;

/// User configuration (cli.toml).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server host, optionally `host:port`.
    pub server: Option<String>,
    pub port: Option<u16>,
    pub nick: Option<String>,
    pub realname: Option<String>,
    pub password: Option<String>,
    /// Channel to join once connected.
    pub join: Option<String>,
    /// Channels shown first in the channel directory.
    #[serde(default)]
    pub favorites: Vec<String>,
}

pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("konnect")
        .join("cli.toml")
}

impl Config {
    /// Read `path` (or the default location). A missing file yields the
    /// defaults; an unreadable or malformed one is logged and ignored.
    pub fn load(path: Option<&Path>) -> Self {
        let path = path.map(Path::to_path_buf).unwrap_or_else(default_path);
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(&path) {
            Ok(s) => match Self::parse(&s) {
                Ok(c) => return c,
                Err(e) => tracing::warn!("bad config file {}: {e}", path.display()),
            },
            Err(e) => tracing::warn!("can't read {}: {e}", path.display()),
        }
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// Effective settings after merging CLI args > config file > defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub server: String,
    pub port: u16,
    pub nick: String,
    pub realname: String,
    pub password: Option<String>,
    pub join: Option<String>,
    pub favorites: Vec<String>,
}

impl Resolved {
    pub fn merge(cli: &super::Cli, config: &Config) -> Self {
        let defaults = ClientConfig::default();

        let server = cli
            .server
            .clone()
            .or_else(|| config.server.clone())
            .unwrap_or_else(|| DEFAULT_SERVER.to_string());

        // A port embedded in the server string beats the file but not --port.
        let (server, embedded_port) = match server.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => match port.parse::<u16>() {
                Ok(port) => (host.to_string(), Some(port)),
                Err(_) => (server, None),
            },
            _ => (server, None),
        };
        let port = cli
            .port
            .or(embedded_port)
            .or(config.port)
            .unwrap_or(DEFAULT_PORT);

        let nick = cli
            .nick
            .clone()
            .or_else(|| config.nick.clone())
            .unwrap_or(defaults.nick);
        let realname = cli
            .realname
            .clone()
            .or_else(|| config.realname.clone())
            .unwrap_or(defaults.realname);
        let password = cli
            .password
            .clone()
            .or_else(|| config.password.clone())
            .filter(|p| !p.is_empty());
        let join = cli.join.clone().or_else(|| config.join.clone());

        Self {
            server,
            port,
            nick,
            realname,
            password,
            join,
            favorites: config.favorites.clone(),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            nick: self.nick.clone(),
            realname: self.realname.clone(),
            password: self.password.clone(),
            auto_join: self.join.clone(),
            favorites: self.favorites.clone(),
        }
    }
}
