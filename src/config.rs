//! Configuration for ptyterm.
//!
//! Settings are loaded from `~/.ptyterm/config.toml`. A missing or invalid
//! file yields the defaults.
//!
//! ```toml
//! # Shell to run (falls back to $SHELL, then /bin/bash)
//! shell = "/bin/zsh"
//!
//! # Terminal type advertised to the shell
//! term = "xterm-256color"
//!
//! # Bytes read from the PTY per wakeup
//! chunk_size = 256
//!
//! # Log filter used when PTYTERM_LOG is unset
//! log_level = "info"
//!
//! # Colors for text that carries no SGR color
//! default_foreground = "white"
//! default_background = "black"
//!
//! [env]
//! LANG = "en_US.UTF-8"
//! ```

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::pty::{DEFAULT_SHELL, DEFAULT_TERM};
use crate::core::session::{SessionOptions, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use crate::core::term::Color;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell command
    pub shell: Option<String>,
    /// Value of `TERM` for the shell
    pub term: String,
    pub chunk_size: usize,
    pub log_level: String,
    pub default_foreground: Option<Color>,
    pub default_background: Option<Color>,
    /// Extra environment for the shell
    pub env: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            term: DEFAULT_TERM.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            log_level: "info".to_string(),
            default_foreground: None,
            default_background: None,
            env: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from file, writing the defaults on first run
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_or_init(&path),
            None => Self::default(),
        }
    }

    fn load_or_init(path: &Path) -> Self {
        if path.exists() {
            return Self::load_from(path);
        }
        let config = Self::default();
        if let Err(e) = config.save_to(path) {
            eprintln!("ptyterm: {}", e);
        }
        config
    }

    pub fn load_from(path: &Path) -> Self {
        if let Ok(content) = fs::read_to_string(path) {
            match toml::from_str(&content) {
                Ok(config) => return config,
                Err(e) => eprintln!("ptyterm: ignoring {}: {}", path.display(), e),
            }
        }
        Self::default()
    }

    /// Save configuration to file, creating its directory
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))
    }

    /// `~/.ptyterm`
    pub fn config_dir() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".ptyterm"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Log file location, falling back to the working directory
    pub fn log_path() -> PathBuf {
        Self::config_dir()
            .map(|dir| dir.join("ptyterm.log"))
            .unwrap_or_else(|| PathBuf::from("ptyterm.log"))
    }

    /// Pick the shell: command line, then config, then `$SHELL`, then the default
    pub fn resolve_shell(&self, cli_shell: Option<&str>) -> PathBuf {
        pick_shell(cli_shell, self.shell.as_deref(), std::env::var_os("SHELL"))
    }

    /// Options for a `SessionController`
    pub fn session_options(&self, cli_shell: Option<&str>) -> SessionOptions {
        let mut env = vec![("TERM".to_string(), self.term.clone())];
        env.extend(
            self.env
                .iter()
                .filter(|(key, _)| key.as_str() != "TERM")
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        SessionOptions {
            shell: Some(self.resolve_shell(cli_shell)),
            env,
            chunk_size: self.chunk_size.clamp(1, MAX_CHUNK_SIZE),
        }
    }
}

fn pick_shell(cli: Option<&str>, config: Option<&str>, env_shell: Option<OsString>) -> PathBuf {
    cli.or(config)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .or_else(|| env_shell.filter(|s| !s.is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SHELL))
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}
