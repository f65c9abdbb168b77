// ABOUTME: Application configuration and server registry construction.
// ABOUTME: Handles YAML parsing, OpenSSH source ingestion, and path expansion.

mod error;
pub mod forward_spec;
mod openssh;
mod registry;
mod server;
pub mod ssh_config;

pub use error::{ConfigError, Result};
pub use forward_spec::{ForwardSpec, normalize as normalize_forward};
pub use openssh::{ConfigSource, GENERATED_SOURCE_ID, ingest};
pub use registry::{Registry, SourceFailure};
pub use server::{
    DEFAULT_PORT, ForwardDirection, Identity, LocalRcUse, NfsForward, ServerDescriptor,
    StaticForward,
};

use serde::Deserialize;
use server::ServerEntry;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = ".sshmux.yml";
pub const CONFIG_FILENAME_ALT: &str = ".sshmux.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".config/sshmux/config.yml";
pub const DEFAULT_OPENSSH_CONFIG: &str = "~/.ssh/config";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_openssh_sources")]
    pub openssh: Vec<ConfigSource>,

    #[serde(default, deserialize_with = "deserialize_servers")]
    pub servers: BTreeMap<String, ServerDescriptor>,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    #[serde(default = "default_trust_first_connection")]
    pub trust_first_connection: bool,

    #[serde(default)]
    pub known_hosts: Option<String>,
}

/// Terminal session logging.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(default)]
    pub enable: bool,
    /// Directory template; supports `~`, `<Date>` and `<Hostname>`.
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default)]
    pub timestamp: bool,
    #[serde(default)]
    pub remove_ansi_code: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enable: false,
            dir: default_log_dir(),
            timestamp: false,
            remove_ansi_code: false,
        }
    }
}

fn default_openssh_sources() -> Vec<ConfigSource> {
    vec![ConfigSource::Path(DEFAULT_OPENSSH_CONFIG.to_string())]
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_trust_first_connection() -> bool {
    true
}

fn default_log_dir() -> String {
    "~/log/sshmux/<Date>/<Hostname>".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openssh: default_openssh_sources(),
            servers: BTreeMap::new(),
            log: LogConfig::default(),
            connect_timeout: default_connect_timeout(),
            trust_first_connection: default_trust_first_connection(),
            known_hosts: None,
        }
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(ConfigError::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Look for a config file under `dir` (normally the home directory).
    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(ConfigError::NotFound(dir.to_path_buf()))
    }

    /// Load from an explicit path, or discover under the home directory,
    /// falling back to defaults when nothing is found.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let Some(home) = dirs::home_dir() else {
            return Ok(Self::default());
        };

        match Self::discover(&home) {
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }

    /// Every OpenSSH source, then the natively defined servers.
    pub fn registry(&self) -> (Registry, Vec<SourceFailure>) {
        let (mut registry, failures) = Registry::load(&self.openssh);
        registry.extend(self.servers.clone());
        (registry, failures)
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

/// Login name used when a host does not set `User`: `$USER`, then the
/// password database entry for the real uid, else empty.
pub fn current_user() -> String {
    std::env::var("USER")
        .ok()
        .filter(|user| !user.is_empty())
        .or_else(passwd_user)
        .unwrap_or_default()
}

#[cfg(unix)]
fn passwd_user() -> Option<String> {
    let mut buf = vec![0 as libc::c_char; 4096];
    // SAFETY: getpwuid_r only writes into `pwd`, `buf` and `result`, all owned here,
    // and `pw_name` points into `buf` which outlives the CStr borrow.
    unsafe {
        let mut pwd: libc::passwd = std::mem::zeroed();
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let rc = libc::getpwuid_r(
            libc::getuid(),
            &mut pwd,
            buf.as_mut_ptr(),
            buf.len(),
            &mut result,
        );
        if rc != 0 || result.is_null() || pwd.pw_name.is_null() {
            return None;
        }
        std::ffi::CStr::from_ptr(pwd.pw_name)
            .to_str()
            .ok()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }
}

#[cfg(not(unix))]
fn passwd_user() -> Option<String> {
    None
}

fn deserialize_servers<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, ServerDescriptor>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let entries: BTreeMap<String, ServerEntry> = BTreeMap::deserialize(deserializer)?;
    let user = current_user();
    Ok(entries
        .into_iter()
        .map(|(name, entry)| {
            let server = entry.into_descriptor(&name, &user);
            (name, server)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde("/etc/ssh/ssh_config"), PathBuf::from("/etc/ssh/ssh_config"));
    }

    #[test]
    fn expand_tilde_uses_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/.ssh/config"), home.join(".ssh/config"));
        }
    }

    #[test]
    fn default_config_reads_user_ssh_config() {
        let config = Config::default();
        assert_eq!(
            config.openssh,
            vec![ConfigSource::Path("~/.ssh/config".to_string())]
        );
        assert!(!config.log.enable);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }
}
