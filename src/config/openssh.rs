// ABOUTME: Ingests OpenSSH client configuration into server descriptors.
// ABOUTME: Reads a config file or a generator command's output; wildcard hosts are skipped.

use super::error::{ConfigError, Result};
use super::forward_spec;
use super::server::{ForwardDirection, Identity, ServerDescriptor, StaticForward};
use super::ssh_config::{SshConfig, is_wildcard};
use super::{current_user, expand_tilde};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::process::Command;

/// Source id used for entries produced by a generator command.
pub const GENERATED_SOURCE_ID: &str = "generate_sshconfig";

/// One origin of OpenSSH configuration text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    /// A config file path; `~` expands to the home directory.
    Path(String),
    /// A shell command whose stdout is OpenSSH config text.
    Command(String),
}

impl ConfigSource {
    /// Prefix of every registry key produced from this source.
    pub fn id(&self) -> &str {
        match self {
            ConfigSource::Path(path) => path,
            ConfigSource::Command(_) => GENERATED_SOURCE_ID,
        }
    }

    pub fn read(&self) -> Result<String> {
        match self {
            ConfigSource::Path(path) => {
                let full = expand_tilde(path);
                std::fs::read_to_string(&full).map_err(|source| ConfigError::Open { path: full, source })
            }
            ConfigSource::Command(command) => {
                let output = Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .output()
                    .map_err(|e| ConfigError::Command {
                        command: command.clone(),
                        reason: e.to_string(),
                    })?;

                if !output.status.success() {
                    return Err(ConfigError::Command {
                        command: command.clone(),
                        reason: format!(
                            "exited with {}: {}",
                            output.status,
                            String::from_utf8_lossy(&output.stderr).trim()
                        ),
                    });
                }

                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
        }
    }

    /// Read and ingest this source.
    pub fn load(&self) -> Result<BTreeMap<String, ServerDescriptor>> {
        let content = self.read()?;
        ingest(self.id(), &content)
    }
}

/// Build descriptors for every concrete host declared in `content`.
///
/// Keys are `"<source_id>:<host>"`. Patterns containing wildcard
/// metacharacters only contribute inherited attributes.
pub fn ingest(source_id: &str, content: &str) -> Result<BTreeMap<String, ServerDescriptor>> {
    let config = SshConfig::parse(content)?;
    let default_user = current_user();
    let mut servers = BTreeMap::new();

    for host in config.host_patterns().filter(|p| !is_wildcard(p)) {
        let key = format!("{}:{}", source_id, host);
        if servers.contains_key(&key) {
            continue;
        }
        let descriptor = describe(&config, host, source_id, &default_user);
        tracing::debug!("ingested {} -> {}", key, descriptor.addr);
        servers.insert(key, descriptor);
    }

    Ok(servers)
}

fn describe(config: &SshConfig, host: &str, source_id: &str, default_user: &str) -> ServerDescriptor {
    let get = |key: &str| config.get(host, key).map(str::to_string);

    let mut server = ServerDescriptor {
        addr: get("HostName").unwrap_or_else(|| host.to_string()),
        port: get("Port").unwrap_or_default(),
        user: get("User").unwrap_or_else(|| default_user.to_string()),
        proxy_command: get("ProxyCommand").filter(|c| !c.eq_ignore_ascii_case("none")),
        pre_command: get("LocalCommand"),
        identity: Identity::resolve(
            get("IdentityFile"),
            get("Certificate").or_else(|| get("CertificateFile")),
        ),
        pkcs11_provider: get("PKCS11Provider").filter(|p| !p.is_empty()),
        x11: get("ForwardX11").as_deref() == Some("yes"),
        agent_forward: get("ForwardAgent").as_deref() == Some("yes"),
        dynamic_forward: get("DynamicForward"),
        note: format!("from:{}", source_id),
        ..Default::default()
    };

    // LocalForward and RemoteForward share one output slot; the one processed
    // last wins and the direction stays unset (Local).
    let mut slot: Option<StaticForward> = None;
    for directive in ["LocalForward", "RemoteForward"] {
        if let Some(spec) = config.get(host, directive).and_then(forward_spec::normalize) {
            slot = Some(StaticForward::new(ForwardDirection::Local, spec.bind, spec.target));
        }
    }
    server.forwards.extend(slot);

    server
}
