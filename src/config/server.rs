// ABOUTME: Canonical per-host connection and forwarding record.
// ABOUTME: Descriptors are immutable templates in the registry; sessions work on clones.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Direction of a static TCP forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForwardDirection {
    /// Listen locally, connect from the remote side (`ssh -L`).
    #[default]
    Local,
    /// Listen remotely, connect from the local side (`ssh -R`).
    Remote,
}

impl fmt::Display for ForwardDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardDirection::Local => write!(f, "L"),
            ForwardDirection::Remote => write!(f, "R"),
        }
    }
}

impl<'de> Deserialize<'de> for ForwardDirection {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "L" | "l" | "local" | "" => Ok(ForwardDirection::Local),
            "R" | "r" | "remote" => Ok(ForwardDirection::Remote),
            other => Err(serde::de::Error::custom(format!(
                "unknown forward direction: {}",
                other
            ))),
        }
    }
}

/// A fixed TCP tunnel between two endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StaticForward {
    #[serde(default, rename = "mode")]
    pub direction: ForwardDirection,
    /// Endpoint that listens (`host:port`).
    pub bind: String,
    /// Endpoint that is dialed for every accepted connection (`host:port`).
    pub target: String,
}

impl StaticForward {
    pub fn new(direction: ForwardDirection, bind: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            direction,
            bind: bind.into(),
            target: target.into(),
        }
    }

    /// Parse `ssh -L`/`-R` syntax: `[bind_address:]port:host:hostport`.
    pub fn parse_cli(direction: ForwardDirection, spec: &str) -> Result<Self, String> {
        let parts: Vec<&str> = spec.split(':').collect();
        let (bind, target) = match parts.as_slice() {
            [port, host, host_port] => (format!("localhost:{}", port), format!("{}:{}", host, host_port)),
            [addr, port, host, host_port] => {
                (format!("{}:{}", addr, port), format!("{}:{}", host, host_port))
            }
            _ => return Err(format!("invalid forward spec: {}", spec)),
        };

        if parts.iter().any(|p| p.is_empty()) {
            return Err(format!("invalid forward spec: {}", spec));
        }

        Ok(Self::new(direction, bind, target))
    }
}

/// Port and exported path of an NFS-serving forward.
///
/// Both halves are overridden independently, so each one is optional; the
/// forward only launches when both are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NfsForward {
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

impl NfsForward {
    pub fn new(port: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            port: Some(port.into()),
            path: Some(path.into()),
        }
    }

    /// The `(port, path)` pair when both halves are set and non-empty.
    pub fn endpoint(&self) -> Option<(&str, &str)> {
        match (self.port.as_deref(), self.path.as_deref()) {
            (Some(port), Some(path)) if !port.is_empty() && !path.is_empty() => Some((port, path)),
            _ => None,
        }
    }
}

/// Whether the shell is bootstrapped with a locally packaged rc file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalRcUse {
    #[default]
    Unset,
    Enabled,
    Disabled,
}

impl LocalRcUse {
    pub fn is_enabled(&self) -> bool {
        matches!(self, LocalRcUse::Enabled)
    }
}

impl FromStr for LocalRcUse {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(LocalRcUse::Unset),
            "yes" | "true" => Ok(LocalRcUse::Enabled),
            "no" | "false" => Ok(LocalRcUse::Disabled),
            _ => Err(format!("invalid local_rc value: {}", s)),
        }
    }
}

impl<'de> Deserialize<'de> for LocalRcUse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Ok(LocalRcUse::Enabled),
            Raw::Flag(false) => Ok(LocalRcUse::Disabled),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Key material used to authenticate. A certificate always travels with its
/// companion key, and never alongside a plain key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Identity {
    #[default]
    None,
    Key(String),
    Certificate { cert: String, key: String },
}

impl Identity {
    /// Apply the precedence rule: a certificate turns the identity file into
    /// its companion key.
    pub fn resolve(key: Option<String>, cert: Option<String>) -> Self {
        match (cert.filter(|c| !c.is_empty()), key.filter(|k| !k.is_empty())) {
            (Some(cert), key) => Identity::Certificate {
                cert,
                key: key.unwrap_or_default(),
            },
            (None, Some(key)) => Identity::Key(key),
            (None, None) => Identity::None,
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Identity::Key(key) => Some(key),
            _ => None,
        }
    }

    pub fn certificate(&self) -> Option<(&str, &str)> {
        match self {
            Identity::Certificate { cert, key } => Some((cert, key)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub addr: String,
    pub port: String,
    pub user: String,
    pub proxy_command: Option<String>,
    pub pre_command: Option<String>,
    pub post_command: Option<String>,
    pub identity: Identity,
    pub pkcs11_provider: Option<String>,
    pub x11: bool,
    pub agent_forward: bool,
    pub forwards: Vec<StaticForward>,
    pub dynamic_forward: Option<String>,
    pub reverse_dynamic_forward: Option<String>,
    pub http_dynamic_forward: Option<String>,
    pub http_reverse_dynamic_forward: Option<String>,
    pub nfs_forward: NfsForward,
    pub nfs_reverse_forward: NfsForward,
    pub local_rc: LocalRcUse,
    pub local_rc_paths: Vec<String>,
    pub local_rc_decode_cmd: Option<String>,
    pub local_rc_compress: bool,
    pub local_rc_uncompress_cmd: Option<String>,
    pub note: String,
}

pub const DEFAULT_PORT: u16 = 22;

impl ServerDescriptor {
    pub fn new(addr: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn pkcs11_use(&self) -> bool {
        self.pkcs11_provider.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Numeric port, defaulting to 22 when unset.
    pub fn port_number(&self) -> Result<u16, String> {
        if self.port.is_empty() {
            return Ok(DEFAULT_PORT);
        }
        self.port
            .parse::<u16>()
            .map_err(|_| format!("invalid port: {}", self.port))
    }
}

/// Server entry as written in the application YAML config.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ServerEntry {
    addr: String,
    port: Option<PortValue>,
    user: Option<String>,
    proxy_command: Option<String>,
    pre_cmd: Option<String>,
    post_cmd: Option<String>,
    key: Option<String>,
    cert: Option<String>,
    cert_key: Option<String>,
    pkcs11_provider: Option<String>,
    x11: bool,
    ssh_agent: bool,
    port_forwards: Vec<StaticForward>,
    dynamic_port_forward: Option<String>,
    reverse_dynamic_port_forward: Option<String>,
    http_dynamic_port_forward: Option<String>,
    http_reverse_dynamic_port_forward: Option<String>,
    nfs_forward: NfsForward,
    nfs_reverse_forward: NfsForward,
    local_rc: LocalRcUse,
    local_rc_path: Vec<String>,
    local_rc_decode_cmd: Option<String>,
    local_rc_compress: bool,
    local_rc_uncompress_cmd: Option<String>,
    note: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Text(String),
}

impl ServerEntry {
    pub(crate) fn into_descriptor(self, name: &str, default_user: &str) -> ServerDescriptor {
        let key = self.cert_key.or(self.key);
        ServerDescriptor {
            addr: if self.addr.is_empty() {
                name.to_string()
            } else {
                self.addr
            },
            port: match self.port {
                Some(PortValue::Number(n)) => n.to_string(),
                Some(PortValue::Text(s)) => s,
                None => String::new(),
            },
            user: self
                .user
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| default_user.to_string()),
            proxy_command: self.proxy_command,
            pre_command: self.pre_cmd,
            post_command: self.post_cmd,
            identity: Identity::resolve(key, self.cert),
            pkcs11_provider: self.pkcs11_provider,
            x11: self.x11,
            agent_forward: self.ssh_agent,
            forwards: self.port_forwards,
            dynamic_forward: self.dynamic_port_forward,
            reverse_dynamic_forward: self.reverse_dynamic_port_forward,
            http_dynamic_forward: self.http_dynamic_port_forward,
            http_reverse_dynamic_forward: self.http_reverse_dynamic_port_forward,
            nfs_forward: self.nfs_forward,
            nfs_reverse_forward: self.nfs_reverse_forward,
            local_rc: self.local_rc,
            local_rc_paths: self.local_rc_path,
            local_rc_decode_cmd: self.local_rc_decode_cmd,
            local_rc_compress: self.local_rc_compress,
            local_rc_uncompress_cmd: self.local_rc_uncompress_cmd,
            note: self.note,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_redirects_identity_file() {
        let identity = Identity::resolve(Some("~/.ssh/id".into()), Some("~/.ssh/id-cert.pub".into()));
        assert_eq!(identity.key(), None);
        assert_eq!(identity.certificate(), Some(("~/.ssh/id-cert.pub", "~/.ssh/id")));
    }

    #[test]
    fn identity_file_alone_is_plain_key() {
        let identity = Identity::resolve(Some("~/.ssh/id".into()), None);
        assert_eq!(identity.key(), Some("~/.ssh/id"));
        assert!(identity.certificate().is_none());
    }

    #[test]
    fn empty_values_resolve_to_no_identity() {
        assert_eq!(Identity::resolve(Some(String::new()), Some(String::new())), Identity::None);
    }

    #[test]
    fn parse_cli_forward_with_implicit_bind_address() {
        let fw = StaticForward::parse_cli(ForwardDirection::Local, "8080:db.internal:5432").unwrap();
        assert_eq!(fw.bind, "localhost:8080");
        assert_eq!(fw.target, "db.internal:5432");
    }

    #[test]
    fn parse_cli_forward_with_bind_address() {
        let fw = StaticForward::parse_cli(ForwardDirection::Remote, "0.0.0.0:9000:localhost:3000").unwrap();
        assert_eq!(fw.direction, ForwardDirection::Remote);
        assert_eq!(fw.bind, "0.0.0.0:9000");
        assert_eq!(fw.target, "localhost:3000");
    }

    #[test]
    fn parse_cli_forward_rejects_malformed() {
        assert!(StaticForward::parse_cli(ForwardDirection::Local, "8080").is_err());
        assert!(StaticForward::parse_cli(ForwardDirection::Local, "8080::80").is_err());
    }

    #[test]
    fn port_defaults_to_22() {
        let server = ServerDescriptor::new("example.com", "alice");
        assert_eq!(server.port_number(), Ok(22));
    }

    #[test]
    fn nfs_endpoint_requires_both_halves() {
        let half = NfsForward {
            port: Some("2049".into()),
            path: None,
        };
        assert!(half.endpoint().is_none());
        assert_eq!(NfsForward::new("2049", "/srv").endpoint(), Some(("2049", "/srv")));
    }

    #[test]
    fn local_rc_parses_tri_state() {
        assert_eq!("yes".parse::<LocalRcUse>(), Ok(LocalRcUse::Enabled));
        assert_eq!("no".parse::<LocalRcUse>(), Ok(LocalRcUse::Disabled));
        assert_eq!("".parse::<LocalRcUse>(), Ok(LocalRcUse::Unset));
        assert!("maybe".parse::<LocalRcUse>().is_err());
    }
}
