// ABOUTME: Authentication method resolution and russh authentication.
// ABOUTME: Tries certificate, key file, and agent credentials in that order.

use super::client::SshHandler;
use super::error::{Error, Result};
use crate::config::{ServerDescriptor, expand_tilde};
use russh::client::Handle;
use russh::keys::agent::client::AgentClient;
use russh::keys::{PrivateKeyWithHashAlg, load_openssh_certificate, load_secret_key};
use std::path::PathBuf;
use std::sync::Arc;

/// Key files tried when a server names no identity.
const DEFAULT_KEYS: [&str; 3] = ["~/.ssh/id_ed25519", "~/.ssh/id_ecdsa", "~/.ssh/id_rsa"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Certificate { cert: PathBuf, key: PathBuf },
    Key(PathBuf),
    Pkcs11(String),
    Agent,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Certificate { cert, .. } => write!(f, "certificate {}", cert.display()),
            AuthMethod::Key(path) => write!(f, "key {}", path.display()),
            AuthMethod::Pkcs11(provider) => write!(f, "pkcs11 {}", provider),
            AuthMethod::Agent => write!(f, "ssh-agent"),
        }
    }
}

/// Collect the methods that can be attempted for `server`.
pub fn resolve_auth_methods(server: &ServerDescriptor) -> Vec<AuthMethod> {
    let mut methods = Vec::new();

    if let Some((cert, key)) = server.identity.certificate() {
        let cert = expand_tilde(cert);
        let key = expand_tilde(key);
        if cert.is_file() && key.is_file() {
            methods.push(AuthMethod::Certificate { cert, key });
        } else {
            tracing::debug!("certificate {} or key {} not found", cert.display(), key.display());
        }
    }

    if let Some(key) = server.identity.key() {
        let key = expand_tilde(key);
        if key.is_file() {
            methods.push(AuthMethod::Key(key));
        } else {
            tracing::debug!("identity file {} not found", key.display());
        }
    }

    if server.pkcs11_use()
        && let Some(provider) = &server.pkcs11_provider
    {
        methods.push(AuthMethod::Pkcs11(provider.clone()));
    }

    if std::env::var_os("SSH_AUTH_SOCK").is_some() {
        methods.push(AuthMethod::Agent);
    }

    if server.identity == crate::config::Identity::None {
        methods.extend(
            DEFAULT_KEYS
                .iter()
                .map(|k| expand_tilde(k))
                .filter(|k| k.is_file())
                .map(AuthMethod::Key),
        );
    }

    methods
}

/// Try each method in order until one succeeds.
pub(crate) async fn authenticate(
    session: &mut Handle<SshHandler>,
    user: &str,
    methods: &[AuthMethod],
) -> Result<()> {
    for method in methods {
        tracing::debug!("trying authentication with {}", method);
        let result = match method {
            AuthMethod::Certificate { cert, key } => authenticate_certificate(session, user, cert, key).await,
            AuthMethod::Key(path) => authenticate_key(session, user, path).await,
            AuthMethod::Agent => authenticate_agent(session, user).await,
            AuthMethod::Pkcs11(provider) => {
                tracing::warn!("PKCS11 provider {} cannot be used by this engine", provider);
                Ok(false)
            }
        };

        match result {
            Ok(true) => return Ok(()),
            Ok(false) => continue,
            Err(e) => tracing::debug!("{} failed: {}", method, e),
        }
    }

    Err(Error::AuthenticationFailed)
}

async fn authenticate_key(session: &mut Handle<SshHandler>, user: &str, path: &PathBuf) -> Result<bool> {
    let key = load_secret_key(path, None).map_err(|e| Error::KeyLoadFailed {
        path: path.clone(),
        reason: e.to_string(),
    })?;

    let hash_alg = session
        .best_supported_rsa_hash()
        .await
        .map_err(Error::Protocol)?
        .flatten();

    let result = session
        .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
        .await
        .map_err(Error::Protocol)?;

    Ok(result.success())
}

async fn authenticate_certificate(
    session: &mut Handle<SshHandler>,
    user: &str,
    cert: &PathBuf,
    key: &PathBuf,
) -> Result<bool> {
    let secret = load_secret_key(key, None).map_err(|e| Error::KeyLoadFailed {
        path: key.clone(),
        reason: e.to_string(),
    })?;
    let certificate = load_openssh_certificate(cert).map_err(|e| Error::KeyLoadFailed {
        path: cert.clone(),
        reason: e.to_string(),
    })?;

    let result = session
        .authenticate_openssh_cert(user, Arc::new(secret), certificate)
        .await
        .map_err(Error::Protocol)?;

    Ok(result.success())
}

async fn authenticate_agent(session: &mut Handle<SshHandler>, user: &str) -> Result<bool> {
    let mut agent = AgentClient::connect_env()
        .await
        .map_err(|e| Error::AgentUnavailable(e.to_string()))?;

    let keys = agent
        .request_identities()
        .await
        .map_err(|e| Error::AgentUnavailable(format!("failed to list agent keys: {}", e)))?;

    if keys.is_empty() {
        return Err(Error::AgentUnavailable("no keys in SSH agent".to_string()));
    }

    for key in &keys {
        match session
            .authenticate_publickey_with(user, key.clone(), None, &mut agent)
            .await
        {
            Ok(result) if result.success() => return Ok(true),
            _ => continue,
        }
    }
    Ok(false)
}
