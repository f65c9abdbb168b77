// ABOUTME: Library root for sshmux - exposes public types for testing.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod localrc;
pub mod logpath;
pub mod session;
pub mod ssh;

use config::{Registry, ServerDescriptor};
use error::{Error, Result};

/// Pick the registry entry named `name`, by full key or by bare host token.
pub fn select_server<'a>(registry: &'a Registry, name: &str) -> Result<(&'a str, &'a ServerDescriptor)> {
    let matches = registry.find(name);
    match matches.as_slice() {
        [key] => registry
            .get(key)
            .map(|server| (*key, server))
            .ok_or_else(|| Error::UnknownServer(name.to_string())),
        [] => Err(Error::UnknownServer(name.to_string())),
        _ => Err(Error::AmbiguousServer {
            name: name.to_string(),
            candidates: matches.iter().map(|k| k.to_string()).collect(),
        }),
    }
}
