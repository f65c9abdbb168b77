// ABOUTME: Resolves the terminal log file path for a session.
// ABOUTME: Expands ~, <Date> and <Hostname> in the directory template and creates it.

use chrono::{DateTime, Local};
use std::path::PathBuf;

/// Server name without its `<source>:` registry prefix.
pub fn display_name(server: &str) -> &str {
    match server.split_once(':') {
        Some((_, host)) => host,
        None => server,
    }
}

/// Substitute placeholders in a log directory template.
pub fn expand_dir(template: &str, server: &str, now: DateTime<Local>) -> PathBuf {
    let dir = template
        .replacen("<Date>", &now.format("%Y%m%d").to_string(), 1)
        .replacen("<Hostname>", server, 1);
    crate::config::expand_tilde(&dir)
}

/// `<YYYYMMDD_HHMMSS>_<server>.log`
pub fn file_name(server: &str, now: DateTime<Local>) -> String {
    format!("{}_{}.log", now.format("%Y%m%d_%H%M%S"), server)
}

/// Build the log file path for `server`, creating the directory if needed.
pub fn resolve(template: &str, server: &str, now: DateTime<Local>) -> std::io::Result<PathBuf> {
    let server = display_name(server);
    let dir = expand_dir(template, server, now);
    create_dir(&dir)?;
    Ok(dir.join(file_name(server, now)))
}

#[cfg(unix)]
fn create_dir(dir: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_dir(dir: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}
