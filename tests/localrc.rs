// ABOUTME: Integration tests for the local rc bootstrap command.
// ABOUTME: Decodes the generated payload back into the concatenated rc files.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::read::GzDecoder;
use sshmux::config::{LocalRcUse, ServerDescriptor};
use sshmux::localrc::{Bootstrap, BootstrapError, PROBE_DECODER};
use std::fs;
use std::io::Read;
use tempfile::TempDir;

fn rc_files(dir: &TempDir) -> Vec<String> {
    let first = dir.path().join("bashrc");
    let second = dir.path().join("aliases");
    fs::write(&first, "export EDITOR=vim").unwrap();
    fs::write(&second, "alias gs='git status'\n").unwrap();
    vec![
        first.to_string_lossy().into_owned(),
        second.to_string_lossy().into_owned(),
    ]
}

fn payload<'a>(command: &'a str, pipeline_tail: &str) -> &'a str {
    command
        .strip_prefix("bash --noprofile --rcfile <(echo ")
        .and_then(|rest| rest.strip_suffix(&format!(" | {})", pipeline_tail)))
        .unwrap_or_else(|| panic!("unexpected command: {}", command))
}

#[test]
fn plain_payload_concatenates_files_with_newlines() {
    let dir = tempfile::tempdir().unwrap();
    let bootstrap = Bootstrap {
        paths: rc_files(&dir),
        ..Default::default()
    };

    let command = bootstrap.command().unwrap();
    let decoded = STANDARD.decode(payload(&command, PROBE_DECODER)).unwrap();

    assert_eq!(
        String::from_utf8(decoded).unwrap(),
        "export EDITOR=vim\nalias gs='git status'\n"
    );
}

#[test]
fn compressed_payload_is_gzip_stream() {
    let dir = tempfile::tempdir().unwrap();
    let bootstrap = Bootstrap {
        paths: rc_files(&dir),
        compress: true,
        decode_cmd: Some("base64 -d".into()),
        uncompress_cmd: None,
    };

    let command = bootstrap.command().unwrap();
    let compressed = STANDARD.decode(payload(&command, "base64 -d | gzip -d")).unwrap();

    let mut text = String::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_string(&mut text)
        .unwrap();
    assert_eq!(text, "export EDITOR=vim\nalias gs='git status'\n");
}

#[test]
fn options_come_from_server_descriptor() {
    let mut server = ServerDescriptor::new("box", "root");
    server.local_rc = LocalRcUse::Enabled;
    server.local_rc_paths = vec!["~/.bashrc.d/remote".into()];
    server.local_rc_compress = true;
    server.local_rc_uncompress_cmd = Some("zcat".into());

    let bootstrap = Bootstrap::from_server(&server);
    assert_eq!(bootstrap.paths, vec!["~/.bashrc.d/remote".to_string()]);
    let template = bootstrap.template();
    assert!(template.compress());
    assert_eq!(template.decompress.as_deref(), Some("zcat"));
}

#[test]
fn unreadable_file_names_the_path() {
    let bootstrap = Bootstrap {
        paths: vec!["/nonexistent/sshmux/rc".into()],
        ..Default::default()
    };

    match bootstrap.command() {
        Err(BootstrapError::Read { path, .. }) => {
            assert_eq!(path, std::path::PathBuf::from("/nonexistent/sshmux/rc"));
        }
        other => panic!("expected read error, got {:?}", other),
    }
}
