// ABOUTME: Builds the remote command that starts a shell with a local rc file.
// ABOUTME: The rc payload travels inline as base64 (optionally gzipped) via process substitution.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;
use std::path::PathBuf;

pub const DEFAULT_RC_PATH: &str = "~/.bashrc";
pub const DEFAULT_UNCOMPRESS_CMD: &str = "gzip -d";

/// Picks whichever base64 flavour the remote host has: GNU coreutils
/// decodes with `-d`, BSD/macOS with `-D`.
pub const PROBE_DECODER: &str =
    "( (base64 --help | grep -q coreutils) && base64 -d <(cat) || base64 -D <(cat) )";

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("failed to read rc file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to compress rc payload: {0}")]
    Compress(std::io::Error),
}

/// How the remote side turns the text payload back into bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoder {
    /// Probe for the available base64 utility at run time.
    Probe,
    /// A user-supplied decode command, used verbatim.
    Custom(String),
}

impl Decoder {
    fn from_option(cmd: Option<&str>) -> Self {
        match cmd {
            Some(cmd) if !cmd.is_empty() => Decoder::Custom(cmd.to_string()),
            _ => Decoder::Probe,
        }
    }

    fn command(&self) -> &str {
        match self {
            Decoder::Probe => PROBE_DECODER,
            Decoder::Custom(cmd) => cmd,
        }
    }
}

/// Command template parameterized by compression and decoder choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapTemplate {
    pub decoder: Decoder,
    /// Decompression filter; `None` when the payload is not compressed.
    pub decompress: Option<String>,
}

impl BootstrapTemplate {
    pub fn new(compress: bool, decoder: Option<&str>, uncompress: Option<&str>) -> Self {
        let decompress = compress.then(|| match uncompress {
            Some(cmd) if !cmd.is_empty() => cmd.to_string(),
            _ => DEFAULT_UNCOMPRESS_CMD.to_string(),
        });

        Self {
            decoder: Decoder::from_option(decoder),
            decompress,
        }
    }

    pub fn compress(&self) -> bool {
        self.decompress.is_some()
    }

    /// Render the remote command around an already encoded payload.
    pub fn render(&self, payload: &str) -> String {
        let mut pipeline = format!("echo {} | {}", payload, self.decoder.command());
        if let Some(decompress) = &self.decompress {
            pipeline.push_str(" | ");
            pipeline.push_str(decompress);
        }
        format!("bash --noprofile --rcfile <({})", pipeline)
    }
}

/// Options taken from the server descriptor.
#[derive(Debug, Clone, Default)]
pub struct Bootstrap {
    pub paths: Vec<String>,
    pub compress: bool,
    pub decode_cmd: Option<String>,
    pub uncompress_cmd: Option<String>,
}

impl Bootstrap {
    pub fn from_server(server: &crate::config::ServerDescriptor) -> Self {
        Self {
            paths: server.local_rc_paths.clone(),
            compress: server.local_rc_compress,
            decode_cmd: server.local_rc_decode_cmd.clone(),
            uncompress_cmd: server.local_rc_uncompress_cmd.clone(),
        }
    }

    pub fn template(&self) -> BootstrapTemplate {
        BootstrapTemplate::new(
            self.compress,
            self.decode_cmd.as_deref(),
            self.uncompress_cmd.as_deref(),
        )
    }

    /// Read the rc files and produce the remote shell command.
    pub fn command(&self) -> Result<String, BootstrapError> {
        let raw = self.read_files()?;
        let template = self.template();
        let payload = encode_payload(&raw, template.compress())?;
        Ok(template.render(&payload))
    }

    fn read_files(&self) -> Result<Vec<u8>, BootstrapError> {
        let default = [DEFAULT_RC_PATH.to_string()];
        let paths: &[String] = if self.paths.is_empty() {
            &default
        } else {
            &self.paths
        };

        let mut data = Vec::new();
        for path in paths {
            let full = crate::config::expand_tilde(path);
            let content = std::fs::read(&full).map_err(|source| BootstrapError::Read {
                path: full.clone(),
                source,
            })?;
            data.extend_from_slice(&content);
            if !content.ends_with(b"\n") {
                data.push(b'\n');
            }
        }
        Ok(data)
    }
}

/// Optionally gzip, then base64-encode. The base64 alphabet never contains
/// shell metacharacters, so the payload is safe unquoted after `echo`.
pub fn encode_payload(data: &[u8], compress: bool) -> Result<String, BootstrapError> {
    if !compress {
        return Ok(STANDARD.encode(data));
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(BootstrapError::Compress)?;
    let compressed = encoder.finish().map_err(BootstrapError::Compress)?;
    Ok(STANDARD.encode(compressed))
}
