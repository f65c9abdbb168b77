// ABOUTME: Normalizes LocalForward/RemoteForward directive values.
// ABOUTME: Bare (optionally signed) integers become localhost endpoints; anything else is kept verbatim.

/// Endpoints of a forward directive after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSpec {
    pub bind: String,
    pub target: String,
}

/// Split `"<bind-spec> <host-spec>"` and normalize both halves.
///
/// Returns `None` when the value does not contain two tokens. No port range
/// or address validation is performed.
pub fn normalize(value: &str) -> Option<ForwardSpec> {
    let (bind, target) = value.trim().split_once(char::is_whitespace)?;
    let target = target.trim_start();
    if bind.is_empty() || target.is_empty() {
        return None;
    }

    Some(ForwardSpec {
        bind: normalize_endpoint(bind),
        target: normalize_endpoint(target),
    })
}

/// Any token that parses as a signed 64-bit integer counts as a bare port,
/// sign included.
fn normalize_endpoint(token: &str) -> String {
    if token.parse::<i64>().is_ok() {
        format!("localhost:{}", token)
    } else {
        token.to_string()
    }
}
