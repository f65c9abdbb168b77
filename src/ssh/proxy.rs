// ABOUTME: SOCKS5 and HTTP proxy front ends shared by forward and reverse dynamic forwards.
// ABOUTME: Generic over the client stream and the dialer, so one code path serves both directions.

use super::error::{Error, Result};
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, copy_bidirectional};

/// SOCKS5 protocol constants
mod socks5 {
    pub const VERSION: u8 = 0x05;
    pub const AUTH_NONE: u8 = 0x00;
    pub const AUTH_UNACCEPTABLE: u8 = 0xFF;
    pub const CMD_CONNECT: u8 = 0x01;
    pub const ATYP_IPV4: u8 = 0x01;
    pub const ATYP_DOMAIN: u8 = 0x03;
    pub const ATYP_IPV6: u8 = 0x04;
    pub const REP_SUCCESS: u8 = 0x00;
    pub const REP_HOST_UNREACHABLE: u8 = 0x04;
    pub const REP_CMD_NOT_SUPPORTED: u8 = 0x07;
    pub const REP_ADDR_NOT_SUPPORTED: u8 = 0x08;
}

const MAX_HTTP_HEAD: usize = 64 * 1024;

/// Destination requested by a proxy client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Serve one SOCKS5 client: negotiate, dial the destination, then relay.
pub(crate) async fn serve_socks5<S, D, F, T>(mut client: S, dial: D) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    D: FnOnce(Target) -> F,
    F: Future<Output = Result<T>>,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let target = socks5_handshake(&mut client).await?;
    tracing::debug!("SOCKS5: connecting to {}", target);

    let mut upstream = match dial(target.clone()).await {
        Ok(upstream) => upstream,
        Err(e) => {
            socks5_reply(&mut client, socks5::REP_HOST_UNREACHABLE).await?;
            return Err(e);
        }
    };
    socks5_reply(&mut client, socks5::REP_SUCCESS).await?;

    relay(&mut client, &mut upstream).await
}

async fn socks5_handshake<S>(stream: &mut S) -> Result<Target>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 258];

    stream
        .read_exact(&mut buf[..2])
        .await
        .map_err(|e| Error::Proxy(format!("failed to read SOCKS5 greeting: {}", e)))?;
    if buf[0] != socks5::VERSION {
        return Err(Error::Proxy(format!("unsupported SOCKS version: {}", buf[0])));
    }

    let nmethods = buf[1] as usize;
    stream
        .read_exact(&mut buf[..nmethods])
        .await
        .map_err(|e| Error::Proxy(format!("failed to read auth methods: {}", e)))?;

    if !buf[..nmethods].contains(&socks5::AUTH_NONE) {
        stream
            .write_all(&[socks5::VERSION, socks5::AUTH_UNACCEPTABLE])
            .await
            .ok();
        return Err(Error::Proxy("client does not offer NO AUTH".to_string()));
    }
    stream.write_all(&[socks5::VERSION, socks5::AUTH_NONE]).await?;

    stream
        .read_exact(&mut buf[..4])
        .await
        .map_err(|e| Error::Proxy(format!("failed to read SOCKS5 request: {}", e)))?;
    let (cmd, atyp) = (buf[1], buf[3]);

    if cmd != socks5::CMD_CONNECT {
        socks5_reply(stream, socks5::REP_CMD_NOT_SUPPORTED).await?;
        return Err(Error::Proxy(format!("unsupported SOCKS5 command: {}", cmd)));
    }

    let host = match atyp {
        socks5::ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            std::net::Ipv4Addr::from(octets).to_string()
        }
        socks5::ATYP_DOMAIN => {
            stream.read_exact(&mut buf[..1]).await?;
            let len = buf[0] as usize;
            stream.read_exact(&mut buf[..len]).await?;
            String::from_utf8_lossy(&buf[..len]).into_owned()
        }
        socks5::ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            std::net::Ipv6Addr::from(octets).to_string()
        }
        other => {
            socks5_reply(stream, socks5::REP_ADDR_NOT_SUPPORTED).await?;
            return Err(Error::Proxy(format!("unsupported address type: {}", other)));
        }
    };

    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;

    Ok(Target {
        host,
        port: u16::from_be_bytes(port),
    })
}

async fn socks5_reply<S>(stream: &mut S, status: u8) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    // VER | REP | RSV | ATYP | BND.ADDR | BND.PORT, bound address always 0.0.0.0:0
    let reply = [socks5::VERSION, status, 0x00, socks5::ATYP_IPV4, 0, 0, 0, 0, 0, 0];
    stream
        .write_all(&reply)
        .await
        .map_err(|e| Error::Proxy(format!("failed to send SOCKS5 reply: {}", e)))
}

/// A parsed proxy request head.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HttpRequest {
    /// `CONNECT host:port`; the tunnel is opaque after the 200 reply.
    Connect(Target),
    /// Absolute-form request; `head` is rewritten to origin form and must be
    /// sent upstream before relaying.
    Forward { target: Target, head: Vec<u8> },
}

/// Serve one HTTP proxy client: read the request head, dial, then relay.
pub(crate) async fn serve_http<S, D, F, T>(mut client: S, dial: D) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    D: FnOnce(Target) -> F,
    F: Future<Output = Result<T>>,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (raw, leftover) = read_http_head(&mut client).await?;
    let request = match parse_http_request(&raw) {
        Ok(request) => request,
        Err(e) => {
            client.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await.ok();
            return Err(e);
        }
    };

    let target = match &request {
        HttpRequest::Connect(target) | HttpRequest::Forward { target, .. } => target.clone(),
    };
    tracing::debug!("HTTP proxy: connecting to {}", target);

    let mut upstream = match dial(target).await {
        Ok(upstream) => upstream,
        Err(e) => {
            client.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await.ok();
            return Err(e);
        }
    };

    match request {
        HttpRequest::Connect(_) => {
            client
                .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                .await?;
        }
        HttpRequest::Forward { head, .. } => {
            upstream.write_all(&head).await?;
        }
    }
    if !leftover.is_empty() {
        upstream.write_all(&leftover).await?;
    }

    relay(&mut client, &mut upstream).await
}

/// Read until the blank line ending the head. Returns the head and any bytes
/// read past it.
async fn read_http_head<S>(stream: &mut S) -> Result<(Vec<u8>, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut data = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    loop {
        if let Some(end) = find_subsequence(&data, b"\r\n\r\n") {
            let leftover = data.split_off(end + 4);
            return Ok((data, leftover));
        }
        if data.len() > MAX_HTTP_HEAD {
            return Err(Error::Proxy("HTTP request head too large".to_string()));
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::Proxy("connection closed before request head".to_string()));
        }
        data.extend_from_slice(&chunk[..n]);
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

pub(crate) fn parse_http_request(raw: &[u8]) -> Result<HttpRequest> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| Error::Proxy("request head is not valid UTF-8".to_string()))?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (method, uri, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(u), Some(v)) => (m, u, v),
        _ => return Err(Error::Proxy(format!("malformed request line: {}", request_line))),
    };

    if method.eq_ignore_ascii_case("CONNECT") {
        return Ok(HttpRequest::Connect(parse_authority(uri, 443)?));
    }

    let rest = uri
        .strip_prefix("http://")
        .ok_or_else(|| Error::Proxy(format!("not an absolute-form URI: {}", uri)))?;
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };
    let target = parse_authority(authority, 80)?;

    let mut head = format!("{} {} {}\r\n", method, path, version);
    for line in lines.filter(|l| !l.is_empty()) {
        let name = line.split(':').next().unwrap_or_default().trim();
        if name.eq_ignore_ascii_case("proxy-connection") {
            continue;
        }
        head.push_str(line);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");

    Ok(HttpRequest::Forward {
        target,
        head: head.into_bytes(),
    })
}

fn parse_authority(authority: &str, default_port: u16) -> Result<Target> {
    let invalid = || Error::InvalidEndpoint(authority.to_string());

    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        match tail.strip_prefix(':') {
            Some(port) => (host, port.parse().map_err(|_| invalid())?),
            None => (host, default_port),
        }
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().map_err(|_| invalid())?),
            None => (authority, default_port),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }
    Ok(Target {
        host: host.to_string(),
        port,
    })
}

async fn relay<A, B>(a: &mut A, b: &mut B) -> Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    match copy_bidirectional(a, b).await {
        Ok((up, down)) => {
            tracing::debug!("proxy relay closed ({} bytes up, {} bytes down)", up, down);
            Ok(())
        }
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn connect_request_parses_authority() {
        let req = parse_http_request(b"CONNECT example.com:8443 HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();
        assert_eq!(
            req,
            HttpRequest::Connect(Target {
                host: "example.com".into(),
                port: 8443
            })
        );
    }

    #[test]
    fn absolute_form_is_rewritten_to_origin_form() {
        let req = parse_http_request(
            b"GET http://example.com/index.html HTTP/1.1\r\nHost: example.com\r\nProxy-Connection: keep-alive\r\n\r\n",
        )
        .unwrap();
        match req {
            HttpRequest::Forward { target, head } => {
                assert_eq!(target.port, 80);
                assert_eq!(
                    String::from_utf8(head).unwrap(),
                    "GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n"
                );
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn origin_form_request_is_rejected() {
        assert!(parse_http_request(b"GET /index.html HTTP/1.1\r\n\r\n").is_err());
    }

    #[test]
    fn ipv6_authority() {
        let target = parse_authority("[::1]:8080", 80).unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.port, 8080);
    }

    #[tokio::test]
    async fn socks5_connect_by_domain_relays_data() {
        let (mut client, server) = duplex(1024);
        let (upstream_near, mut upstream_far) = duplex(1024);

        let task = tokio::spawn(async move {
            serve_socks5(server, |target| async move {
                assert_eq!(target.host, "db.internal");
                assert_eq!(target.port, 5432);
                Ok(upstream_near)
            })
            .await
        });

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x00]);

        let mut request = vec![0x05, 0x01, 0x00, 0x03, 11];
        request.extend_from_slice(b"db.internal");
        request.extend_from_slice(&5432u16.to_be_bytes());
        client.write_all(&request).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 0x00);

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream_far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(client);
        drop(upstream_far);
        let _ = task.await.unwrap();
    }

    #[tokio::test]
    async fn socks5_dial_failure_replies_host_unreachable() {
        let (mut client, server) = duplex(1024);

        let task = tokio::spawn(async move {
            serve_socks5(server, |_target| async move {
                Err::<tokio::io::DuplexStream, _>(Error::Channel("refused".into()))
            })
            .await
        });

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();

        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 10, 0, 0, 1, 0x00, 0x50])
            .await
            .unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], 0x04);

        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn http_connect_replies_established() {
        let (mut client, server) = duplex(1024);
        let (upstream_near, mut upstream_far) = duplex(1024);

        let task = tokio::spawn(async move { serve_http(server, |_t| async move { Ok(upstream_near) }).await });

        client
            .write_all(b"CONNECT example.com:443 HTTP/1.1\r\n\r\nhello")
            .await
            .unwrap();

        let expected = b"HTTP/1.1 200 Connection Established\r\n\r\n";
        let mut reply = vec![0u8; expected.len()];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, expected);

        let mut buf = [0u8; 5];
        upstream_far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        drop(client);
        drop(upstream_far);
        let _ = task.await.unwrap();
    }
}
