// ABOUTME: TCP port forwarding over an SSH connection.
// ABOUTME: Static local/remote tunnels, SOCKS5 and HTTP proxies, and agent channel relay.

use super::client::SshHandler;
use super::error::{Error, Result};
use super::proxy::{self, Target};
use parking_lot::Mutex;
use russh::client::{Handle, Msg};
use russh::{Channel, ChannelStream};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream, UnixStream};
use tokio::task::JoinHandle;

/// `tcpip_forward` needs `&mut Handle`, so the handle is shared behind an async mutex.
pub(crate) type SharedHandle = Arc<tokio::sync::Mutex<Handle<SshHandler>>>;

const CLOSED_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What to do with a channel the server opens for a remote listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RemoteRoute {
    Static(Target),
    Socks,
    Http,
}

/// Remote listener port to route, shared with the connection handler.
#[derive(Debug, Clone, Default)]
pub(crate) struct RouteTable(Arc<Mutex<HashMap<u32, RemoteRoute>>>);

impl RouteTable {
    pub(crate) fn insert(&self, port: u32, route: RemoteRoute) {
        self.0.lock().insert(port, route);
    }

    pub(crate) fn remove(&self, port: u32) {
        self.0.lock().remove(&port);
    }

    pub(crate) fn get(&self, port: u32) -> Option<RemoteRoute> {
        self.0.lock().get(&port).cloned()
    }
}

/// Parse `host:port`, `[v6]:port`, or a bare port (bound on localhost).
pub(crate) fn parse_endpoint(spec: &str) -> Result<Target> {
    let invalid = || Error::InvalidEndpoint(spec.to_string());

    let (host, port) = match spec.rsplit_once(':') {
        Some((host, port)) => (host.trim_start_matches('[').trim_end_matches(']'), port),
        None => ("localhost", spec),
    };
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    if host.is_empty() {
        return Err(invalid());
    }

    Ok(Target {
        host: host.to_string(),
        port,
    })
}

/// Join a dynamic-forward address and port into one endpoint.
fn dynamic_endpoint(address: &str, port: &str) -> Result<Target> {
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::InvalidEndpoint(format!("{}:{}", address, port)))?;
    Ok(Target {
        host: address.to_string(),
        port,
    })
}

async fn bind(endpoint: &Target) -> Result<TcpListener> {
    TcpListener::bind((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|e| Error::forward(endpoint.to_string(), format!("failed to bind: {}", e)))
}

/// Accept connections until the listener fails, serving each on its own task.
async fn serve_listener<F, Fut>(listener: TcpListener, spec: String, serve: F) -> Result<()>
where
    F: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| Error::forward(spec.clone(), format!("accept failed: {}", e)))?;

        tracing::debug!("{}: accepted connection from {}", spec, peer);
        let conn = serve(stream, peer);
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("Forward connection error: {}", e);
            }
        });
    }
}

/// Open a direct-tcpip channel to `target` on behalf of `origin`.
async fn open_direct(
    handle: SharedHandle,
    target: Target,
    origin: SocketAddr,
) -> Result<ChannelStream<Msg>> {
    let channel = handle
        .lock()
        .await
        .channel_open_direct_tcpip(
            target.host.clone(),
            target.port as u32,
            origin.ip().to_string(),
            origin.port() as u32,
        )
        .await
        .map_err(|e| Error::Channel(format!("failed to open tunnel to {}: {}", target, e)))?;

    Ok(channel.into_stream())
}

async fn dial_local(target: Target) -> Result<TcpStream> {
    TcpStream::connect((target.host.as_str(), target.port))
        .await
        .map_err(Error::Io)
}

/// Bind `bind` locally and tunnel each accepted connection to `target`.
pub(crate) async fn start_local_forward(
    handle: SharedHandle,
    bind_spec: &str,
    target_spec: &str,
) -> Result<JoinHandle<()>> {
    let endpoint = parse_endpoint(bind_spec)?;
    let target = parse_endpoint(target_spec)?;
    let listener = bind(&endpoint).await?;
    let spec = format!("L {} -> {}", bind_spec, target_spec);

    tracing::debug!("{}: listening", spec);
    Ok(tokio::spawn(async move {
        let result = serve_listener(listener, spec, move |mut local, peer| {
            let handle = handle.clone();
            let target = target.clone();
            async move {
                let mut remote = open_direct(handle, target, peer).await?;
                copy_bidirectional(&mut local, &mut remote).await?;
                Ok(())
            }
        })
        .await;

        if let Err(e) = result {
            tracing::warn!("{}", e);
        }
    }))
}

/// Ask the server to listen on `bind_spec` and route its channels by `route`.
/// Returns the port the server bound.
pub(crate) async fn request_remote_forward(
    handle: &SharedHandle,
    routes: &RouteTable,
    bind_spec: &str,
    route: RemoteRoute,
) -> Result<u32> {
    let endpoint = parse_endpoint(bind_spec)?;
    request_remote_endpoint(handle, routes, &endpoint, route).await
}

async fn request_remote_endpoint(
    handle: &SharedHandle,
    routes: &RouteTable,
    endpoint: &Target,
    route: RemoteRoute,
) -> Result<u32> {
    let requested = endpoint.port as u32;

    // Register first so a channel arriving right after the reply finds its route.
    if requested != 0 {
        routes.insert(requested, route.clone());
    }

    let result = handle
        .lock()
        .await
        .tcpip_forward(endpoint.host.clone(), requested)
        .await;

    match result {
        Ok(bound) => {
            let port = if requested == 0 { bound } else { requested };
            routes.insert(port, route);
            tracing::debug!("remote listener on {}:{}", endpoint.host, port);
            Ok(port)
        }
        Err(e) => {
            routes.remove(requested);
            Err(Error::forward(endpoint.to_string(), format!("server refused listener: {}", e)))
        }
    }
}

/// Serve a channel the server opened for one of our remote listeners.
pub(crate) async fn serve_forwarded(channel: Channel<Msg>, route: RemoteRoute) -> Result<()> {
    let mut stream = channel.into_stream();
    match route {
        RemoteRoute::Static(target) => {
            let mut local = dial_local(target).await?;
            copy_bidirectional(&mut stream, &mut local).await?;
            Ok(())
        }
        RemoteRoute::Socks => proxy::serve_socks5(stream, dial_local).await,
        RemoteRoute::Http => proxy::serve_http(stream, dial_local).await,
    }
}

/// Relay an agent channel to the local agent socket.
pub(crate) async fn serve_agent(channel: Channel<Msg>) -> Result<()> {
    let path = std::env::var("SSH_AUTH_SOCK")
        .map_err(|_| Error::AgentUnavailable("SSH_AUTH_SOCK is not set".to_string()))?;
    let mut agent = UnixStream::connect(&path)
        .await
        .map_err(|e| Error::AgentUnavailable(format!("{}: {}", path, e)))?;

    let mut stream = channel.into_stream();
    copy_bidirectional(&mut stream, &mut agent).await?;
    Ok(())
}

/// Local SOCKS5 proxy dialing through the connection. Runs until the
/// listener fails.
pub(crate) async fn run_socks_forward(handle: SharedHandle, address: &str, port: &str) -> Result<()> {
    let endpoint = dynamic_endpoint(address, port)?;
    let listener = bind(&endpoint).await?;

    serve_listener(listener, format!("D {}", endpoint), move |local, peer| {
        let handle = handle.clone();
        async move { proxy::serve_socks5(local, |target| open_direct(handle, target, peer)).await }
    })
    .await
}

/// Local HTTP proxy dialing through the connection. Runs until the
/// listener fails.
pub(crate) async fn run_http_forward(handle: SharedHandle, address: &str, port: &str) -> Result<()> {
    let endpoint = dynamic_endpoint(address, port)?;
    let listener = bind(&endpoint).await?;

    serve_listener(listener, format!("HTTP {}", endpoint), move |local, peer| {
        let handle = handle.clone();
        async move { proxy::serve_http(local, |target| open_direct(handle, target, peer)).await }
    })
    .await
}

/// Remote proxy listener whose channels are served locally. Runs until the
/// connection closes.
pub(crate) async fn run_reverse_proxy(
    handle: SharedHandle,
    routes: RouteTable,
    address: &str,
    port: &str,
    route: RemoteRoute,
) -> Result<()> {
    let endpoint = dynamic_endpoint(address, port)?;
    let bound = request_remote_endpoint(&handle, &routes, &endpoint, route).await?;

    loop {
        tokio::time::sleep(CLOSED_POLL_INTERVAL).await;
        if handle.lock().await.is_closed() {
            routes.remove(bound);
            return Err(Error::Disconnected(format!(
                "reverse proxy on {}:{} stopped",
                endpoint.host, bound
            )));
        }
    }
}
