// ABOUTME: Human-readable connection summary printed before connecting.
// ABOUTME: Lists the merged forwards, proxy chain, and local rc use.

use crate::config::ServerDescriptor;
use crate::logpath::display_name;
use std::fmt::Write;

fn line(out: &mut String, label: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "{:<14}:{}", label, value);
}

fn optional(out: &mut String, label: &str, value: &Option<String>) {
    if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
        line(out, label, value);
    }
}

pub fn render(name: &str, server: &ServerDescriptor) -> String {
    let mut out = String::new();

    line(&mut out, "Select Server", display_name(name));
    line(
        &mut out,
        "Connect To",
        format!(
            "{}@{}:{}",
            server.user,
            server.addr,
            server.port_number().map(|p| p.to_string()).unwrap_or_else(|_| server.port.clone())
        ),
    );

    for fw in &server.forwards {
        line(&mut out, "Port Forward", format!("{} {} => {}", fw.direction, fw.bind, fw.target));
    }
    optional(&mut out, "Dynamic", &server.dynamic_forward);
    optional(&mut out, "Reverse Dyn", &server.reverse_dynamic_forward);
    optional(&mut out, "HTTP Dynamic", &server.http_dynamic_forward);
    optional(&mut out, "HTTP Reverse", &server.http_reverse_dynamic_forward);
    if let Some((port, path)) = server.nfs_forward.endpoint() {
        line(&mut out, "NFS Forward", format!("{} => {}", port, path));
    }
    if let Some((port, path)) = server.nfs_reverse_forward.endpoint() {
        line(&mut out, "NFS Reverse", format!("{} => {}", port, path));
    }
    optional(&mut out, "Proxy", &server.proxy_command);
    if server.local_rc.is_enabled() {
        line(&mut out, "Information", "This connect use local bashrc.");
    }

    out
}
