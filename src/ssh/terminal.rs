// ABOUTME: Local terminal plumbing for interactive shells.
// ABOUTME: Raw mode guard, window size, and a dedicated stdin reader thread.

use std::io::Read;
use tokio::sync::mpsc;

const DEFAULT_COLS: u32 = 80;
const DEFAULT_ROWS: u32 = 24;

/// Terminal type requested for the remote pty.
pub(crate) fn term_type() -> String {
    std::env::var("TERM")
        .ok()
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "xterm".to_string())
}

/// Current window size as (cols, rows).
pub(crate) fn window_size() -> (u32, u32) {
    if let Some(size) = ioctl_window_size() {
        return size;
    }

    let env = |name: &str| std::env::var(name).ok().and_then(|v| v.parse::<u32>().ok());
    (
        env("COLUMNS").unwrap_or(DEFAULT_COLS),
        env("LINES").unwrap_or(DEFAULT_ROWS),
    )
}

#[cfg(unix)]
fn ioctl_window_size() -> Option<(u32, u32)> {
    // SAFETY: TIOCGWINSZ only writes into the winsize struct we own.
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut ws) };
    (rc == 0 && ws.ws_col > 0 && ws.ws_row > 0).then(|| (ws.ws_col as u32, ws.ws_row as u32))
}

#[cfg(not(unix))]
fn ioctl_window_size() -> Option<(u32, u32)> {
    None
}

/// Puts stdin into raw mode while alive. A no-op when stdin is not a tty.
pub(crate) struct RawModeGuard {
    #[cfg(unix)]
    original: Option<libc::termios>,
}

impl RawModeGuard {
    #[cfg(unix)]
    pub(crate) fn enable() -> Self {
        // SAFETY: tcgetattr/tcsetattr operate on the process's own stdin fd
        // with a termios value we own.
        unsafe {
            if libc::isatty(libc::STDIN_FILENO) != 1 {
                return Self { original: None };
            }
            let mut original: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(libc::STDIN_FILENO, &mut original) != 0 {
                return Self { original: None };
            }
            let mut raw = original;
            libc::cfmakeraw(&mut raw);
            if libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &raw) != 0 {
                return Self { original: None };
            }
            Self {
                original: Some(original),
            }
        }
    }

    #[cfg(not(unix))]
    pub(crate) fn enable() -> Self {
        Self {}
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(original) = &self.original {
            // SAFETY: restores the attributes captured in `enable`.
            unsafe {
                libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, original);
            }
        }
    }
}

/// Read stdin on a detached thread. The thread may stay blocked in `read`
/// after the shell exits and must not be joined.
pub(crate) fn spawn_stdin_reader() -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(64);

    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    rx
}
