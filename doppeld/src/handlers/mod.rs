//! Protocol handlers for accepted connections.
//!
//! A handler is picked per service by substring match against an
//! ordered table; anything without a dedicated handler falls back to a
//! hex dump of whatever the client sends.

pub mod http;
pub mod ipp;

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// Connection stream as the handlers see it, TLS or plain.
pub trait ClientStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> ClientStream for T {}

/// Everything a handler needs for one connection. Created at accept
/// time, dropped when the handler returns.
pub struct HandlerContext {
    pub service: String,
    pub peer: SocketAddr,
    pub stream: Box<dyn ClientStream>,
    pub srv_host: String,
    pub srv_port: u16,
    pub srv_tls: bool,
    /// Per-service printer attribute overrides.
    pub ipp_overrides: HashMap<String, String>,
    /// Per-service HTTP path -> body overrides.
    pub http_paths: HashMap<String, String>,
    pub save_path: PathBuf,
}

pub type HandlerFn = fn(HandlerContext) -> Pin<Box<dyn Future<Output = ()> + Send>>;

pub struct HandlerSpec {
    pub needle: &'static str,
    pub requires_tls: bool,
    pub run: HandlerFn,
}

// Order matters: the secure variants must match before their plain
// prefixes do.
// TODO: autodetect the protocol by peeking at the first client bytes.
pub const TCP_HANDLERS: &[HandlerSpec] = &[
    HandlerSpec {
        needle: "_ipps",
        requires_tls: true,
        run: |ctx| Box::pin(ipp::handle(ctx)),
    },
    HandlerSpec {
        needle: "_ipp",
        requires_tls: false,
        run: |ctx| Box::pin(ipp::handle(ctx)),
    },
    HandlerSpec {
        needle: "_https",
        requires_tls: true,
        run: |ctx| Box::pin(http::handle(ctx)),
    },
    HandlerSpec {
        needle: "_http",
        requires_tls: false,
        run: |ctx| Box::pin(http::handle(ctx)),
    },
];

/// First table entry whose needle occurs in the service name.
pub fn select(service: &str) -> Option<&'static HandlerSpec> {
    TCP_HANDLERS.iter().find(|spec| service.contains(spec.needle))
}

/// Fallback for services nothing in the table matches: log a hex dump
/// of everything the client sends until it hangs up.
pub async fn handle_dump(mut ctx: HandlerContext) {
    let mut buf = [0u8; 4096];
    loop {
        match ctx.stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                tracing::info!(
                    "{} <- {} ({n} bytes):\n{}",
                    ctx.service,
                    ctx.peer,
                    hexdump(&buf[..n])
                );
            }
            Err(e) => {
                tracing::warn!("error reading from {}: {e}", ctx.peer);
                break;
            }
        }
    }
}

/// Classic 16-byte-per-row dump with an ASCII gutter.
pub fn hexdump(data: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in data.chunks(16).enumerate() {
        out.push_str(&format!("{:08x}  ", row * 16));
        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => out.push_str(&format!("{b:02x} ")),
                None => out.push_str("   "),
            }
            if i == 7 {
                out.push(' ');
            }
        }
        out.push('|');
        for b in chunk {
            out.push(if b.is_ascii_graphic() || *b == b' ' {
                *b as char
            } else {
                '.'
            });
        }
        out.push_str("|\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_variants_match_before_plain() {
        let spec = select("Printer._ipps._tcp.local").unwrap();
        assert_eq!(spec.needle, "_ipps");
        assert!(spec.requires_tls);

        let spec = select("Printer._ipp._tcp.local").unwrap();
        assert_eq!(spec.needle, "_ipp");
        assert!(!spec.requires_tls);

        let spec = select("Web._https._tcp.local").unwrap();
        assert!(spec.requires_tls);

        assert!(select("Files._smb._tcp.local").is_none());
    }

    #[test]
    fn hexdump_renders_ascii_gutter() {
        let dump = hexdump(b"POST /printer\x00\x01");
        assert!(dump.starts_with("00000000  50 4f 53 54 "));
        assert!(dump.contains("|POST /printer..|"));
    }
}
