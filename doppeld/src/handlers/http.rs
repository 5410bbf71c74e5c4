//! Minimal HTTP front end shared by the decoy web handler and the IPP
//! handler. Only the request head is parsed; bodies are the caller's
//! problem.

use anyhow::{anyhow, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{hexdump, HandlerContext};

/// Request line and headers of an HTTP/1.x request.
#[derive(Debug)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
    /// Offset of the first body byte in the parsed buffer.
    pub body_offset: usize,
}

impl RequestHead {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let head_end = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .ok_or_else(|| anyhow!("incomplete request head"))?;
        let head = std::str::from_utf8(&raw[..head_end])
            .map_err(|_| anyhow!("request head is not valid utf-8"))?;

        let mut lines = head.split("\r\n");
        let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
        let mut parts = request_line.split_whitespace();
        let method = parts
            .next()
            .ok_or_else(|| anyhow!("missing method"))?
            .to_string();
        let target = parts
            .next()
            .ok_or_else(|| anyhow!("missing request target"))?
            .to_string();
        let version = parts.next().unwrap_or("HTTP/1.0").to_string();

        let mut headers = Vec::new();
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                return Err(anyhow!("malformed header line: {line}"));
            };
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self {
            method,
            target,
            version,
            headers,
            body_offset: head_end + 4,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn user_agent(&self) -> &str {
        self.header("User-Agent").unwrap_or("")
    }

    pub fn expects_continue(&self) -> bool {
        self.header("Expect")
            .is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    }

    pub fn is_chunked(&self) -> bool {
        self.header("Transfer-Encoding")
            .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
    }
}

const NOT_FOUND_BODY: &str = r#"<html>
<head><title>Not Found</title></head>
<body>
<center><h1>Not Found</h1></center>
</body>
</html>"#;

/// Decoy web handler: serve the configured paths, 404 everything else.
pub async fn handle(mut ctx: HandlerContext) {
    let mut buf = [0u8; 4096];
    let read = match ctx.stream.read(&mut buf).await {
        Ok(0) => {
            tracing::debug!("client {} disconnected", ctx.peer);
            return;
        }
        Ok(n) => n,
        Err(e) => {
            tracing::warn!("error reading from {}: {e}", ctx.peer);
            return;
        }
    };

    let head = match RequestHead::parse(&buf[..read]) {
        Ok(head) => head,
        Err(e) => {
            tracing::error!(
                "bad http request from {}: {e}\n{}",
                ctx.peer,
                hexdump(&buf[..read])
            );
            return;
        }
    };

    tracing::info!(
        "{} ({}) > {} {}",
        ctx.peer,
        head.user_agent(),
        head.method,
        head.target
    );

    let (status, reason, body) = match ctx.http_paths.get(&head.target) {
        Some(body) => (200, "OK", body.as_str()),
        None => (404, "Not Found", NOT_FOUND_BODY),
    };

    let response = format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    );

    if let Err(e) = ctx.stream.write_all(response.as_bytes()).await {
        tracing::error!("error writing http response to {}: {e}", ctx.peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tokio::io::AsyncWriteExt;

    fn context(stream: tokio::io::DuplexStream, paths: HashMap<String, String>) -> HandlerContext {
        HandlerContext {
            service: "web._http._tcp.local".to_string(),
            peer: "127.0.0.1:40000".parse().unwrap(),
            stream: Box::new(stream),
            srv_host: "decoy".to_string(),
            srv_port: 8080,
            srv_tls: false,
            ipp_overrides: HashMap::new(),
            http_paths: paths,
            save_path: PathBuf::new(),
        }
    }

    #[test]
    fn parses_head_and_headers() {
        let raw = b"POST /printer HTTP/1.1\r\nHost: x\r\nExpect: 100-continue\r\nTransfer-Encoding: chunked\r\n\r\nBODY";
        let head = RequestHead::parse(raw).unwrap();
        assert_eq!(head.method, "POST");
        assert_eq!(head.target, "/printer");
        assert!(head.expects_continue());
        assert!(head.is_chunked());
        assert_eq!(&raw[head.body_offset..], b"BODY");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let head =
            RequestHead::parse(b"GET / HTTP/1.1\r\nuser-agent: CUPS/2.3\r\n\r\n").unwrap();
        assert_eq!(head.user_agent(), "CUPS/2.3");
        assert!(!head.is_chunked());
    }

    #[test]
    fn truncated_head_is_rejected() {
        assert!(RequestHead::parse(b"GET / HTTP/1.1\r\nHost: x\r\n").is_err());
    }

    #[tokio::test]
    async fn configured_path_gets_its_body() {
        let (mut client, server) = tokio::io::duplex(8192);
        let mut paths = HashMap::new();
        paths.insert("/admin".to_string(), "<html>admin</html>".to_string());
        let task = tokio::spawn(handle(context(server, paths)));

        client
            .write_all(b"GET /admin HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut response)
            .await
            .unwrap();
        task.await.unwrap();

        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("<html>admin</html>"));
    }

    #[tokio::test]
    async fn unknown_path_gets_404_page() {
        let (mut client, server) = tokio::io::duplex(8192);
        let task = tokio::spawn(handle(context(server, HashMap::new())));

        client
            .write_all(b"GET /secret HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut response)
            .await
            .unwrap();
        task.await.unwrap();

        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("<h1>Not Found</h1>"));
    }
}
