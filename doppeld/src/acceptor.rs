//! Per-service connection acceptors.
//!
//! Each advertised local service gets one acceptor on its port. TCP
//! services dispatch every connection to the protocol handler picked
//! for the service name; UDP services just dump datagrams.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, UdpSocket};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::handlers::{self, ClientStream, HandlerContext, HandlerFn};
use crate::types::ServiceData;

pub struct Acceptor {
    service: String,
    proto: &'static str,
    port: u16,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Acceptor {
    /// Bind the service port and start accepting.
    pub async fn start(
        svc: &ServiceData,
        srv_host: &str,
        tls: TlsAcceptor,
        save_path: PathBuf,
    ) -> Result<Acceptor> {
        let service = svc.full_name();
        let proto = if service.contains("_tcp") { "tcp" } else { "udp" };

        let (run, srv_tls): (HandlerFn, bool) = match handlers::select(&service) {
            Some(spec) => {
                tracing::info!(
                    "found {proto} {service} protocol handler (tls={})",
                    spec.requires_tls
                );
                (spec.run, spec.requires_tls)
            }
            None => {
                tracing::warn!(
                    "no protocol handler found for service {service}, using generic {proto} dump handler"
                );
                (|ctx| Box::pin(handlers::handle_dump(ctx)), false)
            }
        };

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let port = if proto == "tcp" {
            let listener = TcpListener::bind(("0.0.0.0", svc.port))
                .await
                .with_context(|| format!("could not bind tcp port {} for {service}", svc.port))?;
            let port = listener.local_addr()?.port();

            let ctx_template = ConnectionTemplate {
                service: service.clone(),
                srv_host: srv_host.to_string(),
                srv_port: port,
                srv_tls,
                tls: if srv_tls { Some(tls) } else { None },
                ipp_overrides: svc.ipp.clone(),
                http_paths: svc.http.clone(),
                save_path,
                run,
            };
            spawn_tcp_loop(listener, ctx_template, cancel.clone(), tracker.clone());
            port
        } else {
            let socket = UdpSocket::bind(("0.0.0.0", svc.port))
                .await
                .with_context(|| format!("could not bind udp port {} for {service}", svc.port))?;
            let port = socket.local_addr()?.port();
            spawn_udp_loop(socket, service.clone(), cancel.clone(), tracker.clone());
            port
        };

        tracing::debug!("{proto} listener for port {port} ({service}) started");

        Ok(Acceptor {
            service,
            proto,
            port,
            cancel,
            tracker,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Close the listener and wait for in-flight handlers to finish.
    pub async fn stop(self) {
        tracing::debug!("stopping {} listener for port {}", self.proto, self.port);
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::debug!(
            "{} listener for port {} ({}) stopped",
            self.proto,
            self.port,
            self.service
        );
    }
}

struct ConnectionTemplate {
    service: String,
    srv_host: String,
    srv_port: u16,
    srv_tls: bool,
    tls: Option<TlsAcceptor>,
    ipp_overrides: std::collections::HashMap<String, String>,
    http_paths: std::collections::HashMap<String, String>,
    save_path: PathBuf,
    run: HandlerFn,
}

fn spawn_tcp_loop(
    listener: TcpListener,
    template: ConnectionTemplate,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    let conn_tracker = tracker.clone();
    tracker.spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::error!("accept failed on {}: {e}", template.service);
                            continue;
                        }
                    };
                    tracing::debug!(
                        "accepted tcp connection for service {} (port {}): {peer}",
                        template.service,
                        template.srv_port
                    );

                    let tls = template.tls.clone();
                    let service = template.service.clone();
                    let srv_host = template.srv_host.clone();
                    let srv_port = template.srv_port;
                    let srv_tls = template.srv_tls;
                    let ipp_overrides = template.ipp_overrides.clone();
                    let http_paths = template.http_paths.clone();
                    let save_path = template.save_path.clone();
                    let run = template.run;
                    conn_tracker.spawn(async move {
                        let stream: Box<dyn ClientStream> = match tls {
                            Some(tls) => match tls.accept(stream).await {
                                Ok(stream) => Box::new(stream),
                                Err(e) => {
                                    tracing::debug!("tls handshake with {peer} failed: {e}");
                                    return;
                                }
                            },
                            None => Box::new(stream),
                        };
                        run(HandlerContext {
                            service,
                            peer,
                            stream,
                            srv_host,
                            srv_port,
                            srv_tls,
                            ipp_overrides,
                            http_paths,
                            save_path,
                        })
                        .await;
                    });
                }
            }
        }
    });
}

fn spawn_udp_loop(
    socket: UdpSocket,
    service: String,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    tracker.spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok((0, peer)) => tracing::debug!("empty datagram from {peer}"),
                    Ok((n, peer)) => tracing::info!(
                        "{service} <- {peer} ({n} bytes):\n{}",
                        handlers::hexdump(&buf[..n])
                    ),
                    Err(e) => {
                        tracing::warn!("error reading udp packet: {e}");
                        break;
                    }
                },
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdvertiseConfig;
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn http_service() -> ServiceData {
        let mut http = HashMap::new();
        http.insert("/".to_string(), "<html>decoy</html>".to_string());
        ServiceData {
            name: "web".to_string(),
            service: "_http._tcp".to_string(),
            domain: "local".to_string(),
            port: 0,
            records: Vec::new(),
            responder: None,
            ipp: HashMap::new(),
            http,
        }
    }

    fn test_tls(dir: &std::path::Path) -> TlsAcceptor {
        let config = AdvertiseConfig {
            certificate: dir.join("cert.pem"),
            key: dir.join("key.pem"),
            ..AdvertiseConfig::default()
        };
        crate::tls::build_acceptor(&config).unwrap()
    }

    #[tokio::test]
    async fn serves_http_decoy_over_tcp() {
        let dir = tempfile::tempdir().unwrap();
        let acceptor = Acceptor::start(
            &http_service(),
            "decoy",
            test_tls(dir.path()),
            dir.path().join("docs"),
        )
        .await
        .unwrap();

        let mut conn = TcpStream::connect(("127.0.0.1", acceptor.port()))
            .await
            .unwrap();
        conn.write_all(b"GET / HTTP/1.1\r\nHost: decoy\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        conn.read_to_end(&mut response).await.unwrap();

        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("<html>decoy</html>"));

        acceptor.stop().await;
    }

    #[tokio::test]
    async fn stop_closes_the_listener() {
        let dir = tempfile::tempdir().unwrap();
        let acceptor = Acceptor::start(
            &http_service(),
            "decoy",
            test_tls(dir.path()),
            dir.path().join("docs"),
        )
        .await
        .unwrap();
        let port = acceptor.port();
        acceptor.stop().await;

        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }
}
