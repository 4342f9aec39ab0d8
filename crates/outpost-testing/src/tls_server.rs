//! HTTPS test server answering `POST /<status>` with that status.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    body::Incoming, server::conn::http1, service::service_fn, Method, Request, Response,
    StatusCode,
};
use hyper_util::rt::TokioIo;
use rustls::ServerConfig;
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_rustls::TlsAcceptor;

/// TLS server bound to an ephemeral loopback port. Stops when dropped.
pub struct TlsTestServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TlsTestServer {
    /// Binds `127.0.0.1:0` and starts accepting connections.
    pub async fn start(config: ServerConfig) -> Result<Self> {
        let listener =
            TcpListener::bind("127.0.0.1:0").await.context("failed to bind TLS test server")?;
        let addr = listener.local_addr()?;
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let handle = tokio::spawn(accept_loop(listener, acceptor));
        Ok(Self { addr, handle })
    }

    /// Local address of the listener.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `https` URL for `route` on this server.
    pub fn url(&self, route: &str) -> String {
        format!("https://127.0.0.1:{}{route}", self.addr.port())
    }
}

impl Drop for TlsTestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn accept_loop(listener: TcpListener, acceptor: TlsAcceptor) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::debug!(error = %e, "accept failed");
                continue;
            },
        };

        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            let tls = match acceptor.accept(stream).await {
                Ok(tls) => tls,
                Err(e) => {
                    tracing::debug!(%peer, error = %e, "TLS handshake rejected");
                    return;
                },
            };

            if let Err(e) =
                http1::Builder::new().serve_connection(TokioIo::new(tls), service_fn(respond)).await
            {
                tracing::debug!(%peer, error = %e, "connection closed with error");
            }
        });
    }
}

async fn respond(request: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let status = if request.method() == Method::POST {
        status_from_path(request.uri().path())
    } else {
        StatusCode::METHOD_NOT_ALLOWED
    };

    // Consume the body before answering so keep-alive connections stay usable.
    let _ = request.into_body().collect().await;

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    Ok(response)
}

fn status_from_path(path: &str) -> StatusCode {
    path.trim_start_matches('/')
        .parse::<u16>()
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::NOT_FOUND)
}
