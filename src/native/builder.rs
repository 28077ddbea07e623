use std::{
    future::{Future, IntoFuture},
    io,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{future::BoxFuture, FutureExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::{
    rustls::{self, pki_types::ServerName},
    TlsConnector,
};
use url::Url;

use super::{Options, WebSocket};
use crate::{
    event::{Callback, Event, EventKind, Listeners},
    stream::MaybeTlsStream,
    Result, WebSocketError,
};

/// Configures and establishes a client connection.
///
/// Obtained from [`WebSocket::connect`]. Awaiting the builder opens the TCP (and, for
/// `wss://`, TLS) connection and performs the opening handshake; [`WebSocketBuilder::handshake`]
/// runs the handshake over a stream the caller already holds.
///
/// Callbacks registered here are in place before the receive loop starts, so no frame
/// that arrives together with the handshake response goes unobserved.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use rawws::{EventKind, Options, WebSocket};
///
/// async fn connect() -> rawws::Result<()> {
///     let ws = WebSocket::connect("wss://example.com/socket".parse()?)
///         .with_options(Options::default().with_handshake_timeout(Duration::from_secs(5)))
///         .on(EventKind::Close, |event| println!("closed: {event:?}"))
///         .await?;
///
///     ws.send_text("hello").await?;
///     Ok(())
/// }
/// ```
pub struct WebSocketBuilder {
    opts: Option<WsBuilderOpts>,
    future: Option<BoxFuture<'static, Result<WebSocket>>>,
}

struct WsBuilderOpts {
    url: Url,
    tcp_address: Option<SocketAddr>,
    connector: Option<TlsConnector>,
    options: Options,
    listeners: Listeners,
}

impl WebSocketBuilder {
    pub(super) fn new(url: Url) -> Self {
        Self {
            opts: Some(WsBuilderOpts {
                url,
                tcp_address: None,
                connector: None,
                options: Options::default(),
                listeners: Listeners::default(),
            }),
            future: None,
        }
    }

    fn opts(&mut self) -> &mut WsBuilderOpts {
        let Some(opts) = &mut self.opts else {
            unreachable!()
        };
        opts
    }

    /// Sets a custom TLS connector for `wss://` connections.
    pub fn with_connector(mut self, connector: TlsConnector) -> Self {
        self.opts().connector = Some(connector);
        self
    }

    /// Connects to `address` instead of resolving the URL's host.
    ///
    /// The URL's host is still used for the `Host` header and TLS server name.
    pub fn with_tcp_address(mut self, address: SocketAddr) -> Self {
        self.opts().tcp_address = Some(address);
        self
    }

    /// Sets the connection options.
    pub fn with_options(mut self, options: Options) -> Self {
        self.opts().options = options;
        self
    }

    /// Registers `callback` for events of `kind`.
    ///
    /// Callbacks for the same kind run in registration order.
    pub fn on<F>(mut self, kind: EventKind, callback: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        self.opts().listeners.push(kind, callback);
        self
    }

    /// Performs the opening handshake over an already connected stream.
    ///
    /// The URL supplies the request target and `Host` header; its scheme is not consulted.
    /// On failure no receive loop is started and `io` is dropped.
    pub async fn handshake<S>(mut self, io: S) -> Result<WebSocket>
    where
        S: AsyncWrite + AsyncRead + Send + Unpin + 'static,
    {
        let opts = self.opts.take().ok_or(WebSocketError::ConnectionClosed)?;
        let timeout = opts.options.handshake_timeout;
        with_timeout(
            timeout,
            WebSocket::handshake_priv(opts.url, io, opts.options, opts.listeners),
        )
        .await
    }
}

impl Future for WebSocketBuilder {
    type Output = Result<WebSocket>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(opts) = this.opts.take() {
            let timeout = opts.options.handshake_timeout;
            let future = connect(
                opts.url,
                opts.tcp_address,
                opts.connector,
                opts.options,
                opts.listeners,
            );
            this.future = Some(Box::pin(with_timeout(timeout, future)));
        }

        let Some(pinned) = &mut this.future else {
            unreachable!()
        };
        pinned.poll_unpin(cx)
    }
}

async fn with_timeout<F>(timeout: Option<std::time::Duration>, future: F) -> Result<WebSocket>
where
    F: IntoFuture<Output = Result<WebSocket>>,
{
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, future)
            .await
            .map_err(|_| WebSocketError::Timeout)?,
        None => future.await,
    }
}

async fn connect(
    url: Url,
    tcp_address: Option<SocketAddr>,
    connector: Option<TlsConnector>,
    options: Options,
    listeners: Listeners,
) -> Result<WebSocket> {
    let tls = match url.scheme() {
        "ws" => false,
        "wss" => true,
        _ => return Err(WebSocketError::InvalidHttpScheme),
    };
    let host = url.host().ok_or(WebSocketError::MissingHost)?.to_string();

    let tcp_stream = if let Some(tcp_address) = tcp_address {
        TcpStream::connect(tcp_address).await?
    } else {
        let port = url
            .port_or_known_default()
            .ok_or(WebSocketError::InvalidHttpScheme)?;
        TcpStream::connect(format!("{host}:{port}")).await?
    };

    if options.no_delay {
        tcp_stream.set_nodelay(true)?;
    }

    #[cfg(feature = "logging")]
    log::debug!("connected to {host} (tls={tls})");

    let stream = if tls {
        let connector = match connector {
            Some(connector) => connector,
            None => tls_connector()?,
        };
        let name = host.trim_start_matches('[').trim_end_matches(']').to_string();
        let domain = ServerName::try_from(name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid dnsname"))?;

        MaybeTlsStream::Tls(Box::new(connector.connect(domain, tcp_stream).await?))
    } else {
        MaybeTlsStream::Plain(tcp_stream)
    };

    WebSocket::handshake_priv(url, stream, options, listeners).await
}

/// Creates a TLS connector trusting the webpki root certificates, advertising HTTP/1.1
/// through ALPN.
fn tls_connector() -> io::Result<TlsConnector> {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));

    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::ALL_VERSIONS)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    config.alpn_protocols = vec!["http/1.1".into()];

    Ok(TlsConnector::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_unknown_scheme() {
        let result = WebSocket::connect("http://127.0.0.1:9/".parse().unwrap()).await;
        assert!(matches!(result, Err(WebSocketError::InvalidHttpScheme)));
    }

    #[tokio::test]
    async fn test_refused_connection_is_io_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WebSocket::connect(format!("ws://{addr}/").parse().unwrap()).await;
        assert!(matches!(result, Err(WebSocketError::IoError(_))));
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        // the server accepts but never answers the upgrade request
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            drop(socket);
        });

        let result = WebSocket::connect(format!("ws://{addr}/").parse().unwrap())
            .with_options(
                Options::default().with_handshake_timeout(std::time::Duration::from_millis(100)),
            )
            .await;
        assert!(matches!(result, Err(WebSocketError::Timeout)));
        server.abort();
    }

    #[test]
    fn test_default_tls_connector_builds() {
        assert!(tls_connector().is_ok());
    }
}
