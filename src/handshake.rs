//! Handshake drivers: `accept_async*` performs the server side of the RFC
//! 6455 Upgrade handshake over an already-accepted transport; `connect_async*`
//! performs the client side, including the TCP/TLS dial.

use crate::config::{ClientConfig, WebSocketConfig};
use crate::connection::WSConnection;
use crate::error::Error;
use crate::extensions::{format_extension_header, merge_extensions, parse_extensions};
use crate::http::{self, HeaderMap};
use crate::interceptor::InterceptorChain;
use crate::request::{construct_http_request, HttpRequest};
use crate::stream::SocketFlowStream;
use crate::utils::{generate_websocket_accept_value, generate_websocket_key};
use pki_types::ServerName;
use rustls::{ClientConfig as RustlsClientConfig, RootCertStore};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::{TlsConnector, TlsStream};

/// Accepts a stream as a WebSocket server connection using default config.
pub async fn accept_async<S: Into<SocketFlowStream>>(stream: S) -> Result<WSConnection, Error> {
    accept_async_with_config(stream, None, None).await
}

/// Accepts a stream as a WebSocket server connection, driving the Upgrade
/// handshake described in §4.6: parse the request, run it through the
/// `OnHandshake` interceptor (if any), validate it's a genuine upgrade,
/// negotiate extensions/sub-protocol, emit 101, then hand the (unsplit)
/// transport to `WSConnection::new`.
pub async fn accept_async_with_config<S: Into<SocketFlowStream>>(
    stream: S,
    config: Option<WebSocketConfig>,
    interceptors: Option<&InterceptorChain>,
) -> Result<WSConnection, Error> {
    let mut stream = stream.into();
    let web_socket_config = config.unwrap_or_default();

    let (mut request, leftover) = HttpRequest::parse_http_request(&mut stream).await?;

    if let Some(chain) = interceptors {
        request = match chain.run_on_handshake(request).await {
            Ok(request) => request,
            Err(err) => {
                reject(&mut stream, 400, "Bad Request", &[]).await?;
                return Err(err);
            }
        };
    }

    if !request.headers.contains_value_ci("upgrade", "websocket") {
        reject(&mut stream, 426, "Upgrade Required", &[]).await?;
        return Err(Error::NoUpgradeHeaderPresent);
    }

    if !request
        .headers
        .get_all("connection")
        .iter()
        .any(|value| value.split(',').any(|token| token.trim().eq_ignore_ascii_case("upgrade")))
    {
        reject(&mut stream, 426, "Upgrade Required", &[]).await?;
        return Err(Error::NoConnectionHeaderPresent);
    }

    const MIN_SEC_WEBSOCKET_VERSION: u32 = 13;

    let version_ok = request
        .headers
        .get("sec-websocket-version")
        .and_then(|v| v.parse::<u32>().ok())
        .map(|v| v >= MIN_SEC_WEBSOCKET_VERSION)
        .unwrap_or(false);
    if !version_ok {
        reject(
            &mut stream,
            426,
            "Upgrade Required",
            &[("Sec-WebSocket-Version", "13")],
        )
        .await?;
        return Err(Error::InvalidHTTPHandshake);
    }

    let key = match request.headers.get("sec-websocket-key") {
        Some(key) => key.to_string(),
        None => {
            reject(&mut stream, 400, "Bad Request", &[]).await?;
            return Err(Error::NoSecWebsocketKey);
        }
    };

    let accept_value = generate_websocket_accept_value(key);

    let client_extensions = request
        .headers
        .get("sec-websocket-extensions")
        .and_then(|v| parse_extensions(v.to_string()));
    let negotiated_extensions = match merge_extensions(
        web_socket_config.extensions.clone(),
        client_extensions,
        web_socket_config.client_context_takeover,
        web_socket_config.server_context_takeover,
    ) {
        Ok(negotiated) => negotiated,
        Err(err) => {
            reject(&mut stream, 400, "Bad Request", &[]).await?;
            return Err(err);
        }
    };

    let negotiated_protocol = web_socket_config
        .supported_sub_protocols
        .as_ref()
        .and_then(|supported| request.negotiate_sub_protocol(supported));

    let mut response_headers = HeaderMap::new();
    response_headers.insert("Connection", "Upgrade");
    response_headers.insert("Upgrade", "websocket");
    response_headers.insert("Sec-WebSocket-Accept", accept_value);

    if let Some(value) = negotiated_extensions
        .as_ref()
        .and_then(format_extension_header)
    {
        response_headers.insert("Sec-WebSocket-Extensions", value);
    }

    if let Some(ref protocol) = negotiated_protocol {
        response_headers.insert("Sec-WebSocket-Protocol", protocol.clone());
    }

    http::emit_response(&mut stream, 101, "Switching Protocols", &response_headers, None).await?;

    Ok(WSConnection::new(
        stream,
        false,
        web_socket_config,
        negotiated_extensions,
        leftover,
    ))
}

async fn reject(
    stream: &mut SocketFlowStream,
    status: u16,
    reason: &str,
    extra_headers: &[(&str, &str)],
) -> Result<(), Error> {
    let mut headers = HeaderMap::new();
    headers.insert("Connection", "close");
    for (name, value) in extra_headers {
        headers.insert(name, value.to_string());
    }
    let body = format!("{} {}", status, reason);
    http::emit_response(stream, status, reason, &headers, Some(body.as_bytes())).await
}

/// Dials a `ws://`/`wss://` URL as a WebSocket client using default config.
pub async fn connect_async(url: &str) -> Result<WSConnection, Error> {
    connect_async_with_config(url, None).await
}

/// Dials a `ws://`/`wss://` URL, driving the client side of the Upgrade
/// handshake described in §4.7: open the transport (wrapping it in TLS for
/// `wss`), emit the request, validate the `101` response, then hand the
/// transport to `WSConnection::new`.
pub async fn connect_async_with_config(
    url: &str,
    config: Option<ClientConfig>,
) -> Result<WSConnection, Error> {
    let client_config = config.unwrap_or_default();
    let key = generate_websocket_key();

    let (headers, path, host_with_port, host, use_tls) = construct_http_request(
        url,
        &key,
        client_config.web_socket_config.extensions.clone(),
        client_config.sec_websocket_protocol.as_deref(),
        &client_config.additional_http_headers,
    )?;

    let tcp_stream = TcpStream::connect(&host_with_port).await?;

    let mut stream = if use_tls {
        let connector = build_tls_connector(&client_config)?;
        let server_name = ServerName::try_from(host)?;
        let tls_stream = connector.connect(server_name, tcp_stream).await?;
        SocketFlowStream::Secure(TlsStream::from(tls_stream))
    } else {
        SocketFlowStream::Plain(tcp_stream)
    };

    http::emit_request(&mut stream, "GET", &path, &headers).await?;

    let (raw, leftover) = http::read_until_headers_end(&mut stream).await?;
    let (first_line, response_headers) = http::parse_headers(&raw)?;
    let (status, _reason) = first_line.status.ok_or(Error::NoUpgrade)?;

    if status != 101 {
        return Err(Error::HandshakeFailed(format!(
            "server responded with status {}",
            status
        )));
    }

    if !response_headers.contains_value_ci("upgrade", "websocket") {
        return Err(Error::NoUpgradeHeaderPresent);
    }

    let expected_accept = generate_websocket_accept_value(key);
    match response_headers.get("sec-websocket-accept") {
        Some(accept) if accept == expected_accept => {}
        _ => return Err(Error::InvalidAcceptKey),
    }

    let negotiated_extensions = response_headers
        .get("sec-websocket-extensions")
        .and_then(|v| parse_extensions(v.to_string()));

    Ok(WSConnection::new(
        stream,
        true,
        client_config.web_socket_config,
        negotiated_extensions,
        leftover,
    ))
}

fn build_tls_connector(client_config: &ClientConfig) -> Result<TlsConnector, Error> {
    let mut root_store = RootCertStore::empty();

    if let Some(ca_file) = &client_config.ca_file {
        let mut reader = std::io::BufReader::new(std::fs::File::open(ca_file)?);
        for cert in rustls_pemfile::certs(&mut reader) {
            root_store
                .add(cert?)
                .map_err(|err| Error::HandshakeFailed(err.to_string()))?;
        }
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    let rustls_config = RustlsClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(rustls_config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::generate_websocket_accept_value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn accept_async_rejects_request_missing_upgrade_header() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let (server_stream, _) = listener.accept().await.unwrap();
        let result = accept_async(server_stream).await;
        assert!(result.is_err());

        let response = client.await.unwrap();
        assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 426"));
    }

    #[tokio::test]
    async fn accept_async_completes_handshake_and_echoes_accept_key() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let key = "dGhlIHNhbXBsZSBub25jZQ==";

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let request = format!(
                "GET /chat HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\
                 Connection: Upgrade\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n\r\n",
                key
            );
            stream.write_all(request.as_bytes()).await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = stream.read(&mut buf).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let (server_stream, _) = listener.accept().await.unwrap();
        let connection = accept_async(server_stream).await.unwrap();
        assert_eq!(connection.state(), crate::connection::ConnectionState::Open);

        let response = client.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 101"));
        let expected_accept = generate_websocket_accept_value(key.to_string());
        assert!(response.contains(&expected_accept));
    }

    #[tokio::test]
    async fn accept_async_rejects_no_context_takeover_when_dont_allow() {
        use crate::extensions::{ContextTakeoverMode, Extensions};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let key = "dGhlIHNhbXBsZSBub25jZQ==";

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let request = format!(
                "GET /chat HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\
                 Connection: Upgrade\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n\
                 Sec-WebSocket-Extensions: permessage-deflate; client_no_context_takeover\r\n\r\n",
                key
            );
            stream.write_all(request.as_bytes()).await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = stream.read(&mut buf).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let (server_stream, _) = listener.accept().await.unwrap();
        let config = WebSocketConfig {
            extensions: Some(Extensions {
                permessage_deflate: true,
                ..Default::default()
            }),
            client_context_takeover: ContextTakeoverMode::DontAllow,
            ..Default::default()
        };
        let result = accept_async_with_config(server_stream, Some(config), None).await;
        assert!(matches!(result, Err(Error::ExtensionNotNegotiable(_))));

        let response = client.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn accept_async_preserves_bytes_sent_right_after_the_handshake_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let key = "dGhlIHNhbXBsZSBub25jZQ==";

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let request = format!(
                "GET /chat HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\
                 Connection: Upgrade\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n\r\n",
                key
            );
            // A masked text frame "Hi" riding in on the same write, the way a
            // client pipelining its first message can land in one TCP
            // segment as the handshake request.
            let mut payload = request.into_bytes();
            payload.extend_from_slice(&[0x81, 0x82, 0x00, 0x00, 0x00, 0x00, b'H', b'i']);
            stream.write_all(&payload).await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = stream.read(&mut buf).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let (server_stream, _) = listener.accept().await.unwrap();
        let mut connection = accept_async(server_stream).await.unwrap();

        use futures::StreamExt;
        let message = connection.next().await.unwrap().unwrap();
        assert_eq!(message, crate::message::Message::Text("Hi".to_string()));

        let _ = client.await.unwrap();
    }
}
