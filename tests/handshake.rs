//! Handshake-level integration tests driven through the public API: sub-
//! protocol and permessage-deflate negotiation, and rejection of requests
//! that never upgrade.

use futures::StreamExt;
use socket_flow::config::{ClientConfig, ServerConfig, WebSocketConfig};
use socket_flow::event::Event;
use socket_flow::extensions::Extensions;
use socket_flow::handshake::connect_async_with_config;
use socket_flow::server::start_server_with_config;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn negotiates_sub_protocol_and_deflate_then_echoes() {
    // `start_server_with_config` doesn't report back the bound address, so a
    // fixed port is used here rather than binding ephemerally.
    let port = 19981;
    let server_config = ServerConfig {
        web_socket_config: Some(WebSocketConfig {
            extensions: Some(Extensions {
                permessage_deflate: true,
                ..Default::default()
            }),
            supported_sub_protocols: Some(vec!["chat".to_string()]),
            ..Default::default()
        }),
        tls_config: None,
        interceptors: None,
    };
    let mut events = start_server_with_config(port, Some(server_config))
        .await
        .unwrap();

    let client_config = ClientConfig {
        web_socket_config: WebSocketConfig {
            extensions: Some(Extensions {
                permessage_deflate: true,
                ..Default::default()
            }),
            ..Default::default()
        },
        sec_websocket_protocol: Some(vec!["chat".to_string()]),
        ..Default::default()
    };

    let mut client = connect_async_with_config(
        &format!("ws://127.0.0.1:{}", port),
        Some(client_config),
    )
    .await
    .unwrap();

    let Event::NewClient(_id, mut server_writer) = events.next().await.unwrap() else {
        panic!("expected a NewClient event first");
    };

    let payload = "compress me ".repeat(64);
    client.send_as_text(payload.clone()).await.unwrap();

    let Event::NewMessage(id, message) = events.next().await.unwrap() else {
        panic!("expected a NewMessage event");
    };
    assert_eq!(message.as_text().unwrap(), payload);

    server_writer.send_message(message).await.unwrap();
    let echoed = client.next().await.unwrap().unwrap();
    assert_eq!(echoed.as_text().unwrap(), payload);
    let _ = id;
}

#[tokio::test]
async fn request_without_upgrade_header_is_rejected() {
    let port = 19982;
    let _events = start_server_with_config(port, None).await.unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n")
        .await
        .unwrap();

    let mut response = vec![0u8; 256];
    let n = stream.read(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response[..n]);
    assert!(text.starts_with("HTTP/1.1 426"));
}
