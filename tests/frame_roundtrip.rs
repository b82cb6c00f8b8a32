//! End-to-end round-trip tests driven through the public client/server API
//! over real loopback TCP, exercising the `decode(encode(F)) == F` property
//! from the crate's testable-property set with quickcheck-generated inputs.

use futures::StreamExt;
use quickcheck::{Arbitrary, Gen};
use socket_flow::handshake::{accept_async, connect_async};
use socket_flow::Message;
use tokio::net::TcpListener;

async fn spawn_echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::spawn(async move {
                if let Ok(mut ws) = accept_async(stream).await {
                    while let Some(Ok(message)) = ws.next().await {
                        if ws.send_message(message).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }
    });

    format!("ws://{}", addr)
}

#[tokio::test]
async fn arbitrary_binary_messages_round_trip_through_echo() {
    let url = spawn_echo_server().await;
    let mut ws = connect_async(&url).await.unwrap();

    let mut gen = Gen::new(512);
    for _ in 0..30 {
        let payload = Vec::<u8>::arbitrary(&mut gen);
        ws.send_as_binary(payload.clone()).await.unwrap();
        let echoed = ws.next().await.unwrap().unwrap();
        assert_eq!(echoed, Message::Binary(payload));
    }

    let _ = ws.close_connection().await;
}

#[tokio::test]
async fn arbitrary_text_messages_round_trip_through_echo() {
    let url = spawn_echo_server().await;
    let mut ws = connect_async(&url).await.unwrap();

    let mut gen = Gen::new(64);
    for _ in 0..30 {
        let text = String::arbitrary(&mut gen);
        ws.send_as_text(text.clone()).await.unwrap();
        let echoed = ws.next().await.unwrap().unwrap();
        assert_eq!(echoed, Message::Text(text));
    }

    let _ = ws.close_connection().await;
}

#[tokio::test]
async fn large_message_survives_fragmentation() {
    let url = spawn_echo_server().await;
    let mut ws = connect_async(&url).await.unwrap();

    // `send_large_data_fragmented` always frames its first chunk as Text,
    // so the payload must be valid UTF-8 to decode back losslessly.
    let payload: String = "the quick brown fox jumps over the lazy dog "
        .repeat(20_000)
        .chars()
        .collect();
    ws.send_large_data_fragmented(payload.clone().into_bytes(), 16 * 1024)
        .await
        .unwrap();
    let echoed = ws.next().await.unwrap().unwrap();
    assert_eq!(echoed, Message::Text(payload));

    let _ = ws.close_connection().await;
}
