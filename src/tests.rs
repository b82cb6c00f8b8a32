//! Crate-level integration tests exercising the wire format end to end over
//! real loopback TCP pairs, rather than one module at a time.

#[cfg(test)]
mod tests {
    use crate::compression::Decoder;
    use crate::config::WebSocketConfig;
    use crate::connection::ConnectionState;
    use crate::frame::{Frame, OpCode};
    use crate::message::Message;
    use crate::read::ReadStream;
    use crate::stream::SocketFlowStream;
    use crate::utils::generate_websocket_accept_value;
    use crate::write::{Writer, WriterKind};
    use std::sync::atomic::{AtomicBool, AtomicU8};
    use std::sync::Arc;
    use tokio::io::{split, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    #[test]
    fn opcode_from_byte_and_back() {
        assert_eq!(OpCode::from(0x0).unwrap(), OpCode::Continue);
        assert_eq!(OpCode::from(0x1).unwrap(), OpCode::Text);
        assert_eq!(OpCode::Text.as_u8(), 0x1);
        assert!(OpCode::from(0x3).is_err());

        assert!(OpCode::Close.is_control());
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Pong.is_control());
        assert!(!OpCode::Text.is_control());
        assert!(!OpCode::Binary.is_control());
    }

    #[test]
    fn frame_new_and_close_helper() {
        let frame = Frame::new(false, OpCode::Text, Vec::new(), false);
        assert!(!frame.final_fragment);
        assert_eq!(frame.opcode, OpCode::Text);
        assert!(frame.payload.is_empty());

        let close = Frame::close(1000, "bye");
        assert_eq!(close.opcode, OpCode::Close);
        assert_eq!(&close.payload[..2], &1000u16.to_be_bytes());
        assert_eq!(&close.payload[2..], b"bye");
    }

    #[test]
    fn message_as_binary_and_as_text() {
        let text = Message::Text("hello".to_string());
        assert_eq!(text.as_binary(), b"hello".to_vec());
        assert_eq!(text.as_text().unwrap(), "hello");

        let binary = Message::Binary(vec![0xFF, 0xFE]);
        assert!(binary.as_text().is_err());
    }

    /// RFC 6455 §1.3 reference test vector for the handshake accept value.
    #[test]
    fn accept_value_matches_rfc6455_reference_vector() {
        let accept = generate_websocket_accept_value("dGhlIHNhbXBsZSBub25jZQ==".to_string());
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    async fn loopback_pair() -> (SocketFlowStream, SocketFlowStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (
            SocketFlowStream::Plain(client),
            SocketFlowStream::Plain(server),
        )
    }

    /// Scenario 2: a single unfragmented text frame "Hi" written server-side
    /// must match the exact wire bytes `81 02 48 69`, and read back to an
    /// identical frame.
    #[tokio::test]
    async fn single_text_frame_matches_reference_bytes() {
        let (client, server) = loopback_pair().await;
        let (_, server_write) = split(server);
        let (client_read, _) = split(client);
        let mut server_writer = Writer::new(server_write, WriterKind::Server);
        let mut client_read = BufReader::new(client_read);

        server_writer
            .write_frame(
                Frame::new(true, OpCode::Text, b"Hi".to_vec(), false),
                false,
            )
            .await
            .unwrap();

        let mut raw = [0u8; 4];
        client_read.read_exact(&mut raw).await.unwrap();
        assert_eq!(raw, [0x81, 0x02, 0x48, 0x69]);
    }

    /// A hand-crafted masked Ping frame decodes to the unmasked payload,
    /// regardless of the mask bytes used.
    #[tokio::test]
    async fn read_frame_unmasks_client_ping() {
        let (client, server) = loopback_pair().await;
        let (_client_read, mut client_write) = split(client);
        let (server_read, server_write) = split(server);

        // Mask `37 FA 21 3D` applied to payload `01 02`, per the reference
        // scenario.
        let masked_ping: [u8; 8] = [0x89, 0x82, 0x37, 0xFA, 0x21, 0x3D, 0x36, 0xF8];
        client_write.write_all(&masked_ping).await.unwrap();

        let writer = Arc::new(tokio::sync::Mutex::new(Writer::new(
            server_write,
            WriterKind::Server,
        )));
        let (read_tx, _read_rx) = mpsc::channel(4);
        let mut server_reader = ReadStream::new(
            BufReader::new(server_read),
            read_tx,
            writer,
            WebSocketConfig::default(),
            Decoder::new(false, None),
            Arc::new(AtomicBool::new(true)),
            Arc::new(AtomicU8::new(ConnectionState::Open as u8)),
            Arc::new(std::sync::Mutex::new(None)),
        );

        let frame = server_reader.read_frame().await.unwrap();
        assert!(frame.final_fragment);
        assert_eq!(frame.opcode, OpCode::Ping);
        assert_eq!(frame.payload, vec![0x01, 0x02]);
    }

    /// Scenario 3: the server must reply to a masked client ping with an
    /// unmasked pong carrying the same payload, byte for byte.
    #[tokio::test]
    async fn masked_ping_is_answered_with_unmasked_pong() {
        let (client, server) = loopback_pair().await;
        let (client_read, mut client_write) = split(client);
        let (server_read, server_write) = split(server);

        let masked_ping: [u8; 8] = [0x89, 0x82, 0x37, 0xFA, 0x21, 0x3D, 0x36, 0xF8];
        client_write.write_all(&masked_ping).await.unwrap();

        let writer = Arc::new(tokio::sync::Mutex::new(Writer::new(
            server_write,
            WriterKind::Server,
        )));
        let (read_tx, _read_rx) = mpsc::channel(4);
        let mut server_reader = ReadStream::new(
            BufReader::new(server_read),
            read_tx,
            writer,
            WebSocketConfig::default(),
            Decoder::new(false, None),
            Arc::new(AtomicBool::new(true)),
            Arc::new(AtomicU8::new(ConnectionState::Open as u8)),
            Arc::new(std::sync::Mutex::new(None)),
        );

        tokio::spawn(async move {
            let _ = server_reader.poll_messages().await;
        });

        let mut client_read = BufReader::new(client_read);
        let mut raw = [0u8; 4];
        client_read.read_exact(&mut raw).await.unwrap();
        assert_eq!(raw, [0x8A, 0x02, 0x01, 0x02]);
    }

    /// Scenario 4: a text message fragmented across two frames must be
    /// reassembled into a single delivered message, with the intermediate
    /// fragment producing no delivery on its own.
    #[tokio::test]
    async fn fragmented_text_reassembles_to_single_message() {
        let (client, server) = loopback_pair().await;
        let (_, client_write) = split(client);
        let (server_read, server_write) = split(server);

        let mut client_writer = Writer::new(client_write, WriterKind::Server);
        client_writer
            .write_frame(
                Frame::new(false, OpCode::Text, b"He".to_vec(), false),
                false,
            )
            .await
            .unwrap();
        client_writer
            .write_frame(
                Frame::new(true, OpCode::Continue, b"llo".to_vec(), false),
                false,
            )
            .await
            .unwrap();

        let writer = Arc::new(tokio::sync::Mutex::new(Writer::new(
            server_write,
            WriterKind::Server,
        )));
        let (read_tx, mut read_rx) = mpsc::channel(4);
        let mut server_reader = ReadStream::new(
            BufReader::new(server_read),
            read_tx,
            writer,
            WebSocketConfig::default(),
            Decoder::new(false, None),
            Arc::new(AtomicBool::new(true)),
            Arc::new(AtomicU8::new(ConnectionState::Open as u8)),
            Arc::new(std::sync::Mutex::new(None)),
        );

        tokio::spawn(async move {
            let _ = server_reader.poll_messages().await;
        });

        let message = read_rx.recv().await.unwrap().unwrap();
        assert_eq!(message, Message::Text("Hello".to_string()));
    }
}
