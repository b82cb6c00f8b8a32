use crate::compression::{Decoder, Encoder};
use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::event::{generate_new_uuid, ID};
use crate::extensions::Extensions;
use crate::frame::{Frame, OpCode};
use crate::message::Message;
use crate::read::ReadStream;
use crate::split::{WSReader, WSWriter};
use crate::stream::SocketFlowStream;
use crate::write::{Writer, WriterKind};
use futures::Stream;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{split, AsyncReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;

/// Lifecycle of one endpoint, mirroring RFC 6455 §7: `Open` → (`CloseSent` |
/// `CloseReceived`) → `Closed`; `Aborted` is reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Open = 0,
    CloseSent = 1,
    CloseReceived = 2,
    Closed = 3,
    Aborted = 4,
}

impl ConnectionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Open,
            1 => ConnectionState::CloseSent,
            2 => ConnectionState::CloseReceived,
            3 => ConnectionState::Closed,
            _ => ConnectionState::Aborted,
        }
    }
}

/// One endpoint of a negotiated WebSocket connection: owns the transport
/// (split into a reader task feeding a channel, and a shared writer), tracks
/// lifecycle state, and drives an optional keep-alive ping loop.
pub struct WSConnection {
    pub id: ID,
    reader: WSReader,
    writer: WSWriter,
    state: Arc<AtomicU8>,
    keep_alive_handle: Option<JoinHandle<()>>,
    read_task: JoinHandle<()>,
}

impl WSConnection {
    /// `leftover` is any bytes the handshake's header read already pulled off
    /// the wire past the header terminator (the peer's first frame can ride
    /// in on the same TCP read as the handshake response); it's replayed to
    /// the frame reader ahead of the live socket so nothing is lost.
    pub(crate) fn new(
        stream: SocketFlowStream,
        is_client: bool,
        config: WebSocketConfig,
        negotiated_extensions: Option<Extensions>,
        leftover: Vec<u8>,
    ) -> Self {
        let (read_half, write_half) = split(stream);
        let buf_reader = BufReader::new(Cursor::new(leftover).chain(read_half));

        let kind = if is_client {
            WriterKind::Client
        } else {
            WriterKind::Server
        };
        let writer = Arc::new(Mutex::new(Writer::new(write_half, kind)));

        let (client_no_ctxt, server_no_ctxt, window_bits) = match &negotiated_extensions {
            Some(ext) => (
                ext.client_no_context_takeover.unwrap_or(false),
                ext.server_no_context_takeover.unwrap_or(false),
                ext.client_max_window_bits.or(ext.server_max_window_bits),
            ),
            None => (false, false, None),
        };

        // client_no_context_takeover governs the client's compressor and the
        // server's decompressor; server_no_context_takeover is symmetric.
        let (encoder_resets, decoder_resets) = if is_client {
            (client_no_ctxt, server_no_ctxt)
        } else {
            (server_no_ctxt, client_no_ctxt)
        };

        let encoder = Encoder::new(encoder_resets, window_bits);
        let decoder = Decoder::new(decoder_resets, window_bits);

        let (read_tx, read_rx) = mpsc::channel(1000);
        let pong_received = Arc::new(AtomicBool::new(true));
        let state = Arc::new(AtomicU8::new(ConnectionState::Open as u8));
        let close_status: Arc<std::sync::Mutex<Option<u16>>> =
            Arc::new(std::sync::Mutex::new(None));

        let mut read_stream = ReadStream::new(
            buf_reader,
            read_tx,
            writer.clone(),
            config.clone(),
            decoder,
            pong_received.clone(),
            state.clone(),
            close_status.clone(),
        );
        let read_task = tokio::spawn(async move {
            let _ = read_stream.poll_messages().await;
        });

        let keep_alive_handle = if config.keep_alive_interval > std::time::Duration::ZERO {
            Some(spawn_keep_alive(
                writer.clone(),
                state.clone(),
                pong_received,
                config.keep_alive_interval,
            ))
        } else {
            None
        };

        Self {
            id: generate_new_uuid(),
            reader: WSReader::new(ReceiverStream::new(read_rx), close_status),
            writer: WSWriter::new(writer, config, encoder),
            state,
            keep_alive_handle,
            read_task,
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.state() != ConnectionState::Open {
            return Err(Error::EndpointUnavailable(
                "connection is not open".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn send_message(&mut self, message: Message) -> Result<(), Error> {
        self.ensure_open()?;
        self.writer.send_message(message).await
    }

    pub async fn send(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.ensure_open()?;
        self.writer.send(data).await
    }

    pub async fn send_as_text(&mut self, data: String) -> Result<(), Error> {
        self.ensure_open()?;
        self.writer.send_as_text(data).await
    }

    pub async fn send_as_binary(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.ensure_open()?;
        self.writer.send_as_binary(data).await
    }

    pub async fn send_ping(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        self.writer.send_ping().await
    }

    pub async fn send_frame(&mut self, frame: Frame) -> Result<(), Error> {
        self.ensure_open()?;
        self.writer.write_frames(vec![frame]).await
    }

    pub async fn send_large_data_fragmented(
        &mut self,
        data: Vec<u8>,
        fragment_size: usize,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        self.writer
            .send_large_data_fragmented(data, fragment_size)
            .await
    }

    /// Sends a normal-closure Close frame and transitions to `CloseSent`.
    pub async fn close_connection(&mut self) -> Result<(), Error> {
        if self.state() != ConnectionState::Open {
            return Ok(());
        }
        self.set_state(ConnectionState::CloseSent);
        self.writer.close_connection().await
    }

    /// Sends a Close frame with an explicit status/description.
    pub async fn close(&mut self, status: u16, description: &str) -> Result<(), Error> {
        if self.state() != ConnectionState::Open {
            return Ok(());
        }
        self.set_state(ConnectionState::CloseSent);
        self.writer
            .write_frames(vec![Frame::close(status, description)])
            .await
    }

    /// Drops the transport without sending a Close frame.
    pub fn abort(&mut self) {
        self.set_state(ConnectionState::Aborted);
        if let Some(handle) = self.keep_alive_handle.take() {
            handle.abort();
        }
        self.read_task.abort();
    }

    /// Splits into independent read/write halves, e.g. to hand the writer to
    /// an event loop while a task drains the reader.
    pub fn split(self) -> (WSReader, WSWriter) {
        (self.reader, self.writer)
    }
}

impl Stream for WSConnection {
    type Item = Result<Message, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.reader).poll_next(cx)
    }
}

impl Drop for WSConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.keep_alive_handle.take() {
            handle.abort();
        }
        self.read_task.abort();
    }
}


fn spawn_keep_alive(
    writer: Arc<Mutex<Writer>>,
    state: Arc<AtomicU8>,
    pong_received: Arc<AtomicBool>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut awaiting_pong = false;
        loop {
            sleep(interval).await;

            if ConnectionState::from_u8(state.load(Ordering::SeqCst)) != ConnectionState::Open {
                return;
            }

            if awaiting_pong && !pong_received.load(Ordering::SeqCst) {
                log::debug!("keep-alive timed out, closing connection");
                state.store(ConnectionState::CloseSent as u8, Ordering::SeqCst);
                let _ = writer
                    .lock()
                    .await
                    .write_frame(Frame::close(1000, "KeepAliveTimeout"), false)
                    .await;
                return;
            }

            pong_received.store(false, Ordering::SeqCst);
            let ping = Frame::new(true, OpCode::Ping, Vec::new(), false);
            if writer.lock().await.write_frame(ping, false).await.is_err() {
                return;
            }
            awaiting_pong = true;
        }
    })
}
