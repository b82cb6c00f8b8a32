use crate::error::Error;

/// Upper bound a frame's 64-bit length field can ever encode; individual
/// connections clamp far below this via `WebSocketConfig::max_frame_size`.
pub const MAX_PAYLOAD_SIZE: usize = 1 << 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continue,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from(byte: u8) -> Result<Self, Error> {
        match byte {
            0x0 => Ok(OpCode::Continue),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(Error::InvalidOpcode),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Continue => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// A single WebSocket frame. `compressed` tracks the wire RSV1 bit: on read it
/// is only ever true on the frame delivered to callers once the whole message
/// has been decompressed; on write it must be set by the caller only on the
/// first frame of a compressed message.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub final_fragment: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
    pub compressed: bool,
}

impl Frame {
    pub fn new(final_fragment: bool, opcode: OpCode, payload: Vec<u8>, compressed: bool) -> Self {
        Self {
            final_fragment,
            opcode,
            payload,
            compressed,
        }
    }

    /// Builds a Close frame payload: 2-byte big-endian status plus a UTF-8
    /// description, per RFC 6455 §5.5.1.
    pub fn close(status: u16, description: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + description.len());
        payload.extend_from_slice(&status.to_be_bytes());
        payload.extend_from_slice(description.as_bytes());
        Frame::new(true, OpCode::Close, payload, false)
    }
}
