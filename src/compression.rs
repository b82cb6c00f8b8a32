//! permessage-deflate (RFC 7692) compression/decompression of message
//! payloads. Operates on raw DEFLATE streams (no zlib header/trailer),
//! since that's what the extension mandates.

use crate::error::Error;
use bytes::BytesMut;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

fn calculate_buffer_size(payload_size: usize) -> usize {
    if payload_size <= 4096 {
        4096
    } else if payload_size <= 65536 {
        16384
    } else {
        65536
    }
}

/// Compresses one message's payload. The sender strips the trailing
/// `00 00 FF FF` DEFLATE block-sync marker before framing, per RFC 7692
/// §7.2.1 — the receiver reappends it before decompressing.
pub struct Encoder {
    compressor: Compress,
    reset_context: bool,
}

impl Encoder {
    pub fn new(reset_context: bool, window_bits: Option<u8>) -> Self {
        let compressor = Compress::new_with_window_bits(
            Compression::default(),
            false,
            window_bits.unwrap_or(15),
        );
        Self {
            compressor,
            reset_context,
        }
    }

    pub fn compress(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        let buffer_size = calculate_buffer_size(payload.len());
        let mut compressed = BytesMut::with_capacity(buffer_size);
        let mut buffer = vec![0u8; buffer_size];

        if self.reset_context {
            self.compressor.reset();
        }

        let before_in = self.compressor.total_in();
        let mut offset = 0usize;
        loop {
            let input = &payload[offset..];
            let flush = if offset >= payload.len() {
                FlushCompress::Sync
            } else {
                FlushCompress::None
            };
            let before_out = self.compressor.total_out();
            let status = self
                .compressor
                .compress(input, &mut buffer, flush)
                .map_err(|e| Error::CompressionError(e.to_string()))?;
            let written = (self.compressor.total_out() - before_out) as usize;
            compressed.extend_from_slice(&buffer[..written]);
            offset = (self.compressor.total_in() - before_in) as usize;

            match status {
                Status::StreamEnd => break,
                Status::BufError => break,
                Status::Ok if offset >= payload.len() && written == 0 => break,
                Status::Ok => {}
            }
        }

        if compressed.ends_with(&DEFLATE_TRAILER) {
            let new_len = compressed.len() - DEFLATE_TRAILER.len();
            compressed.truncate(new_len);
        }

        Ok(compressed.to_vec())
    }
}

/// Decompresses one message's payload, reappending the `00 00 FF FF`
/// trailer the sender stripped before reconstructing the DEFLATE stream.
pub struct Decoder {
    decompressor: Decompress,
    reset_context: bool,
}

impl Decoder {
    pub fn new(reset_context: bool, window_bits: Option<u8>) -> Self {
        let decompressor = if let Some(window_bits) = window_bits {
            Decompress::new_with_window_bits(false, window_bits)
        } else {
            Decompress::new(false)
        };
        Self {
            decompressor,
            reset_context,
        }
    }

    pub fn decompress(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        let mut input = BytesMut::from(payload);
        input.extend_from_slice(&DEFLATE_TRAILER);

        let buffer_size = calculate_buffer_size(input.len());
        let mut decompressed = BytesMut::with_capacity(buffer_size);
        let mut buffer = Vec::with_capacity(buffer_size);

        if self.reset_context {
            self.decompressor.reset(false);
        }

        let before_in = self.decompressor.total_in();
        while self.decompressor.total_in() - before_in < input.len() as u64 {
            let consumed = (self.decompressor.total_in() - before_in) as usize;
            let slice = &input[consumed..];
            match self
                .decompressor
                .decompress_vec(slice, &mut buffer, FlushDecompress::Sync)
                .map_err(|e| Error::CompressionError(e.to_string()))?
            {
                Status::Ok => {
                    decompressed.extend_from_slice(&buffer);
                    buffer.clear();
                }
                Status::StreamEnd => break,
                Status::BufError => break,
            }
        }

        Ok(decompressed.to_vec())
    }
}
