use super::messages::{Frame, FrameType};
use crate::{RelaymqError, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::io::Cursor;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

const HEADER_LEN: usize = 8;

/// Length-prefixed framing: `[i32 type][i32 length][payload]`, big-endian
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = RelaymqError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        // Peek the header without consuming it
        let (type_code, length) = {
            let mut cursor = Cursor::new(src.as_ref());
            (cursor.get_i32(), cursor.get_i32())
        };

        if length < 0 || length as usize > self.max_frame_size {
            return Err(RelaymqError::Protocol(format!(
                "invalid frame length: {}",
                length
            )));
        }
        let frame_type = FrameType::from_code(type_code).ok_or_else(|| {
            RelaymqError::Protocol(format!("unknown frame type: {:#x}", type_code))
        })?;

        let total_length = HEADER_LEN + length as usize;
        if src.len() < total_length {
            src.reserve(total_length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total_length);
        frame.advance(HEADER_LEN);
        trace!("Decoded {:?} frame, {} bytes", frame_type, length);
        Ok(Some(Frame {
            frame_type,
            payload: frame.freeze(),
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = RelaymqError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        if item.payload.len() > self.max_frame_size {
            return Err(RelaymqError::Protocol(format!(
                "frame of {} bytes exceeds limit of {}",
                item.payload.len(),
                self.max_frame_size
            )));
        }
        dst.reserve(HEADER_LEN + item.payload.len());
        dst.put_i32(item.frame_type.code());
        dst.put_i32(item.payload.len() as i32);
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}
