//! Wire protocol between the streaming server and its clients.
//!
//! Message format:
//! - Kind: 1 byte
//! - Payload length: 4 bytes (u32 LE)
//! - Payload
//!
//! Server → client:
//! - `MSG_DISPLAY_CONFIG`: width, height, dpi (u32 LE each). Sent on connect.
//! - `MSG_FRAME`: width, height, format, stride (u32 LE each), then
//!   `height * stride` bytes of pixel rows.
//!
//! Client → server:
//! - `MSG_TOUCH`: action (u8), finger id, x, y (i32 LE each).

use crate::error::StreamError;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const HEADER_LEN: usize = 5;

pub const MSG_DISPLAY_CONFIG: u8 = 1;
pub const MSG_FRAME: u8 = 2;
pub const MSG_TOUCH: u8 = 16;

pub const TOUCH_PAYLOAD_LEN: usize = 13;

/// Upper bound for client → server payloads. Clients only send small
/// control messages.
pub const MAX_CLIENT_PAYLOAD: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PixelFormat {
    Rgba8888 = 1,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgba8888 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
}

/// A borrowed frame. Rows are `stride` bytes apart, which may exceed
/// `width * 4` when the producer pads rows for alignment.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
}

impl<'a> Frame<'a> {
    pub fn new(
        data: &'a [u8],
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
    ) -> Result<Self, StreamError> {
        let min_stride = width as u64 * format.bytes_per_pixel() as u64;
        if (stride as u64) < min_stride {
            return Err(StreamError::InvalidFrame(format!(
                "stride {} shorter than row of {} bytes",
                stride, min_stride
            )));
        }
        let needed = stride as u64 * height as u64;
        if (data.len() as u64) < needed {
            return Err(StreamError::InvalidFrame(format!(
                "{} bytes of pixel data, need {}",
                data.len(),
                needed
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
            format,
        })
    }

    pub fn rgba(
        data: &'a [u8],
        width: u32,
        height: u32,
        stride: u32,
    ) -> Result<Self, StreamError> {
        Self::new(data, width, height, stride, PixelFormat::Rgba8888)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Pixel rows including stride padding.
    pub fn pixels(&self) -> &'a [u8] {
        &self.data[..self.stride as usize * self.height as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchAction {
    Down,
    Move,
    Up,
}

impl TouchAction {
    fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(TouchAction::Down),
            1 => Some(TouchAction::Move),
            2 => Some(TouchAction::Up),
            _ => None,
        }
    }

    fn to_wire(self) -> u8 {
        match self {
            TouchAction::Down => 0,
            TouchAction::Move => 1,
            TouchAction::Up => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchEvent {
    pub action: TouchAction,
    pub finger_id: i32,
    pub x: i32,
    pub y: i32,
}

fn header(kind: u8, payload_len: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload_len);
    buf.push(kind);
    buf.extend_from_slice(&(payload_len as u32).to_le_bytes());
    buf
}

pub fn encode_display_config(config: &DisplayConfig) -> Vec<u8> {
    let mut buf = header(MSG_DISPLAY_CONFIG, 12);
    buf.extend_from_slice(&config.width.to_le_bytes());
    buf.extend_from_slice(&config.height.to_le_bytes());
    buf.extend_from_slice(&config.dpi.to_le_bytes());
    buf
}

pub fn encode_frame(frame: &Frame<'_>) -> Vec<u8> {
    let pixels = frame.pixels();
    let mut buf = header(MSG_FRAME, 16 + pixels.len());
    buf.extend_from_slice(&frame.width.to_le_bytes());
    buf.extend_from_slice(&frame.height.to_le_bytes());
    buf.extend_from_slice(&(frame.format as u32).to_le_bytes());
    buf.extend_from_slice(&frame.stride.to_le_bytes());
    buf.extend_from_slice(pixels);
    buf
}

pub fn encode_touch(event: &TouchEvent) -> Vec<u8> {
    let mut buf = header(MSG_TOUCH, TOUCH_PAYLOAD_LEN);
    buf.push(event.action.to_wire());
    buf.extend_from_slice(&event.finger_id.to_le_bytes());
    buf.extend_from_slice(&event.x.to_le_bytes());
    buf.extend_from_slice(&event.y.to_le_bytes());
    buf
}

pub fn decode_touch(payload: &[u8]) -> Result<TouchEvent, StreamError> {
    if payload.len() != TOUCH_PAYLOAD_LEN {
        return Err(StreamError::Protocol(format!(
            "touch payload is {} bytes, expected {}",
            payload.len(),
            TOUCH_PAYLOAD_LEN
        )));
    }
    let action = TouchAction::from_wire(payload[0])
        .ok_or_else(|| StreamError::Protocol(format!("unknown touch action {}", payload[0])))?;
    let int_at = |i: usize| {
        i32::from_le_bytes([payload[i], payload[i + 1], payload[i + 2], payload[i + 3]])
    };
    Ok(TouchEvent {
        action,
        finger_id: int_at(1),
        x: int_at(5),
        y: int_at(9),
    })
}

/// Read one message. Returns `None` on a clean end of stream.
pub async fn read_message<R>(
    reader: &mut R,
    max_payload: usize,
) -> Result<Option<(u8, Vec<u8>)>, StreamError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; HEADER_LEN];
    match reader.read_exact(&mut head).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes([head[1], head[2], head[3], head[4]]) as usize;
    if len > max_payload {
        return Err(StreamError::Protocol(format!(
            "payload of {} bytes exceeds limit {}",
            len, max_payload
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some((head[0], payload)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rejects_short_stride() {
        let data = vec![0u8; 64];
        assert!(Frame::rgba(&data, 4, 2, 12).is_err());
        assert!(Frame::rgba(&data, 4, 2, 16).is_ok());
    }

    #[test]
    fn test_frame_rejects_short_buffer() {
        let data = vec![0u8; 31];
        assert!(Frame::rgba(&data, 4, 2, 16).is_err());
    }

    #[test]
    fn test_encode_frame_keeps_stride_padding() {
        let data: Vec<u8> = (0..40).collect();
        let frame = Frame::rgba(&data, 4, 2, 20).unwrap();
        let buf = encode_frame(&frame);

        assert_eq!(buf[0], MSG_FRAME);
        let len = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        assert_eq!(len, 16 + 40);
        assert_eq!(&buf[HEADER_LEN + 12..HEADER_LEN + 16], &20u32.to_le_bytes());
        assert_eq!(&buf[HEADER_LEN + 16..], &data[..]);
    }

    #[test]
    fn test_decode_touch() {
        let event = TouchEvent {
            action: TouchAction::Move,
            finger_id: 3,
            x: -5,
            y: 720,
        };
        let buf = encode_touch(&event);
        assert_eq!(decode_touch(&buf[HEADER_LEN..]).unwrap(), event);
    }

    #[test]
    fn test_decode_touch_rejects_bad_action() {
        let mut payload = [0u8; TOUCH_PAYLOAD_LEN];
        payload[0] = 9;
        assert!(matches!(decode_touch(&payload), Err(StreamError::Protocol(_))));
        assert!(decode_touch(&payload[..4]).is_err());
    }

    #[tokio::test]
    async fn test_read_message() {
        let mut input = encode_display_config(&DisplayConfig {
            width: 1280,
            height: 720,
            dpi: 160,
        });
        input.extend(encode_touch(&TouchEvent {
            action: TouchAction::Up,
            finger_id: 1,
            x: 0,
            y: 0,
        }));
        let mut reader = &input[..];

        let (kind, payload) = read_message(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(kind, MSG_DISPLAY_CONFIG);
        assert_eq!(&payload[..4], &1280u32.to_le_bytes());

        let (kind, _) = read_message(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(kind, MSG_TOUCH);

        assert!(read_message(&mut reader, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_message_enforces_limit() {
        let input = encode_frame(&Frame::rgba(&[0u8; 64], 4, 4, 16).unwrap());
        let mut reader = &input[..];
        assert!(read_message(&mut reader, 16).await.is_err());
    }
}
