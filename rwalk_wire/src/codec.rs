//! Header + payload framing for rwalk messages.
//!
//! [`FrameCodec`] plugs into `tokio_util::codec::{FramedRead, FramedWrite}`.
//! Broadcasters that fan the same frame out to many peers should call
//! [`encode_to_bytes`] once and share the resulting `Bytes`.

use crate::error::WireError;
use crate::types::{Message, MsgType, ObstacleGrid, Progress, SimMode, StatsGrid, Step, Welcome};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the `type` + `payload_len` header.
pub const HEADER_LEN: usize = 8;

/// Default ceiling for a declared payload length (1 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 1 << 20;

/// Length-delimited codec for rwalk frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Frames declaring more than this many payload bytes are rejected
    max_payload: usize,
}

impl FrameCodec {
    /// Creates a codec with the default 1 MiB payload ceiling.
    pub fn new() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Creates a codec with a custom payload ceiling.
    ///
    /// Observers of very large worlds need a higher ceiling than the server,
    /// since a STATS frame grows with `8 * world_w * world_h`.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends the framed encoding of `msg` to `dst`.
pub fn encode_message(msg: &Message, dst: &mut BytesMut) {
    let payload_len = msg.payload_len();
    dst.reserve(HEADER_LEN + payload_len);
    dst.put_u32_ne(msg.msg_type().as_u32());
    dst.put_u32_ne(payload_len as u32);

    match msg {
        Message::Welcome(w) => {
            dst.put_u32_ne(w.world_w);
            dst.put_u32_ne(w.world_h);
            dst.put_u32_ne(w.mode.as_u32());
            dst.put_u32_ne(w.replications);
            dst.put_u32_ne(w.max_steps);
            dst.put_u32_ne(w.step_delay_ms);
            dst.put_f32_ne(w.p_up);
            dst.put_f32_ne(w.p_down);
            dst.put_f32_ne(w.p_left);
            dst.put_f32_ne(w.p_right);
        }
        Message::Step(s) => {
            dst.put_i32_ne(s.x);
            dst.put_i32_ne(s.y);
            dst.put_u32_ne(s.step_index);
        }
        Message::Mode(mode) => dst.put_u32_ne(mode.as_u32()),
        Message::Progress(p) => {
            dst.put_u32_ne(p.current_replication);
            dst.put_u32_ne(p.total_replications);
        }
        Message::Stop => {}
        Message::Error(text) => dst.put_slice(text.as_bytes()),
        Message::Stats(grid) => {
            dst.put_u32_ne(grid.world_w);
            dst.put_u32_ne(grid.world_h);
            for &p in &grid.prob {
                dst.put_f32_ne(p);
            }
            for &a in &grid.avg_steps {
                dst.put_f32_ne(a);
            }
        }
        Message::Obstacles(grid) => {
            dst.put_u32_ne(grid.world_w);
            dst.put_u32_ne(grid.world_h);
            dst.put_slice(&grid.cells);
        }
    }
}

/// Encodes a single frame into an immutable, cheaply clonable buffer.
pub fn encode_to_bytes(msg: &Message) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + msg.payload_len());
    encode_message(msg, &mut buf);
    buf.freeze()
}

impl Encoder<Message> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), WireError> {
        Encoder::<&Message>::encode(self, &item, dst)
    }
}

impl<'a> Encoder<&'a Message> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, item: &'a Message, dst: &mut BytesMut) -> Result<(), WireError> {
        let len = item.payload_len();
        if len > u32::MAX as usize {
            return Err(WireError::PayloadTooLarge {
                len,
                max: u32::MAX as usize,
            });
        }
        encode_message(item, dst);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, WireError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &src[..HEADER_LEN];
        let raw_type = header.get_u32_ne();
        let len = header.get_u32_ne() as usize;

        // Reject before buffering anything the peer claims is coming.
        if len > self.max_payload {
            return Err(WireError::PayloadTooLarge {
                len,
                max: self.max_payload,
            });
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        decode_payload(raw_type, payload).map(Some)
    }
}

fn expect_len(msg_type: MsgType, payload: &Bytes, expected: usize) -> Result<(), WireError> {
    if payload.len() != expected {
        return Err(WireError::BadLength {
            msg_type,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

fn decode_mode(raw: u32) -> Result<SimMode, WireError> {
    SimMode::from_u32(raw).ok_or(WireError::InvalidMode(raw))
}

/// Returns `8 + cells * bytes_per_cell` for a grid payload, or an error if
/// the declared extents overflow.
fn grid_len(world_w: u32, world_h: u32, bytes_per_cell: usize) -> Result<(usize, usize), WireError> {
    let cells = (world_w as usize)
        .checked_mul(world_h as usize)
        .ok_or_else(|| WireError::malformed("grid extents overflow"))?;
    let body = cells
        .checked_mul(bytes_per_cell)
        .and_then(|b| b.checked_add(8))
        .ok_or_else(|| WireError::malformed("grid payload overflow"))?;
    Ok((cells, body))
}

fn decode_payload(raw_type: u32, mut payload: Bytes) -> Result<Message, WireError> {
    let msg_type = MsgType::from_u32(raw_type).ok_or(WireError::UnknownType(raw_type))?;

    let msg = match msg_type {
        MsgType::Welcome => {
            expect_len(msg_type, &payload, Welcome::LEN)?;
            let world_w = payload.get_u32_ne();
            let world_h = payload.get_u32_ne();
            let mode = decode_mode(payload.get_u32_ne())?;
            Message::Welcome(Welcome {
                world_w,
                world_h,
                mode,
                replications: payload.get_u32_ne(),
                max_steps: payload.get_u32_ne(),
                step_delay_ms: payload.get_u32_ne(),
                p_up: payload.get_f32_ne(),
                p_down: payload.get_f32_ne(),
                p_left: payload.get_f32_ne(),
                p_right: payload.get_f32_ne(),
            })
        }
        MsgType::Step => {
            expect_len(msg_type, &payload, Step::LEN)?;
            Message::Step(Step {
                x: payload.get_i32_ne(),
                y: payload.get_i32_ne(),
                step_index: payload.get_u32_ne(),
            })
        }
        MsgType::Mode => {
            expect_len(msg_type, &payload, 4)?;
            Message::Mode(decode_mode(payload.get_u32_ne())?)
        }
        MsgType::Progress => {
            expect_len(msg_type, &payload, Progress::LEN)?;
            Message::Progress(Progress {
                current_replication: payload.get_u32_ne(),
                total_replications: payload.get_u32_ne(),
            })
        }
        MsgType::Stop => {
            expect_len(msg_type, &payload, 0)?;
            Message::Stop
        }
        MsgType::Error => {
            let text = String::from_utf8(payload.to_vec())
                .map_err(|_| WireError::malformed("error text is not UTF-8"))?;
            Message::Error(text)
        }
        MsgType::Stats => {
            if payload.len() < 8 {
                return Err(WireError::BadLength {
                    msg_type,
                    expected: 8,
                    actual: payload.len(),
                });
            }
            let world_w = payload.get_u32_ne();
            let world_h = payload.get_u32_ne();
            let (cells, expected) = grid_len(world_w, world_h, 8)?;
            if payload.len() + 8 != expected {
                return Err(WireError::BadLength {
                    msg_type,
                    expected,
                    actual: payload.len() + 8,
                });
            }
            let prob = (0..cells).map(|_| payload.get_f32_ne()).collect();
            let avg_steps = (0..cells).map(|_| payload.get_f32_ne()).collect();
            Message::Stats(StatsGrid {
                world_w,
                world_h,
                prob,
                avg_steps,
            })
        }
        MsgType::Obstacles => {
            if payload.len() < 8 {
                return Err(WireError::BadLength {
                    msg_type,
                    expected: 8,
                    actual: payload.len(),
                });
            }
            let world_w = payload.get_u32_ne();
            let world_h = payload.get_u32_ne();
            let (_, expected) = grid_len(world_w, world_h, 1)?;
            if payload.len() + 8 != expected {
                return Err(WireError::BadLength {
                    msg_type,
                    expected,
                    actual: payload.len() + 8,
                });
            }
            Message::Obstacles(ObstacleGrid {
                world_w,
                world_h,
                cells: payload.to_vec(),
            })
        }
    };

    Ok(msg)
}
