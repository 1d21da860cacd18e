//! rwalk Wire Protocol
//!
//! This crate defines the framed binary protocol spoken between the rwalk
//! simulation server and any number of observing processes connected over a
//! local stream socket.
//!
//! # Frame Layout
//!
//! Every message is a fixed 8-byte header followed by exactly `payload_len`
//! bytes whose layout depends on the message type:
//!
//! ```text
//! ┌──────────────┬──────────────────┬───────────────────────────────┐
//! │  type: u32   │ payload_len: u32 │  payload (payload_len bytes)  │
//! └──────────────┴──────────────────┴───────────────────────────────┘
//! ```
//!
//! All integers and floats are 4 bytes, packed with no padding, in the
//! host's native byte order. The protocol is meant for a same-host loopback
//! channel, so no byte swapping is ever performed.
//!
//! # Example
//!
//! ```ignore
//! use futures::StreamExt;
//! use rwalk_wire::{FrameCodec, Message};
//! use tokio_util::codec::FramedRead;
//!
//! let mut frames = FramedRead::new(stream, FrameCodec::new());
//! while let Some(frame) = frames.next().await {
//!     match frame? {
//!         Message::Step(step) => draw(step.x, step.y),
//!         other => handle(other),
//!     }
//! }
//! ```

mod codec;
mod error;
mod types;

pub use codec::{encode_message, encode_to_bytes, FrameCodec, DEFAULT_MAX_PAYLOAD, HEADER_LEN};
pub use error::WireError;
pub use types::{Message, MsgType, ObstacleGrid, Progress, SimMode, StatsGrid, Step, Welcome};
