//! # RelayMQ Wire Protocol
//!
//! Every frame on the wire is `(i32 type, i32 length, payload)` in network byte order.
//! The payload is a `bincode`-encoded object whose shape depends on the type.
//!
//! ## Frame Types
//!
//! | Code  | Request           | Reply payload        |
//! |-------|-------------------|----------------------|
//! | `0x1` | channel create    | [`BasicReturns`]     |
//! | `0x2` | channel close     | [`BasicReturns`]     |
//! | `0x3` | exchange declare  | [`BasicReturns`]     |
//! | `0x4` | exchange delete   | [`BasicReturns`]     |
//! | `0x5` | queue declare     | [`BasicReturns`]     |
//! | `0x6` | queue delete      | [`BasicReturns`]     |
//! | `0x7` | queue bind        | [`BasicReturns`]     |
//! | `0x8` | queue unbind      | [`BasicReturns`]     |
//! | `0x9` | basic publish     | [`BasicReturns`]     |
//! | `0xa` | basic consume     | [`BasicReturns`]     |
//! | `0xb` | basic ack         | [`BasicReturns`]     |
//! | `0xc` | (server push)     | [`SubscribeReturns`] |
//!
//! Replies echo the request's `rid` and `channel_id`. A `0xc` frame is never a reply; it
//! carries a delivery for the consumer registered under that channel.
//!
//! ## Modules
//!
//! - [`messages`] - frame, command and reply types
//! - [`codec`] - `tokio_util` framing for [`Frame`]

pub mod codec;
pub mod messages;


pub use codec::FrameCodec;
pub use messages::*;
