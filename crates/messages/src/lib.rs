//! Wire frame for the framelock multicast protocol.
//!
//! Every datagram is a fixed-size little-endian header followed by an opaque
//! payload:
//!
//! ```text
//! ┌─────────┬────────┬──────────┬──────┬───────┬──────────────┬──────────────┬────────┐
//! │ version │ origin │ sequence │ type │ flags │ destinations │ payload_size │ offset │
//! │   u16   │   u8   │   u64    │ u16  │  u16  │     u64      │     u16      │  u16   │
//! └─────────┴────────┴──────────┴──────┴───────┴──────────────┴──────────────┴────────┘
//!   payload: `payload_size` bytes starting at `offset`
//! ```
//!
//! Control payloads (handshake, readiness, advance) are encoded by the types
//! in [`payload`]; `Data` payloads are opaque to this crate.

mod header;
pub mod payload;
mod wire;

pub use header::{MessageFlags, MessageHeader, MessageType, HEADER_SIZE, PROTOCOL_VERSION};
pub use wire::{decode, encode, Message, WireError, MAX_PAYLOAD_SIZE};
