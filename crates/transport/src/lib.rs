//! Reliable multicast transport.
//!
//! Delivers each published message to every node in its destination mask,
//! resending to the nodes that have not acknowledged it until they do or the
//! communication timeout expires.
//!
//! # Architecture
//!
//! ```text
//!            publish()                         try_next_received()
//!               │                                      ▲
//!               ▼                                      │
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Endpoint                              │
//! │  outbound queue ──► AckTracker (Mutex) ◄── acks    inbound queue │
//! └───────┬─────────────────────▲───────────────────────────▲────────┘
//!         │                     │                           │
//!   framelock-tx          framelock-resend            framelock-rx
//!   send_to(group)        resend_due()                handle_datagram()
//! ```
//!
//! [`Endpoint`] holds all protocol logic and is shared by the UDP backend
//! ([`UdpTransport`]) and the in-memory backend used by simulations. The
//! background threads only move bytes.

mod ack;
mod clock;
mod config;
mod endpoint;
mod error;
mod stats;
mod traits;
mod udp;

pub use ack::{AckOutcome, AckTracker, DeliveryFailure, DueMessages, PendingAck};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{MulticastConfig, TransportConfig};
pub use endpoint::{DatagramOutcome, Endpoint};
pub use error::TransportError;
pub use stats::NetworkingStats;
pub use traits::Transport;
pub use udp::{resolve_adapter, UdpTransport};
