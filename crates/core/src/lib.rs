//! Core types for framelock nodes.
//!
//! The node logic is a synchronous state machine: the runner feeds it
//! [`Event`]s and executes the [`Action`]s it returns against the transport.
//! Nothing in this crate performs I/O.

mod action;
mod event;
mod message;
mod traits;

pub use action::Action;
pub use event::Event;
pub use message::OutboundMessage;
pub use traits::StateMachine;
