//! # Wire Framing
//!
//! Length-prefixed envelopes exchanged over Unix domain sockets. Two message styles
//! share the framing: flat text control messages and versioned JSON envelopes.

pub mod framing;
pub mod message;
pub mod socket;

pub use framing::{decode_frame, encode_frame, read_frame, write_frame};
pub use message::{ControlMessage, ControlTarget, Origin, RequestEnvelope, ResponseEnvelope};
pub use socket::{sendsync, ControlQueue, DaemonSocket, JsonSocket};
