//! # trackwire-protocol
//!
//! Wire protocol definitions for the Trackwire live-update channel.
//!
//! This crate defines the binary protocol spoken between Trackwire clients
//! and the server: frame types, rejection codes, and the length-prefixed
//! MessagePack codec.
//!
//! ## Frame Types
//!
//! - `Join` / `Leave` - Topic membership for packages, hubs and batches
//! - `Ping` / `Pong` - Keepalive probes
//! - `Event` - Business events pushed to subscribers
//! - `Joined` / `Left` / `Rejected` / `Connected` - Server acknowledgments
//!
//! ## Example
//!
//! ```rust
//! use trackwire_protocol::{codec, Frame};
//!
//! let frame = Frame::join("package", "TRK-1");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{reject, Frame};
