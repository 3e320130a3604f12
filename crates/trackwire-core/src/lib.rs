//! # trackwire-core
//!
//! Connection tracking, topic routing and event fan-out for the Trackwire
//! live-update channel.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **ConnectionRegistry** - User identity to live-connection mapping
//! - **TopicRouter** - Topic membership for packages, hubs and batches
//! - **FanoutEngine** - Best-effort event delivery to live audiences
//! - **IdentityVerifier** - Handshake authentication seam
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Session    │────▶│   Registry   │     │    Router    │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!                             ▲                    ▲
//!                             │                    │
//!                      ┌──────┴────────────────────┘
//!                      │   FanoutEngine
//!                      └──────◀──── business logic emits here
//! ```
//!
//! All subscription state is ephemeral: it is created by a connection's
//! session task and destroyed on disconnect. A reconnecting client
//! re-issues its joins.

pub mod auth;
pub mod fanout;
pub mod handle;
pub mod registry;
pub mod router;
pub mod topic;

pub use auth::{AuthError, IdentityVerifier, StaticTokenVerifier, UserId};
pub use fanout::{FanoutEngine, FanoutStats};
pub use handle::{ConnectionHandle, ConnectionId};
pub use registry::ConnectionRegistry;
pub use router::{RouterConfig, RouterError, TopicRouter};
pub use topic::{Topic, TopicError, TopicScope};
