// libs/realtime-cell/src/lib.rs
//! # Realtime Cell
//!
//! Push subscriptions to row-change streams of the data platform, shared by chat,
//! typing indicators, consultation status and consultation requests.
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------+
//! |                  Realtime Cell                      |
//! +-----------------------------------------------------+
//! |  models.rs      |  Topics, subscriptions, events    |
//! |  error.rs       |  RealtimeError                    |
//! |  services/      |                                   |
//! |    channel.rs   |  Channel manager + reconnects     |
//! |    supabase.rs  |  Phoenix websocket push source    |
//! +-----------------------------------------------------+
//! ```
//!
//! Each consumer owns one [`RealtimeChannelManager`], which keeps at most one live
//! subscription per [`Topic`]. An unexpected disconnect is retried on the reconnect
//! backoff table; an explicit unsubscribe is not.
//!
//! Events are hints. Ordering is not preserved across a reconnect, so consumers
//! re-read canonical state when an event arrives instead of applying it as a diff.

pub mod error;
pub mod models;
pub mod services;

pub use error::RealtimeError;
pub use models::*;
pub use services::{ChangeStream, PushSource, RealtimeChannelManager, SupabaseRealtimeSource};
