// libs/consultation-session-cell/src/lib.rs
//! # Consultation Session Cell
//!
//! Drives one live consultation through its lifecycle on the client side:
//! a countdown anchored to the monotonic clock, reconciled against server
//! timestamps, with phase transitions confirmed by the consultation function.
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------------------------+
//! |               Consultation Session Cell               |
//! +-------------------------------------------------------+
//! |  models.rs        |  SessionState, anchors, actions   |
//! |  error.rs         |  SessionError                     |
//! |  services/        |                                   |
//! |    timer.rs       |  Monotonic countdown              |
//! |    reconciler.rs  |  Server time -> local anchor      |
//! |    action.rs      |  Consultation function client     |
//! |    session.rs     |  Session state machine actor      |
//! +-------------------------------------------------------+
//! ```
//!
//! The server is authoritative for phase. Realtime status pushes only trigger a
//! re-sync; the countdown only ever proposes a transition (`timer_expired`).
//! All state changes happen on the session actor, one command at a time.

pub mod error;
pub mod models;
pub mod services;

pub use error::SessionError;
pub use models::*;
pub use services::{
    ActionService, CountdownTimer, Reconciliation, SessionManager, SupabaseActionService, TimeReconciler,
};
