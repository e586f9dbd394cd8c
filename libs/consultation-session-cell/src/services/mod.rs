pub mod action;
pub mod reconciler;
pub mod session;
pub mod timer;

pub use action::{ActionService, SupabaseActionService};
pub use reconciler::{Reconciliation, TimeReconciler};
pub use session::SessionManager;
pub use timer::CountdownTimer;
