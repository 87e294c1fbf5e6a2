// ── Supervision ──
//
// Alive timers, the status state machine and the tag quality cascade.

mod alive;
mod cascade;
mod service;

pub use alive::{AliveOutcome, AliveTimerOp, AliveTimerRegistry};
pub use service::SupervisionService;
pub(crate) use cascade::reconcile as reconcile_tags;
