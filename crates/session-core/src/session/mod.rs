//! Session state
//!
//! [`CallSession`] is the mutable record of one call, owned by its
//! coordinator. Observers get [`SessionSnapshot`]s.

mod call;
mod state;

pub use call::CallSession;
pub use state::{
    CallerInfo, CloseReason, LifecycleState, SessionMetrics, SessionSnapshot, Turn,
    MAX_LATENCY_SAMPLES,
};
