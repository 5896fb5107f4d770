pub mod context;
pub mod gate;

pub use context::{Resolution, SessionContext, SessionState};
pub use gate::{gate, GateView};
