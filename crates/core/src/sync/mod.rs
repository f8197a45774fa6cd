pub mod deferred;
pub mod gate;

pub use deferred::{Deferred, DeferredError};
pub use gate::{Gate, GateGuard};
