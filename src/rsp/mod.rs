//! GDB Remote Serial Protocol front end: wire framing and command
//! dispatch.

pub mod dispatcher;
pub mod wire;

pub use dispatcher::{DispatchOutcome, Dispatcher, RunState};
