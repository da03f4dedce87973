pub mod bridge;
pub mod framework;
pub mod host;
pub mod message;
pub mod prelude;
pub mod runtime;
pub mod sim;

pub use bridge::{Bridge, ConnectionId};
pub use framework::error::{BridgeError, Result};
pub use runtime::run_loop::{RunLoop, RunLoopStats, run_loop};
