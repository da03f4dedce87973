pub use crate::bridge::reply::{BinaryReply, ReplyReceiver};
pub use crate::bridge::{Bridge, ConnectionId};
pub use crate::framework::error::{BridgeError, Result};
pub use crate::framework::logging::{init_logger, init_logger_with_filter};
pub use crate::framework::logging::{debug, error, info, trace, warn};
pub use crate::framework::util::HashMap;
pub use crate::framework::util::HashSet;
pub use crate::host::{
    HostEngine, HostMessenger, HostRegistrar, HostView, MessengerRef,
    NO_PENDING_TASK, NativeMainLoop, RegistrarRef, ViewRef,
};
pub use crate::message::{Message, ResponseHandle};
pub use crate::runtime::clock::{Clock, SystemClock};
pub use crate::runtime::config::RunLoopConfig;
pub use crate::runtime::run_loop::{RunLoop, RunLoopStats, run_loop};
pub use crate::runtime::wake_schedule::WakeSchedule;
