//! In-process engine used by the demo and the test suite. It speaks the
//! same callback ABI as a real engine binding, including the parts a
//! well-behaved engine never exercises (duplicate replies, rejected sends).

mod engine;
mod messenger;

pub use engine::{SimEngine, SimRegistrar, SimView};
pub use messenger::{PendingReply, SentMessage, SentResponse, SimMessenger};
