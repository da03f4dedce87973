pub mod error;
pub mod ffi_guard;
pub mod logging;
pub mod util;
