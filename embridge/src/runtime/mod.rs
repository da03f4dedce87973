pub mod clock;
pub mod config;
pub mod run_loop;
pub mod wake_schedule;
