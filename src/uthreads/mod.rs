pub mod api;
pub mod config;
pub mod error;
pub(crate) mod runtime;
pub mod thread;

pub use api::*;
pub use config::{Config, MAX_THREAD_NUM, MIN_STACK_SIZE, STACK_SIZE};
pub use error::{Result, ThreadError};
pub use thread::{ThreadControlBlock, ThreadEntry, ThreadState, ThreadTable, Tid, MAIN_TID};
