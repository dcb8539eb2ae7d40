pub(crate) mod async_task;

pub mod file_io;

mod latch;
pub use latch::*;

pub mod time;

#[cfg(test)]
mod utils_test;
