//! Work queues, and the engine jobs we run on them.

pub mod engine;
pub mod work;
