pub mod async_value;
pub mod jit;
pub mod task;
