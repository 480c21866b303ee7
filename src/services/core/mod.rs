pub mod pass_lock;
pub mod retry;
