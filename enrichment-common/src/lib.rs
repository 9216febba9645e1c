pub mod event;
pub mod metrics;
pub mod retry;
pub mod store;
