pub mod auth;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod handlers;
pub mod job;
pub mod naics;
pub mod pipeline;
pub mod record;
pub mod stages;
