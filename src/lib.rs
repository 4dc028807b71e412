pub mod chat;
pub mod config;
pub mod engine;
pub mod error;
pub mod message;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod transport;

mod util;
