pub mod backend;
pub mod chat;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod protocol;
pub mod proxy;
pub mod relay;
pub mod server;
pub mod sse;
pub mod translate;
