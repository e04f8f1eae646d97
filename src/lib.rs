pub mod event;
pub mod simplify;
pub mod template;
pub mod payload;
pub mod serialize;
pub mod selflog;
pub mod sink;
pub mod layer;
pub mod noop_sink;

pub mod config;
pub mod transport;
pub mod newrelic;

pub mod init;
