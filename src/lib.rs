pub mod api;
pub mod catalog;
pub mod config;
pub mod control;
pub mod live;
pub mod logging;
pub mod results;
pub mod retry;
pub mod sample;
pub mod session;
pub mod stream;
