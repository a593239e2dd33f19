pub mod client;
pub mod transport;
pub mod watchdog;

pub use client::{ClientStats, ConnState, ReconnectingStreamClient, StreamTiming};
pub use transport::{StreamConnection, StreamConnector, WsConnector};
