//! Network building blocks: the session-facing TCP transport and the
//! persistent uplink client.

pub mod transport;
pub mod uplink;

pub use transport::{TcpTransport, TransportError};
pub use uplink::{UplinkClient, UplinkConfig};
