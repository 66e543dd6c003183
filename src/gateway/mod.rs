//! Persistent connection to the upstream event gateway.

pub mod backoff;
pub mod connection;
pub mod protocol;
pub mod session;
pub mod transport;

pub use backoff::ReconnectBackoff;
pub use connection::{CallbackError, ConnectionHandle, EventCallback, GatewayConnection};
pub use protocol::{GatewayEvent, InboundFrame, OutboundFrame, SessionIdentity};
pub use session::{ConnectionState, GatewaySession, SessionAction, SessionInput, SessionSettings};
pub use transport::{discover_gateway_url, gateway_url_with_query, Transport, WsTransport};
