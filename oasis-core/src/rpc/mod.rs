pub mod connection;
pub mod methods;
pub mod protocol;
pub mod server;
pub mod session;

pub use connection::RpcConnection;
pub use methods::Method;
pub use protocol::{Frame, RpcError, TransportError};
pub use server::{serve, serve_connection};
pub use session::{RecordStream, RpcSession};
