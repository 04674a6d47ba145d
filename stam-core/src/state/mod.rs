pub mod connection;
pub mod machine;
pub mod queue;

pub use connection::ConnectionState;
pub use machine::{Action, ConnectionEvent, ConnectionMachine, Input, Link};
pub use queue::{Origin, PendingRequest, RequestId, RequestQueue};
