// hasync-api: Async Rust client for the Home Assistant WebSocket API

pub mod command;
pub mod error;
pub mod message;
pub mod session;

pub use command::{CommandMux, DEFAULT_ID_CEILING, Dispatch, PendingCommand};
pub use error::Error;
pub use message::{Inbound, Request, ServerError};
pub use session::{
    ReconnectConfig, Reply, SessionConfig, SessionEvent, SessionHandle, SessionStatus,
    Subscription, websocket_url,
};
