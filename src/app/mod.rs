pub mod commands;
pub mod dispatcher;
pub mod persistence_gateway;

pub use commands::{Access, Command};
pub use dispatcher::{
    CommandDispatcher, DispatchError, DispatcherSettings, LoopState, StopReason, FATAL_REPLY,
};
pub use persistence_gateway::{PersistenceError, PersistenceGateway, RetryPolicy, SharedGateway};
