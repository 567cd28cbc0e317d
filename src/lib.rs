pub mod app;
pub mod domain;
pub mod infra;
pub mod storage;
pub mod transport;

// Convenience re-exports (keeps call-sites clean)
pub use app::{
    CommandDispatcher, DispatcherSettings, PersistenceError, PersistenceGateway, RetryPolicy,
    SharedGateway, StopReason,
};
pub use domain::access::{AdministratorSet, AuthorizationGate, Caller};
pub use domain::schema::SchemaRegistry;
pub use domain::user_config::ConfigurationManager;
