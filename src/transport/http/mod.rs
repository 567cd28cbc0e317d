pub mod channel;
pub mod router;
pub mod types;
pub mod handlers {
    pub mod commands;
    pub mod health;
    pub mod outbox;
}

pub use channel::{HttpTransport, Outbox};
pub use router::{create_router, ApiDoc};
pub use types::AppState;
