pub mod access;
pub mod schema;
pub mod user_config;
