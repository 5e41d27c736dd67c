pub mod auth;
pub mod connection;
pub mod dispatch;
pub mod registry;
