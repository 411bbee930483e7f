pub mod auth;
pub mod client_links;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod models;
pub mod notifications;
pub mod overdue;
pub mod permissions;
pub mod routes;
pub mod schema;
pub mod state;
pub mod tenancy;
pub mod utils;
pub mod workflow;

pub use dispatch::{default_channel, Dispatcher};
