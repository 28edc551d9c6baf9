pub mod api;
pub mod clients;
pub mod config;
pub mod dead_letter;
pub mod dispatch;
pub mod models;
pub mod notifiers;
pub mod scheduler;
pub mod store;
pub mod utils;
pub mod worker;
