pub mod circuit_breaker;
pub mod dead_letter;
pub mod event;
pub mod health;
pub mod notification;
pub mod provider;
pub mod response;
pub mod retry;
pub mod status;
pub mod user;
pub mod validation;
