pub mod circuit_breaker;
pub mod database;
pub mod health;
pub mod provider;
pub mod rbmq;
pub mod redis;
pub mod user;
