pub mod app;
pub mod health;
pub mod user;
