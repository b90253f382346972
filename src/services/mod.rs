pub mod auth;
pub mod captcha;
pub mod email;
pub mod password;
pub mod permission;
pub mod token;
pub mod user;
