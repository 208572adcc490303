pub mod member;
pub mod message;
pub mod user;
