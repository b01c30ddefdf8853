pub mod chat;
pub mod money;
pub mod ports;
pub mod transaction;
pub mod user;
