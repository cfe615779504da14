pub mod connection;
pub mod message;
