pub mod client;
pub(crate) mod hub;
pub mod message;
pub(crate) mod publisher;
