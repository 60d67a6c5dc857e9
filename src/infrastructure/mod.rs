pub mod broker;
pub mod cache;
pub mod persistence;
pub mod sender;
