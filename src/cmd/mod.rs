pub mod chat;
pub mod configure;
