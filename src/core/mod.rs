pub mod chat_stream;
pub mod config;
pub mod credentials;
pub mod keyring;
pub mod message;
pub mod models;
pub mod persistence;
pub mod request;
pub mod transcript;
pub mod turn;
