pub mod app;
pub mod client;
pub mod config;
pub mod crawler;
pub mod domain;
pub mod error;
pub mod export;
pub mod hypermedia;
pub mod output;
pub mod store;
pub mod vcs;
