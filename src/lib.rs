pub mod bulk;
pub mod cli;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod domain;
pub mod notice;
pub mod notification;
pub mod poller;
pub mod problems;
pub mod retention;
pub mod store;
pub mod version;
