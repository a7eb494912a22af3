pub mod app;
pub mod batch;
pub mod category;
pub mod config;
pub mod domain;
pub mod error;
pub mod keyspace;
pub mod memory;
pub mod metadata;
pub mod output;
pub mod resolve;
pub mod store;
pub mod table;
