pub mod compactor;
pub mod config;
pub mod display;
pub mod error;
pub mod identity;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod service;
pub mod store;
pub mod wal;
