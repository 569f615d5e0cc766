pub mod audit;
pub mod auth;
pub mod codec;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod hours;
pub mod limits;
pub mod model;
pub mod observability;
pub mod pattern;
pub mod wal;
pub mod wire;
pub mod workflow;
