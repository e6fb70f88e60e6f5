pub mod collab;
pub mod engine;
pub mod http;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod provider;
pub mod reaper;
pub mod wal;
