pub mod service;

pub use service::{load_default, load_from, ServiceConfig};
