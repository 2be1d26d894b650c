mod app;
pub mod alert;
pub mod classifier;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod reports;
pub mod sensing;
pub mod settings;
pub mod sync;
pub mod utils;

pub use app::{run, AppState};
