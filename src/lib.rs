pub mod config;
pub mod db;
pub mod models;
pub mod similar;
pub mod validate;

pub use config::{Config, ConfigError};
pub use db::{Database, StoreError};
pub use models::{Booking, Event, EventDraft};
pub use similar::{SimilarityPolicy, TagOverlap};
pub use validate::ValidationError;
