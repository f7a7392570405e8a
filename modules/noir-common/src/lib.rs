pub mod config;
pub mod error;
pub mod taxonomy;
pub mod types;

pub use config::Config;
pub use error::NoirError;
pub use taxonomy::{RelationTaxonomy, TaxonomyEntry};
pub use types::*;
