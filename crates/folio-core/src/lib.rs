pub mod config;
pub mod error;
pub mod types;

pub use error::{FolioError, FolioResult};
pub use types::{BookMetadata, FetchedUnit, UnitIndex};
