//! Domain layer for the Stallplass budget and pricing service.
//!
//! Everything here is synchronous and storage agnostic: the storage crate
//! loads rows, the app crate feeds them through these functions per request.

pub mod budget;
pub mod month;
pub mod pricing;
pub mod types;
pub mod validation;

pub use month::{MonthParseError, YearMonth};
pub use validation::ValidationError;
