pub mod error;
pub mod list;
pub mod types;

pub use error::MortarError;
pub use list::*;
pub use types::*;
