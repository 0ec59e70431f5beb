pub mod error;
pub mod profiles;
pub mod types;

pub use error::*;
pub use profiles::*;
pub use types::*;
