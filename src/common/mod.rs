pub mod errors;
pub mod logger;
pub mod types;
pub mod utils;

pub use errors::*;
pub use types::*;
pub use utils::*;
