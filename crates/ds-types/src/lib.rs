pub mod market;
pub mod session;
pub mod day;
pub mod errors;

pub use market::*;
pub use session::*;
pub use day::*;
pub use errors::*;
