pub mod holidays;
pub mod calendar;
pub mod providers;
pub mod window;
pub mod cache;
pub mod prefetch;

pub use holidays::*;
pub use calendar::*;
pub use providers::*;
pub use window::*;
pub use cache::*;
pub use prefetch::*;
