pub mod navigation;
pub mod config;
pub mod inspector;

pub use navigation::*;
pub use config::*;
pub use inspector::*;
