pub mod battery;
pub mod market;
pub mod schedule;

pub use battery::*;
pub use market::*;
pub use schedule::*;
