pub mod constraints;
pub mod stage;
pub mod strategies;
pub mod types;

pub use constraints::*;
pub use stage::*;
pub use strategies::*;
pub use types::*;
