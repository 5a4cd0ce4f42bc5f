pub mod capability;
pub mod events;
pub mod strategy;

pub use capability::*;
pub use events::*;
pub use strategy::*;
