pub mod outcome;
pub mod report;
pub mod stage_io;

pub use outcome::*;
pub use report::*;
pub use stage_io::*;
