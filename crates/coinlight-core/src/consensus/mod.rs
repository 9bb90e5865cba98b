pub mod commit;
pub mod checkpoint;

pub use commit::*;
pub use checkpoint::*;
