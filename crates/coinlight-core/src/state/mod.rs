pub mod account;
pub mod key;
pub mod proof;
pub mod tree;

pub use account::*;
pub use key::*;
pub use proof::*;
pub use tree::*;
