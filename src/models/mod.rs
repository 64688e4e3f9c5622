pub mod object;
pub mod pager;

pub use object::*;
pub use pager::*;
