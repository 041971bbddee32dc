// Core parsing primitives: the block kernel, the row machine, and the
// field shape helpers they share.

pub mod field;
pub mod kernel;
pub mod machine;
