//! Test modules for the executor crate.


pub mod cursor;
pub mod pipeline;
