#![warn(missing_docs)]

//! Light weight helpers shared by the cartograph crates. They are kept free
//! of engine concepts so that both the schema and the query crates can
//! depend on them.

mod sync;
pub use sync::*;

pub mod time;
