pub mod def;

pub use def::*;
