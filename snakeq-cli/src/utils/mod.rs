pub mod database;
pub mod display;
pub mod validation;

pub use database::*;
pub use display::*;
pub use validation::*;
