pub mod helpers;
mod scenarios;

pub use helpers::*;
