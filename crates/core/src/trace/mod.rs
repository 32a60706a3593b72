#![forbid(unsafe_code)]

mod node_id;
mod types;

pub use node_id::*;
pub use types::*;

#[cfg(test)]
mod tests;
