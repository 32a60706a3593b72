#![forbid(unsafe_code)]

mod audit;
mod evidence;
mod graph;
mod moves;
mod runs;
mod tool_runs;
mod versioned;

pub use audit::*;
pub use evidence::*;
pub use graph::*;
pub use moves::*;
pub use runs::*;
pub use tool_runs::*;
pub use versioned::*;
