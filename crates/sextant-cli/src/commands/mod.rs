pub mod arch;
pub mod callgraph;
pub mod impact;
pub mod refs;
pub mod search;
pub mod status;
pub mod symbol;
