//! Side-effecting adapters: configuration, git, processes and the pipeline
//! collaborators built on them.

pub mod config;
pub mod git;
pub mod lock;
pub mod normalize;
pub mod process;
pub mod provision;
pub mod publish;
