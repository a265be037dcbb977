pub mod alloc;
pub mod bencher;
pub mod cli;
pub mod config;
pub mod engine;
pub mod report;
pub mod sampler;
pub mod state;
