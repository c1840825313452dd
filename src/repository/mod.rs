pub mod execution;

pub use execution::ExecutionRepository;
