pub mod error;
pub mod failure_repository;
pub mod in_memory_repository;
pub mod sqlite_repository;
