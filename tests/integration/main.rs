//! Integration tests: full settlement passes against an in-memory store
//! and against SQLite.

mod memory_store;
mod settlement;
mod sqlite_store;
