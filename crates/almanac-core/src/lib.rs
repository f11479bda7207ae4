// Library root: re-exports all modules so the CLI and integration tests can
// reach the engine's public API.

pub mod aggregate;
pub mod config;
pub mod current;
pub mod db;
pub mod engine;
pub mod identity;
pub mod ledger;
pub mod legacy;
pub mod model;
pub mod pairwise;
pub mod rating;
pub mod source;
pub mod streaks;
pub mod sync;
