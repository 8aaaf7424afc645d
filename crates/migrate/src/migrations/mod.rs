//! Migration System
//!
//! Discovery, ledger, execution and the migration box that ties them together.

pub mod definitions;
pub mod executor;
pub mod ledger;
pub mod migration_box;
pub mod source;
pub mod statements;

pub use definitions::*;
pub use executor::Executor;
pub use ledger::Ledger;
pub use migration_box::{BoxState, MigrationBox, MigrationStatuses};
pub use source::{parse_migration, DirectorySource, EmbeddedSource, MigrationSet, MigrationSource};
pub use statements::split_statements;
