//! Throwaway-database documentation pipeline.
//! Spins up PostgreSQL, applies per-schema migrations, generates schema
//! docs with tbls, and tears everything down again.

pub mod config;
pub mod dbtool;
pub mod error;
pub mod migrator;
pub mod runner;
pub mod tbls;

pub use config::{Config, Database, SchemaJob};
pub use error::PipelineError;
pub use migrator::{MigrationApplicator, SqlxMigrator};
pub use runner::{DbBackend, PostgresDocker, PostgresEmbedded, Runner};
pub use tbls::{DocGenerator, Tbls, ToolStatus};
