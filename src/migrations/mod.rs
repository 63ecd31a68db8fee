//! Versioned, reversible transformations of stored documents

pub mod files;
pub mod migration;
pub mod operations;
pub mod runner;

pub use files::{MigrationFile, OperationSpec, load_migration_files};
pub use migration::{Migration, MigrationHistory, MigrationRecord};
pub use operations::{
    AddField, ChangeFieldType, ConditionFn, ConditionalTransform, Document, FieldDefault, JoinFn,
    MergeFields, MigrationContext, MigrationOperation, RemoveField, RenameField, RenameModel,
    SplitField, SplitFn, TransformField, ValueFn, value_fn,
};
pub use runner::{MigrationOutcome, MigrationRunner, MigrationStatus};
