//! sheetc: type-checking compiler for spreadsheet-defined data tables
//!
//! This crate is the compiler front-end and checker. Reading workbooks, emitting files and
//! generating code are left to callers, which hand in raw sheets and take back typed data:
//! - Type annotation grammar (`*T`, `(T)`, `$T`, `!T`, `~T`, `T?`, containers, generics)
//! - Enum tables and the single-precedence bitwise expression evaluator
//! - DSL prototypes and call parsing
//! - Schema resolution (sheet merging, inheritance, bold attribute tables)
//! - Memoizing value caster with relation root-type resolution
//! - Validation passes running on a parallel worker pool
//! - YAML configuration types and loader

pub mod caster;
pub mod config;
pub mod data;
pub mod diagnostics;
pub mod dsl;
pub mod enums;
pub mod error;
pub mod input;
pub mod output;
pub mod pipeline;
pub mod resolver;
pub mod schema;
pub mod session;
pub mod types;
pub mod validation;
pub mod value;
pub mod worker;

// Re-export commonly used types
pub use config::{CompilerConfig, ConfigLoader};
pub use data::{CastedConst, CastedRow, CastedSheet, TableData};
pub use diagnostics::{Diagnostic, DiagnosticCode};
pub use dsl::{DslParameter, DslPrototype, DslRegistry};
pub use enums::{EnumRegistry, EnumTable, EnumValue};
pub use error::{CompileError, CompileResult, SourceLocation};
pub use input::{CompilerInput, RawColumn, RawConst, RawEnumSheet, RawSheet, RawValue};
pub use output::{CompileOutput, ScopedContainer, ScopedRow};
pub use pipeline::{Compiler, PipelineError};
pub use schema::{SchemaColumn, SchemaContainer, SchemaSet, Scope, ScopeFilter};
pub use session::Session;
pub use types::{nake, parse_type, BaseKind, KeyRole, NakeMask, RelationRef, TypeDescriptor};
pub use value::{CastedValue, DslValue};
pub use worker::{run, FnWorker, ParallelWorker, RunError, WorkError, WorkerOptions};
