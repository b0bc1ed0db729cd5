//! Unified Diagnostics Module
//!
//! Single diagnostic type used across schema resolution, casting and every validation pass.
//! Carries the structured error, the sheet it came from and any related locations
//! (the other rows of a duplicate key, for example).

use serde::Serialize;
use std::fmt;

use crate::error::{CompileError, SourceLocation};

/// Diagnostic codes for categorizing issues
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum DiagnosticCode {
    // =========================================================================
    // Grammar errors
    // =========================================================================
    SyntaxError,
    InvalidName,

    // =========================================================================
    // Casting errors
    // =========================================================================
    NullValue,
    TypeCast,

    // =========================================================================
    // Cross-table errors
    // =========================================================================
    UnresolvedReference,
    SchemaConflict,
    DuplicateKey,
    NotExhaustive,
}

impl DiagnosticCode {
    pub fn of(error: &CompileError) -> Self {
        match error {
            CompileError::Parse(_) => Self::SyntaxError,
            CompileError::NullValue { .. } => Self::NullValue,
            CompileError::TypeCast { .. } => Self::TypeCast,
            CompileError::Reference(_) => Self::UnresolvedReference,
            CompileError::SchemaConflict(_) => Self::SchemaConflict,
            CompileError::DuplicateKey { .. } => Self::DuplicateKey,
            CompileError::Exhaustiveness { .. } => Self::NotExhaustive,
            CompileError::InvalidName(_) => Self::InvalidName,
        }
    }
}

/// A reported violation with its source location
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub error: CompileError,
    pub location: Option<SourceLocation>,
    /// `Table.Column` the violation belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub related: Vec<SourceLocation>,
}

impl Diagnostic {
    pub fn new(error: CompileError) -> Self {
        Self {
            code: DiagnosticCode::of(&error),
            error,
            location: None,
            subject: None,
            related: vec![],
        }
    }

    /// Attach the originating file/sheet
    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Attach the originating file/sheet if known
    pub fn at_opt(mut self, location: Option<SourceLocation>) -> Self {
        self.location = location;
        self
    }

    /// Name the table column the violation belongs to
    pub fn with_context(mut self, table: &str, column: &str) -> Self {
        self.subject = Some(format!("{}.{}", table, column));
        self
    }

    /// Add related information
    pub fn with_related(mut self, related: SourceLocation) -> Self {
        self.related.push(related);
        self
    }

    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

impl From<CompileError> for Diagnostic {
    fn from(error: CompileError) -> Self {
        Self::new(error)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "[{}] {}", loc, self.error)?,
            None => write!(f, "{}", self.error)?,
        }
        if let Some(subject) = &self.subject {
            write!(f, " in {}", subject)?;
        }
        if !self.related.is_empty() {
            let related: Vec<String> = self.related.iter().map(|l| l.to_string()).collect();
            write!(f, " (also at {})", related.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

// =============================================================================
// Convenience Builders
// =============================================================================

/// Create an error for an unresolved table/column/member reference
pub fn unresolved(message: impl Into<String>, location: Option<SourceLocation>) -> Diagnostic {
    Diagnostic::new(CompileError::reference(message)).at_opt(location)
}

/// Create an error for a schema merge or inheritance mismatch
pub fn conflict(message: impl Into<String>, location: Option<SourceLocation>) -> Diagnostic {
    Diagnostic::new(CompileError::conflict(message)).at_opt(location)
}

/// Create an error for a duplicate key citing every location it was defined at
pub fn duplicate_key(table: &str, key: &str, locations: &[SourceLocation]) -> Diagnostic {
    let mut diag = Diagnostic::new(CompileError::DuplicateKey {
        table: table.to_string(),
        key: key.to_string(),
    })
    .at_opt(locations.first().cloned());
    for loc in locations.iter().skip(1) {
        diag = diag.with_related(loc.clone());
    }
    diag
}

// =============================================================================
// Tests
// =============================================================================
