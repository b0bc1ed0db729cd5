//! Error taxonomy shared by every compiler component
//!
//! Functions return `Result<T, CompileError>`; validation passes wrap these into
//! [`Diagnostic`](crate::diagnostics::Diagnostic)s together with the sheet they came from.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Where a value, column or definition came from
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceLocation {
    pub file: String,
    pub sheet: String,
    pub row: Option<u32>,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, sheet: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            sheet: sheet.into(),
            row: None,
        }
    }

    /// Same sheet, pinned to a row
    pub fn at_row(&self, row: u32) -> Self {
        Self {
            file: self.file.clone(),
            sheet: self.sheet.clone(),
            row: Some(row),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row {
            Some(row) => write!(f, "{}:{}:{}", self.file, self.sheet, row),
            None => write!(f, "{}:{}", self.file, self.sheet),
        }
    }
}

/// Every structured failure the compiler can produce
#[derive(Debug, Error, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CompileError {
    /// Malformed type annotation, enum expression or DSL call
    #[error("parse error: {0}")]
    Parse(String),

    #[error("type '{ty}' does not accept an empty value")]
    NullValue { ty: String },

    #[error("cannot cast '{value}' to '{ty}': {detail}")]
    TypeCast {
        value: String,
        ty: String,
        detail: String,
    },

    /// Missing table, column, enum member, DSL prototype or constant
    #[error("{0}")]
    Reference(String),

    #[error("{0}")]
    SchemaConflict(String),

    #[error("duplicate key '{key}' in table '{table}'")]
    DuplicateKey { table: String, key: String },

    #[error("strong reference '{column}' is missing {}", .missing.join(", "))]
    Exhaustiveness {
        column: String,
        missing: Vec<String>,
    },

    #[error("'{0}' is not a valid identifier")]
    InvalidName(String),
}

impl CompileError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn reference(message: impl Into<String>) -> Self {
        Self::Reference(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::SchemaConflict(message.into())
    }

    pub fn type_cast(value: impl fmt::Display, ty: &str, detail: impl Into<String>) -> Self {
        Self::TypeCast {
            value: value.to_string(),
            ty: ty.to_string(),
            detail: detail.into(),
        }
    }

    pub fn null_value(ty: &str) -> Self {
        Self::NullValue { ty: ty.to_string() }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display() {
        let loc = SourceLocation::new("Item.xlsx", "Weapons");
        assert_eq!(loc.to_string(), "Item.xlsx:Weapons");
        assert_eq!(loc.at_row(12).to_string(), "Item.xlsx:Weapons:12");
    }

    #[test]
    fn test_exhaustiveness_message_lists_members() {
        let err = CompileError::Exhaustiveness {
            column: "Grade".into(),
            missing: vec!["Rare".into(), "Epic".into()],
        };
        assert_eq!(
            err.to_string(),
            "strong reference 'Grade' is missing Rare, Epic"
        );
    }
}
