//! Resolved table schemas
//!
//! One [`SchemaSet`] per table (attribute tables included), collected in a
//! [`SchemaContainer`]. Sets are built once by the resolver and never mutated.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{CompileError, CompileResult};
use crate::types::{KeyRole, TypeDescriptor};

/// Which outputs a column is emitted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Server,
    Client,
    Common,
}

impl Scope {
    fn bits(self) -> u8 {
        match self {
            Self::Server => 0b01,
            Self::Client => 0b10,
            Self::Common => 0b11,
        }
    }

    /// Every flag of `other` is set in `self`
    pub fn contains(self, other: Scope) -> bool {
        self.bits() & other.bits() == other.bits()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => write!(f, "Server"),
            Self::Client => write!(f, "Client"),
            Self::Common => write!(f, "Common"),
        }
    }
}

/// How [`SchemaContainer::scope_schema`] selects columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeFilter {
    /// Column scope equals the requested scope
    Match,
    /// Column scope includes the requested scope
    Contains,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaColumn {
    pub name: String,
    /// Annotation as written in the sheet
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(skip)]
    pub descriptor: TypeDescriptor,
    pub scope: Scope,
    /// Declared by the base table too
    pub inherited: bool,
}

impl SchemaColumn {
    pub fn is_primary_key(&self) -> bool {
        self.descriptor.key == KeyRole::Primary
    }

    pub fn is_group_key(&self) -> bool {
        self.descriptor.key == KeyRole::Group
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaSet {
    pub name: String,
    pub based: Option<String>,
    /// Output group this table is emitted into
    pub json: String,
    pub columns: IndexMap<String, SchemaColumn>,
}

impl SchemaSet {
    pub fn new(name: impl Into<String>, based: Option<String>, json: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            based,
            json: json.into(),
            columns: IndexMap::new(),
        }
    }

    pub fn push(&mut self, column: SchemaColumn) {
        self.columns.insert(column.name.clone(), column);
    }

    pub fn get(&self, column: &str) -> Option<&SchemaColumn> {
        self.columns.get(column)
    }

    pub fn primary_key(&self) -> Option<&SchemaColumn> {
        self.columns.values().find(|c| c.is_primary_key())
    }

    pub fn group_key(&self) -> Option<&SchemaColumn> {
        self.columns.values().find(|c| c.is_group_key())
    }

    /// Group key, else primary key
    pub fn key(&self) -> Option<&SchemaColumn> {
        self.group_key().or_else(|| self.primary_key())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SchemaContainer {
    tables: IndexMap<String, SchemaSet>,
}

impl SchemaContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, set: SchemaSet) {
        self.tables.insert(set.name.clone(), set);
    }

    pub fn get(&self, table: &str) -> Option<&SchemaSet> {
        self.tables.get(table)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SchemaSet> {
        self.tables.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn key_of(&self, table: &str) -> Option<&SchemaColumn> {
        self.get(table).and_then(SchemaSet::key)
    }

    pub fn is_keyed(&self, table: &str) -> bool {
        self.key_of(table).is_some()
    }

    /// Tables emitted into output group `json`
    pub fn tables_in_group<'a>(&'a self, json: &'a str) -> impl Iterator<Item = &'a SchemaSet> {
        self.tables.values().filter(move |s| s.json == json)
    }

    /// Number of `based` links above `table`
    pub fn inheritance_depth(&self, table: &str) -> CompileResult<usize> {
        let mut seen = HashSet::new();
        let mut depth = 0;
        let mut current = self
            .get(table)
            .ok_or_else(|| CompileError::reference(format!("table '{}' is not defined", table)))?;
        seen.insert(current.name.as_str());

        while let Some(based) = current.based.as_deref() {
            if !seen.insert(based) {
                return Err(CompileError::conflict(format!(
                    "table '{}' inherits from itself through '{}'",
                    table, based
                )));
            }
            current = self.get(based).ok_or_else(|| {
                CompileError::reference(format!(
                    "base table '{}' of '{}' is not defined",
                    based, current.name
                ))
            })?;
            depth += 1;
        }
        Ok(depth)
    }

    /// Copy of `table` reduced to the columns visible in `scope`
    pub fn scope_schema(&self, table: &str, scope: Scope, filter: ScopeFilter) -> Option<SchemaSet> {
        let schema = self.get(table)?;
        let columns: IndexMap<String, SchemaColumn> = schema
            .columns
            .iter()
            .filter(|(_, c)| match filter {
                ScopeFilter::Match => c.scope == scope,
                ScopeFilter::Contains => c.scope.contains(scope),
            })
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect();
        if columns.is_empty() {
            return None;
        }
        Some(SchemaSet {
            name: schema.name.clone(),
            based: schema.based.clone(),
            json: schema.json.clone(),
            columns,
        })
    }
}
