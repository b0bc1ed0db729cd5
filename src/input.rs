//! Raw compiler input
//!
//! What the spreadsheet reader hands over: per sheet an ordered list of column
//! definitions with sparse row-index → scalar maps, plus enum sheets and constants.
//! Nothing here is validated; that is the job of the resolve/cast stages.

use chrono::{NaiveDateTime, TimeDelta};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::dsl::{DslParameter, DslRegistry};
use crate::error::SourceLocation;
use crate::schema::Scope;

/// A raw cell scalar
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RawValue {
    Null,
    Bool(bool),
    /// Text and numbers-as-text
    Text(String),
    /// Pre-resolved spreadsheet date cell
    DateTime(NaiveDateTime),
    /// Pre-resolved spreadsheet time cell
    TimeSpan(TimeDelta),
}

impl RawValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Trim text; empty and `null` become [`RawValue::Null`]
    pub fn normalize(self) -> Self {
        match self {
            Self::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() || trimmed == "null" {
                    Self::Null
                } else if trimmed.len() == s.len() {
                    Self::Text(s)
                } else {
                    Self::Text(trimmed.to_string())
                }
            }
            other => other,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => {
                let s = s.trim();
                s.is_empty() || s == "null"
            }
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Text(s) => write!(f, "{}", s),
            Self::DateTime(dt) => write!(f, "{}", dt),
            Self::TimeSpan(ts) => write!(f, "{}", ts),
        }
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for RawValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<NaiveDateTime> for RawValue {
    fn from(dt: NaiveDateTime) -> Self {
        Self::DateTime(dt)
    }
}

/// Column header plus its sparse cells
#[derive(Debug, Clone, PartialEq)]
pub struct RawColumn {
    pub name: String,
    pub ty: String,
    pub scope: Scope,
    /// Marks a column of the implicit attribute table
    pub bold: bool,
    pub rows: BTreeMap<u32, RawValue>,
}

impl RawColumn {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            scope: Scope::Common,
            bold: false,
            rows: BTreeMap::new(),
        }
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    pub fn cell(mut self, row: u32, value: impl Into<RawValue>) -> Self {
        self.rows.insert(row, value.into());
        self
    }

    /// Header equality: name, type, scope and bold flag
    pub fn same_header(&self, other: &RawColumn) -> bool {
        self.name == other.name
            && self.ty == other.ty
            && self.scope == other.scope
            && self.bold == other.bold
    }
}

/// One data sheet of a table
#[derive(Debug, Clone, PartialEq)]
pub struct RawSheet {
    pub location: SourceLocation,
    pub table: String,
    /// Base table this one inherits from
    pub based: Option<String>,
    /// Output group; defaults to the table name
    pub json: Option<String>,
    pub columns: Vec<RawColumn>,
}

impl RawSheet {
    pub fn new(location: SourceLocation, table: impl Into<String>) -> Self {
        Self {
            location,
            table: table.into(),
            based: None,
            json: None,
            columns: vec![],
        }
    }

    pub fn based(mut self, based: impl Into<String>) -> Self {
        self.based = Some(based.into());
        self
    }

    pub fn json(mut self, json: impl Into<String>) -> Self {
        self.json = Some(json.into());
        self
    }

    pub fn column(mut self, column: RawColumn) -> Self {
        self.columns.push(column);
        self
    }

    pub fn has_bold(&self) -> bool {
        self.columns.iter().any(|c| c.bold)
    }

    /// Every row index that has at least one cell in the selected tier
    pub fn rows_of(&self, bold: bool) -> Vec<u32> {
        let mut rows: Vec<u32> = self
            .columns
            .iter()
            .filter(|c| c.bold == bold)
            .flat_map(|c| c.rows.keys().copied())
            .collect();
        rows.sort_unstable();
        rows.dedup();
        rows
    }
}

/// One enum sheet: ordered member name → definition text
#[derive(Debug, Clone, PartialEq)]
pub struct RawEnumSheet {
    pub location: SourceLocation,
    pub table: String,
    pub members: Vec<(String, String)>,
}

impl RawEnumSheet {
    pub fn new(location: SourceLocation, table: impl Into<String>) -> Self {
        Self {
            location,
            table: table.into(),
            members: vec![],
        }
    }

    pub fn member(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.members.push((name.into(), value.into()));
        self
    }
}

/// A named constant
#[derive(Debug, Clone, PartialEq)]
pub struct RawConst {
    pub location: SourceLocation,
    pub table: String,
    pub name: String,
    pub ty: String,
    pub scope: Scope,
    pub value: RawValue,
}

impl RawConst {
    pub fn new(
        location: SourceLocation,
        table: impl Into<String>,
        name: impl Into<String>,
        ty: impl Into<String>,
        value: impl Into<RawValue>,
    ) -> Self {
        Self {
            location,
            table: table.into(),
            name: name.into(),
            ty: ty.into(),
            scope: Scope::Common,
            value: value.into(),
        }
    }
}

/// Everything one compilation run consumes
#[derive(Debug, Clone, Default)]
pub struct CompilerInput {
    pub sheets: Vec<RawSheet>,
    pub enums: Vec<RawEnumSheet>,
    pub consts: Vec<RawConst>,
    pub dsl: DslRegistry,
}

impl CompilerInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet(mut self, sheet: RawSheet) -> Self {
        self.sheets.push(sheet);
        self
    }

    pub fn enum_sheet(mut self, sheet: RawEnumSheet) -> Self {
        self.enums.push(sheet);
        self
    }

    pub fn constant(mut self, constant: RawConst) -> Self {
        self.consts.push(constant);
        self
    }

    pub fn dsl(mut self, name: impl Into<String>, params: Vec<DslParameter>) -> Self {
        self.dsl.insert(name, params);
        self
    }

    /// Sheets grouped by table name, tables in first-seen order
    pub fn tables(&self) -> IndexMap<&str, Vec<&RawSheet>> {
        let mut tables: IndexMap<&str, Vec<&RawSheet>> = IndexMap::new();
        for sheet in &self.sheets {
            tables.entry(sheet.table.as_str()).or_default().push(sheet);
        }
        tables
    }
}

/// Serialized form used when handing raw values to external diagnostics renderers
impl Serialize for RawValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            other => serializer.collect_str(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(RawValue::text("  ").normalize(), RawValue::Null);
        assert_eq!(RawValue::text(" null ").normalize(), RawValue::Null);
        assert_eq!(RawValue::text(" 12 ").normalize(), RawValue::text("12"));
        assert_eq!(RawValue::Bool(true).normalize(), RawValue::Bool(true));
        assert!(RawValue::text("").is_null());
        assert!(!RawValue::text("nullable").is_null());
    }

    #[test]
    fn test_rows_of_tier() {
        let sheet = RawSheet::new(SourceLocation::new("Item.xlsx", "Weapons"), "Item")
            .column(RawColumn::new("Group", "*int").bold().cell(1, "1").cell(5, "2"))
            .column(RawColumn::new("Id", "*int").cell(2, "10").cell(3, "11").cell(6, "20"))
            .column(RawColumn::new("Name", "string").cell(3, "Sword").cell(7, "Axe"));

        assert!(sheet.has_bold());
        assert_eq!(sheet.rows_of(true), vec![1, 5]);
        assert_eq!(sheet.rows_of(false), vec![2, 3, 6, 7]);
    }

    #[test]
    fn test_tables_group_sheets() {
        let input = CompilerInput::new()
            .sheet(RawSheet::new(SourceLocation::new("a.xlsx", "A"), "Item"))
            .sheet(RawSheet::new(SourceLocation::new("b.xlsx", "B"), "Skill"))
            .sheet(RawSheet::new(SourceLocation::new("c.xlsx", "C"), "Item"));
        let tables = input.tables();
        assert_eq!(tables.keys().copied().collect::<Vec<_>>(), vec!["Item", "Skill"]);
        assert_eq!(tables["Item"].len(), 2);
    }
}
