//! Compiled output and per-scope views
//!
//! [`CompileOutput`] is what downstream serializers and code generators receive. The scoped
//! views project every output group onto the columns one scope (server or client) can see and
//! shape it the way the emitted JSON is shaped: grouped by group key and then keyed by primary
//! key, keyed by primary key, or a plain list.

use indexmap::IndexMap;
use serde::Serialize;

use crate::data::{CastedConst, TableData};
use crate::dsl::DslRegistry;
use crate::enums::EnumRegistry;
use crate::schema::{SchemaContainer, SchemaSet, Scope, ScopeFilter};
use crate::session::Session;
use crate::value::CastedValue;

pub type ScopedRow = IndexMap<String, CastedValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScopedContainer {
    Grouped(IndexMap<String, ScopedContainer>),
    Keyed(IndexMap<String, ScopedRow>),
    List(Vec<ScopedRow>),
}

impl ScopedContainer {
    pub fn len(&self) -> usize {
        match self {
            Self::Grouped(groups) => groups.values().map(ScopedContainer::len).sum(),
            Self::Keyed(rows) => rows.len(),
            Self::List(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn from_rows(rows: Vec<ScopedRow>, primary: Option<&str>) -> Self {
        match primary {
            Some(pk) => Self::Keyed(
                rows.into_iter()
                    .map(|row| {
                        let key = row.get(pk).map(|v| v.to_string()).unwrap_or_default();
                        (key, row)
                    })
                    .collect(),
            ),
            None => Self::List(rows),
        }
    }
}

/// Everything a successful compilation produces
#[derive(Debug)]
pub struct CompileOutput {
    pub schemas: SchemaContainer,
    pub enums: EnumRegistry,
    pub dsl: DslRegistry,
    pub consts: Vec<CastedConst>,
    pub data: TableData,
}

impl CompileOutput {
    pub fn from_session(session: Session) -> Self {
        let Session {
            schemas,
            enums,
            dsl,
            mut data,
            ..
        } = session;
        let consts = data.take_consts();
        Self {
            schemas,
            enums,
            dsl,
            consts,
            data,
        }
    }

    /// Output group names in schema order
    pub fn groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = Vec::new();
        for set in self.schemas.iter() {
            if !groups.contains(&set.json.as_str()) {
                groups.push(set.json.as_str());
            }
        }
        groups
    }

    /// Schema deciding how a group is keyed: the table the group is named after, else its
    /// first table with visible columns
    fn group_owner(&self, group: &str, scope: Scope) -> Option<SchemaSet> {
        self.schemas
            .scope_schema(group, scope, ScopeFilter::Contains)
            .filter(|set| set.json == group)
            .or_else(|| {
                self.schemas
                    .tables_in_group(group)
                    .find_map(|set| self.schemas.scope_schema(&set.name, scope, ScopeFilter::Contains))
            })
    }

    fn scoped_rows(&self, group: &str, scope: Scope) -> Vec<ScopedRow> {
        let mut rows = Vec::new();
        for set in self.schemas.tables_in_group(group) {
            let Some(visible) = self.schemas.scope_schema(&set.name, scope, ScopeFilter::Contains)
            else {
                continue;
            };
            for row in self.data.rows_of(&set.name) {
                rows.push(
                    visible
                        .columns
                        .keys()
                        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                        .collect(),
                );
            }
        }
        rows
    }

    /// One output group as seen by `scope`; `None` when no column of the group is visible
    pub fn scoped_group(&self, group: &str, scope: Scope) -> Option<ScopedContainer> {
        let owner = self.group_owner(group, scope)?;
        let primary = owner.primary_key().map(|c| c.name.as_str());
        let rows = self.scoped_rows(group, scope);

        let Some(group_key) = owner.group_key().map(|c| c.name.as_str()) else {
            return Some(ScopedContainer::from_rows(rows, primary));
        };

        let mut grouped: IndexMap<String, Vec<ScopedRow>> = IndexMap::new();
        for row in rows {
            let key = row.get(group_key).map(|v| v.to_string()).unwrap_or_default();
            grouped.entry(key).or_default().push(row);
        }
        Some(ScopedContainer::Grouped(
            grouped
                .into_iter()
                .map(|(key, rows)| (key, ScopedContainer::from_rows(rows, primary)))
                .collect(),
        ))
    }

    /// Every output group as seen by `scope`
    pub fn scoped(&self, scope: Scope) -> IndexMap<String, ScopedContainer> {
        self.groups()
            .into_iter()
            .filter_map(|group| {
                self.scoped_group(group, scope)
                    .map(|container| (group.to_string(), container))
            })
            .collect()
    }

    /// Constants visible in `scope`, by table then name
    pub fn scoped_consts(&self, scope: Scope) -> IndexMap<String, IndexMap<String, CastedValue>> {
        let mut tables: IndexMap<String, IndexMap<String, CastedValue>> = IndexMap::new();
        for constant in self.consts.iter().filter(|c| c.scope.contains(scope)) {
            tables
                .entry(constant.table.clone())
                .or_default()
                .insert(constant.name.clone(), constant.value.clone());
        }
        tables
    }
}
