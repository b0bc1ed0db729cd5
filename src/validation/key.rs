//! Key checks: one primary and one group key per tier, non-nullable keys, plain enum keys and
//! unique key values

use indexmap::IndexMap;

use super::{table_location, ValidationPass};
use crate::diagnostics::{conflict, duplicate_key, Diagnostic};
use crate::enums::is_combined;
use crate::error::SourceLocation;
use crate::input::CompilerInput;
use crate::schema::{SchemaColumn, SchemaSet};
use crate::session::Session;
use crate::types::{parse_type, BaseKind};
use crate::worker::{RunError, WorkerOptions};

pub enum KeyItem<'a> {
    Table(&'a SchemaSet),
    Consts,
}

pub struct KeyPass<'a> {
    session: &'a Session,
    input: &'a CompilerInput,
}

impl<'a> KeyPass<'a> {
    pub fn new(session: &'a Session, input: &'a CompilerInput) -> Self {
        Self { session, input }
    }

    fn check_declarations(&self, set: &SchemaSet, out: &mut Vec<Diagnostic>) {
        let location = table_location(self.session, self.input, &set.name);

        let primary: Vec<&str> = set
            .columns
            .values()
            .filter(|c| c.is_primary_key())
            .map(|c| c.name.as_str())
            .collect();
        if primary.len() > 1 {
            out.push(conflict(
                format!(
                    "table '{}' declares more than one primary key: {}",
                    set.name,
                    primary.join(", ")
                ),
                location.clone(),
            ));
        }

        let group: Vec<&str> = set
            .columns
            .values()
            .filter(|c| c.is_group_key())
            .map(|c| c.name.as_str())
            .collect();
        if group.len() > 1 {
            out.push(conflict(
                format!(
                    "table '{}' declares more than one group key: {}",
                    set.name,
                    group.join(", ")
                ),
                location.clone(),
            ));
        }

        for column in set.columns.values().filter(|c| c.descriptor.is_key()) {
            if column.descriptor.nullable {
                out.push(
                    conflict(
                        format!("key column '{}' may not be nullable", column.name),
                        location.clone(),
                    )
                    .with_context(&set.name, &column.name),
                );
            }
        }
    }

    /// Enum keys must hold one member, not a combination
    fn check_enum_keys(&self, set: &SchemaSet, out: &mut Vec<Diagnostic>) {
        for column in set.columns.values().filter(|c| c.descriptor.is_key()) {
            if !self.is_enum_typed(column) {
                continue;
            }
            for sheet in &self.input.sheets {
                let bold = if sheet.table == set.name {
                    false
                } else if sheet.has_bold()
                    && self.session.config.parent_table_name(&sheet.table) == set.name
                {
                    true
                } else {
                    continue;
                };

                let cells = sheet
                    .columns
                    .iter()
                    .filter(|c| c.bold == bold && c.name == column.name)
                    .flat_map(|c| c.rows.iter());
                for (row, raw) in cells {
                    if raw.as_text().is_some_and(is_combined) {
                        out.push(
                            conflict(
                                format!("enum key '{}' may not combine members", raw),
                                Some(sheet.location.at_row(*row)),
                            )
                            .with_context(&set.name, &column.name),
                        );
                    }
                }
            }
        }
    }

    fn is_enum_typed(&self, column: &SchemaColumn) -> bool {
        self.session
            .root_type(&column.ty)
            .ok()
            .and_then(|root| parse_type(&root).ok())
            .is_some_and(|d| matches!(d.kind, BaseKind::Enum(_)))
    }

    fn check_duplicates(&self, set: &SchemaSet, out: &mut Vec<Diagnostic>) {
        let Some(primary) = set.primary_key() else {
            return;
        };
        let group = set.group_key();

        let mut seen: IndexMap<String, Vec<SourceLocation>> = IndexMap::new();
        for sheet in self.session.data.sheets(&set.name) {
            for row in &sheet.rows {
                let Some(value) = row.get(&primary.name).filter(|v| !v.is_null()) else {
                    continue;
                };
                let key = match group.and_then(|g| row.get(&g.name)) {
                    Some(parent) => format!("{}/{}", parent, value),
                    None => value.to_string(),
                };
                seen.entry(key).or_default().push(sheet.location_of(row));
            }
        }

        for (key, locations) in seen {
            if locations.len() > 1 {
                out.push(duplicate_key(&set.name, &key, &locations));
            }
        }
    }

    fn check_consts(&self, out: &mut Vec<Diagnostic>) {
        let mut seen: IndexMap<(&str, &str), Vec<SourceLocation>> = IndexMap::new();
        for constant in &self.input.consts {
            seen.entry((constant.table.as_str(), constant.name.as_str()))
                .or_default()
                .push(constant.location.clone());
        }
        for ((table, name), locations) in seen {
            if locations.len() > 1 {
                out.push(duplicate_key(table, name, &locations));
            }
        }
    }
}

impl<'a> ValidationPass for KeyPass<'a> {
    type Item = KeyItem<'a>;

    fn name(&self) -> &'static str {
        "key"
    }

    fn items(&self, _: &WorkerOptions) -> Result<Vec<KeyItem<'a>>, RunError> {
        let mut items: Vec<KeyItem<'a>> = self.session.schemas.iter().map(KeyItem::Table).collect();
        items.push(KeyItem::Consts);
        Ok(items)
    }

    fn check(&self, item: KeyItem<'a>) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        match item {
            KeyItem::Table(set) => {
                self.check_declarations(set, &mut diagnostics);
                self.check_enum_keys(set, &mut diagnostics);
                self.check_duplicates(set, &mut diagnostics);
            }
            KeyItem::Consts => self.check_consts(&mut diagnostics),
        }
        diagnostics
    }
}
