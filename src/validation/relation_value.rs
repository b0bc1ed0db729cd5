//! Relation values exist among the realized values of their target
//!
//! Runs in two rounds on the pool: a traversal collects every relation literal from the cast
//! data (through arrays, maps, geometry and DSL arguments), then the literals are checked in
//! chunks against the session's realized-value index.

use super::ValidationPass;
use crate::data::CastedSheet;
use crate::diagnostics::{unresolved, Diagnostic};
use crate::error::SourceLocation;
use crate::schema::SchemaSet;
use crate::session::Session;
use crate::types::{parse_type, BaseKind, TypeDescriptor};
use crate::value::CastedValue;
use crate::worker::{run, FnWorker, RunError, WorkerOptions};

/// One relation literal found in the data
#[derive(Debug, Clone, PartialEq)]
pub struct RelationUse {
    pub table: String,
    pub column: String,
    pub value: String,
    pub location: SourceLocation,
    /// `Table.Column` holding the literal
    pub subject: (String, String),
}

pub struct RelationValuePass<'a> {
    session: &'a Session,
}

impl<'a> RelationValuePass<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Column a relation compares against: the explicit one, else the target's key
    fn target_column(&self, table: &str, column: Option<&str>) -> Option<String> {
        match column {
            Some(column) => Some(column.to_string()),
            None => self.session.schemas.key_of(table).map(|c| c.name.clone()),
        }
    }

    /// Collect `(table, column, value)` for every relation literal inside `value`
    fn walk(
        &self,
        descriptor: &TypeDescriptor,
        value: &CastedValue,
        found: &mut Vec<(String, String, String)>,
    ) {
        match (&descriptor.kind, value) {
            (_, CastedValue::Null) => {}
            (BaseKind::Relation(target), value) => {
                if let Some(column) = self.target_column(&target.table, target.column.as_deref()) {
                    found.push((target.table.clone(), column, value.to_string()));
                }
            }
            (BaseKind::Array(elem), CastedValue::Array(items)) => {
                for item in items {
                    self.walk(elem, item, found);
                }
            }
            (BaseKind::Map(k, v), CastedValue::Map(entries)) => {
                for (key, value) in entries {
                    self.walk(k, key, found);
                    self.walk(v, value, found);
                }
            }
            (BaseKind::Point(elem), CastedValue::Point { x: a, y: b })
            | (BaseKind::Size(elem), CastedValue::Size { width: a, height: b })
            | (BaseKind::Range(elem), CastedValue::Range { min: a, max: b }) => {
                self.walk(elem, a, found);
                self.walk(elem, b, found);
            }
            (BaseKind::Dsl, CastedValue::Dsl(call)) => {
                let Some(prototype) = self.session.dsl.get(&call.name) else {
                    return;
                };
                for (param, arg) in prototype.params.iter().zip(&call.args) {
                    if let Ok(param_type) = parse_type(&param.ty) {
                        self.walk(&param_type, arg, found);
                    }
                }
            }
            _ => {}
        }
    }

    fn traverse_sheet(&self, set: &SchemaSet, sheet: &CastedSheet, out: &mut Vec<RelationUse>) {
        for row in &sheet.rows {
            for column in set.columns.values() {
                let Some(value) = row.get(&column.name) else {
                    continue;
                };
                let mut found = Vec::new();
                self.walk(&column.descriptor, value, &mut found);
                out.extend(found.into_iter().map(|(table, target, value)| RelationUse {
                    table,
                    column: target,
                    value,
                    location: sheet.location_of(row),
                    subject: (set.name.clone(), column.name.clone()),
                }));
            }
        }
    }

    /// Every relation literal of the session, in table and row order
    pub fn traverse(&self, options: &WorkerOptions) -> Result<Vec<RelationUse>, RunError> {
        let sheets: Vec<(&SchemaSet, &CastedSheet)> = self
            .session
            .schemas
            .iter()
            .flat_map(|set| self.session.data.sheets(&set.name).iter().map(move |s| (set, s)))
            .collect();

        let traveller = FnWorker::new(
            "relation-traverse",
            |(set, sheet): (&SchemaSet, &CastedSheet), out: &mut Vec<RelationUse>| {
                self.traverse_sheet(set, sheet, out);
                Ok(())
            },
        );
        let mut uses = run(&traveller, sheets, options)?;

        for constant in self.session.data.consts() {
            let Ok(descriptor) = parse_type(&constant.ty) else {
                continue;
            };
            let mut found = Vec::new();
            self.walk(&descriptor, &constant.value, &mut found);
            uses.extend(found.into_iter().map(|(table, column, value)| RelationUse {
                table,
                column,
                value,
                location: constant.location.clone(),
                subject: (constant.table.clone(), constant.name.clone()),
            }));
        }
        Ok(uses)
    }
}

impl<'a> ValidationPass for RelationValuePass<'a> {
    type Item = Vec<RelationUse>;

    fn name(&self) -> &'static str {
        "relation-value"
    }

    fn items(&self, options: &WorkerOptions) -> Result<Vec<Vec<RelationUse>>, RunError> {
        let uses = self.traverse(options)?;
        let size = self.session.config.relation_chunk_size();
        Ok(uses.chunks(size).map(<[RelationUse]>::to_vec).collect())
    }

    fn check(&self, chunk: Vec<RelationUse>) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for usage in chunk {
            let realized = self.session.realized_values(&usage.table, &usage.column);
            if !realized.contains(&usage.value) {
                diagnostics.push(
                    unresolved(
                        format!(
                            "value '{}' does not exist in {}.{}",
                            usage.value, usage.table, usage.column
                        ),
                        Some(usage.location),
                    )
                    .with_context(&usage.subject.0, &usage.subject.1),
                );
            }
        }
        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::dsl::DslParameter;
    use crate::input::{CompilerInput, RawColumn, RawConst, RawSheet};
    use crate::pipeline::Compiler;
    use crate::validation::run_pass;
    use pretty_assertions::assert_eq;

    fn input() -> CompilerInput {
        CompilerInput::new()
            .sheet(
                RawSheet::new(SourceLocation::new("Item.xlsx", "Items"), "Item")
                    .column(RawColumn::new("Id", "*int").cell(1, "1").cell(2, "2")),
            )
            .sheet(
                RawSheet::new(SourceLocation::new("Item.xlsx", "Weapons"), "Weapon")
                    .based("Item")
                    .json("Item")
                    .column(RawColumn::new("Id", "*int").cell(1, "100")),
            )
            .sheet(
                RawSheet::new(SourceLocation::new("Drop.xlsx", "Drops"), "Drop")
                    .column(RawColumn::new("Id", "*int").cell(1, "1").cell(2, "2").cell(3, "3"))
                    .column(
                        RawColumn::new("Items", "[$Item]?")
                            .cell(1, "1|100")
                            .cell(2, "2|7"),
                    )
                    .column(RawColumn::new("Reward", "dsl?").cell(3, "Give(9)")),
            )
            .dsl("Give", vec![DslParameter::new("item", "$Item")])
            .constant(RawConst::new(
                SourceLocation::new("Const.xlsx", "Game"),
                "Game",
                "StarterItem",
                "$Item",
                "5",
            ))
    }

    #[test]
    fn test_traversal_unwraps_containers_and_calls() {
        let input = input();
        let session = Compiler::new(CompilerConfig::default()).prepare(&input).unwrap();
        let pass = RelationValuePass::new(&session);

        let uses = pass.traverse(&WorkerOptions::new(2)).unwrap();
        let values: Vec<&str> = uses.iter().map(|u| u.value.as_str()).collect();
        assert_eq!(values, vec!["1", "100", "2", "7", "9", "5"]);
        assert!(uses.iter().all(|u| u.table == "Item" && u.column == "Id"));
    }

    #[test]
    fn test_missing_values_are_reported() {
        let input = input();
        let session = Compiler::new(CompilerConfig {
            relation_chunk_size: 2,
            ..CompilerConfig::default()
        })
        .prepare(&input)
        .unwrap();

        let found = match run_pass(&RelationValuePass::new(&session), &WorkerOptions::new(3)) {
            Err(RunError::Rejected(d)) => d,
            other => panic!("unexpected {:?}", other),
        };
        let messages: Vec<String> = found.iter().map(|d| d.to_string()).collect();
        assert_eq!(
            messages,
            vec![
                "[Drop.xlsx:Drops:2] value '7' does not exist in Item.Id in Drop.Items",
                "[Drop.xlsx:Drops:3] value '9' does not exist in Item.Id in Drop.Reward",
                "[Const.xlsx:Game] value '5' does not exist in Item.Id in Game.StarterItem",
            ]
        );
    }
}
