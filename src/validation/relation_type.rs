//! `$Table[.Column]` annotations name a keyed table and an existing column

use super::{table_location, ValidationPass};
use crate::diagnostics::Diagnostic;
use crate::error::{CompileError, CompileResult};
use crate::input::{CompilerInput, RawConst};
use crate::schema::{SchemaContainer, SchemaSet};
use crate::session::Session;
use crate::types::{parse_type, RelationRef};
use crate::worker::{RunError, WorkerOptions};

/// Target table exists and is keyed; an explicit column exists on it
pub fn check_relation(schemas: &SchemaContainer, target: &RelationRef) -> CompileResult<()> {
    let Some(schema) = schemas.get(&target.table) else {
        return Err(CompileError::reference(format!(
            "relation '${}' targets an undefined table",
            target
        )));
    };
    if schema.key().is_none() {
        return Err(CompileError::reference(format!(
            "relation '${}' targets table '{}', which has no key",
            target, target.table
        )));
    }
    if let Some(column) = &target.column {
        if schema.get(column).is_none() {
            return Err(CompileError::reference(format!(
                "relation '${}' targets column '{}', which '{}' does not define",
                target, column, target.table
            )));
        }
    }
    Ok(())
}

pub enum RelationItem<'a> {
    Table(&'a SchemaSet),
    Const(&'a RawConst),
}

pub struct RelationTypePass<'a> {
    session: &'a Session,
    input: &'a CompilerInput,
}

impl<'a> RelationTypePass<'a> {
    pub fn new(session: &'a Session, input: &'a CompilerInput) -> Self {
        Self { session, input }
    }

    /// Every link exists, then the whole chain resolves (catches cycles)
    fn check_type(&self, ty: &str) -> Vec<CompileError> {
        let descriptor = match parse_type(ty) {
            Ok(d) => d,
            Err(e) => return vec![e],
        };
        let errors: Vec<CompileError> = descriptor
            .relations()
            .into_iter()
            .filter_map(|target| check_relation(&self.session.schemas, target).err())
            .collect();
        if !errors.is_empty() || descriptor.relations().is_empty() {
            return errors;
        }
        match self.session.root_type(ty) {
            Ok(_) => vec![],
            Err(e) => vec![e],
        }
    }
}

impl<'a> ValidationPass for RelationTypePass<'a> {
    type Item = RelationItem<'a>;

    fn name(&self) -> &'static str {
        "relation-type"
    }

    fn items(&self, _: &WorkerOptions) -> Result<Vec<RelationItem<'a>>, RunError> {
        let mut items: Vec<RelationItem<'a>> =
            self.session.schemas.iter().map(RelationItem::Table).collect();
        items.extend(self.session.constants().map(RelationItem::Const));
        Ok(items)
    }

    fn check(&self, item: RelationItem<'a>) -> Vec<Diagnostic> {
        match item {
            RelationItem::Table(set) => {
                let location = table_location(self.session, self.input, &set.name);
                let mut diagnostics = Vec::new();
                for column in set.columns.values() {
                    for e in self.check_type(&column.ty) {
                        diagnostics.push(
                            Diagnostic::new(e)
                                .at_opt(location.clone())
                                .with_context(&set.name, &column.name),
                        );
                    }
                }
                diagnostics
            }
            RelationItem::Const(constant) => self
                .check_type(&constant.ty)
                .into_iter()
                .map(|e| {
                    Diagnostic::new(e)
                        .at(constant.location.clone())
                        .with_context(&constant.table, &constant.name)
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::error::SourceLocation;
    use crate::input::{RawColumn, RawSheet};
    use crate::schema::{Scope, SchemaColumn};
    use crate::validation::run_pass;
    use pretty_assertions::assert_eq;

    fn set(name: &str, columns: &[(&str, &str)]) -> SchemaSet {
        let mut set = SchemaSet::new(name, None, name);
        for (column, ty) in columns {
            set.push(SchemaColumn {
                name: column.to_string(),
                ty: ty.to_string(),
                descriptor: parse_type(ty).unwrap(),
                scope: Scope::Common,
                inherited: false,
            });
        }
        set
    }

    #[test]
    fn test_check_relation() {
        let mut schemas = SchemaContainer::new();
        schemas.insert(set("Item", &[("Id", "*int"), ("Name", "string")]));
        schemas.insert(set("Log", &[("Text", "string")]));

        let item = RelationRef {
            table: "Item".into(),
            column: None,
        };
        assert!(check_relation(&schemas, &item).is_ok());

        let by_name = RelationRef {
            table: "Item".into(),
            column: Some("Name".into()),
        };
        assert!(check_relation(&schemas, &by_name).is_ok());

        let missing_column = RelationRef {
            table: "Item".into(),
            column: Some("Icon".into()),
        };
        assert!(check_relation(&schemas, &missing_column).is_err());

        let unkeyed = RelationRef {
            table: "Log".into(),
            column: None,
        };
        assert!(check_relation(&schemas, &unkeyed).is_err());
    }

    #[test]
    fn test_pass_reports_columns_and_cycles() {
        let input = CompilerInput::new()
            .sheet(
                RawSheet::new(SourceLocation::new("Drop.xlsx", "Drops"), "Drop")
                    .column(RawColumn::new("Id", "*int"))
                    .column(RawColumn::new("Item", "[$Item]"))
                    .column(RawColumn::new("Npc", "$Npc.Name")),
            )
            .sheet(
                RawSheet::new(SourceLocation::new("Npc.xlsx", "Npcs"), "Npc")
                    .column(RawColumn::new("Id", "*int")),
            )
            .sheet(
                RawSheet::new(SourceLocation::new("A.xlsx", "A"), "A")
                    .column(RawColumn::new("Id", "*$B")),
            )
            .sheet(
                RawSheet::new(SourceLocation::new("B.xlsx", "B"), "B")
                    .column(RawColumn::new("Id", "*$A")),
            );

        let mut session = Session::new(CompilerConfig::default(), &input);
        for (table, sheets) in input.tables() {
            for set in
                crate::resolver::build_sets(&session.config, table, &sheets, &input).unwrap()
            {
                session.schemas.insert(set);
            }
        }

        let found = match run_pass(&RelationTypePass::new(&session, &input), &WorkerOptions::new(2)) {
            Err(RunError::Rejected(d)) => d,
            other => panic!("unexpected {:?}", other),
        };
        let subjects: Vec<&str> = found.iter().filter_map(|d| d.subject.as_deref()).collect();
        assert_eq!(subjects, vec!["Drop.Item", "Drop.Npc", "A.Id", "B.Id"]);
        assert!(found[2].message().contains("B -> A -> B"), "{}", found[2]);
        assert_eq!(
            found[0].location,
            Some(SourceLocation::new("Drop.xlsx", "Drops"))
        );
    }
}
