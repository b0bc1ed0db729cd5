//! Identifier check for tables, columns, enums, DSL prototypes and constants

use regex::Regex;
use std::sync::LazyLock;

use super::{table_location, ValidationPass};
use crate::diagnostics::Diagnostic;
use crate::dsl::DslPrototype;
use crate::enums::EnumTable;
use crate::error::{CompileError, SourceLocation};
use crate::input::{CompilerInput, RawConst};
use crate::schema::SchemaSet;
use crate::session::Session;
use crate::worker::{RunError, WorkerOptions};

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z_$0-9]*$").expect("valid regex"));

pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

pub enum NameItem<'a> {
    Table(&'a SchemaSet),
    Enum(&'a str, &'a EnumTable),
    Dsl(&'a DslPrototype),
    Const(&'a RawConst),
}

pub struct NamePass<'a> {
    session: &'a Session,
    input: &'a CompilerInput,
}

impl<'a> NamePass<'a> {
    pub fn new(session: &'a Session, input: &'a CompilerInput) -> Self {
        Self { session, input }
    }
}

fn check_names<'n>(
    names: impl IntoIterator<Item = &'n str>,
    location: Option<SourceLocation>,
    out: &mut Vec<Diagnostic>,
) {
    for name in names {
        if !is_valid_name(name) {
            out.push(Diagnostic::new(CompileError::InvalidName(name.to_string())).at_opt(location.clone()));
        }
    }
}

impl<'a> ValidationPass for NamePass<'a> {
    type Item = NameItem<'a>;

    fn name(&self) -> &'static str {
        "name"
    }

    fn items(&self, _: &WorkerOptions) -> Result<Vec<NameItem<'a>>, RunError> {
        let mut items: Vec<NameItem<'a>> = self.session.schemas.iter().map(NameItem::Table).collect();
        items.extend(
            self.session
                .enums
                .iter()
                .map(|(name, table)| NameItem::Enum(name, table)),
        );
        items.extend(self.session.dsl.iter().map(NameItem::Dsl));
        items.extend(self.session.constants().map(NameItem::Const));
        Ok(items)
    }

    fn check(&self, item: NameItem<'a>) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        match item {
            NameItem::Table(set) => {
                let location = table_location(self.session, self.input, &set.name);
                check_names(
                    std::iter::once(set.name.as_str()).chain(set.columns.keys().map(String::as_str)),
                    location,
                    &mut diagnostics,
                );
            }
            NameItem::Enum(name, table) => {
                check_names(
                    std::iter::once(name).chain(table.names()),
                    table.locations.first().cloned(),
                    &mut diagnostics,
                );
            }
            NameItem::Dsl(prototype) => {
                check_names(
                    std::iter::once(prototype.name.as_str())
                        .chain(prototype.params.iter().map(|p| p.name.as_str())),
                    None,
                    &mut diagnostics,
                );
            }
            NameItem::Const(constant) => {
                check_names(
                    [constant.table.as_str(), constant.name.as_str()],
                    Some(constant.location.clone()),
                    &mut diagnostics,
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
    use crate::diagnostics::DiagnosticCode;
    use crate::dsl::DslParameter;
    use crate::input::{RawColumn, RawEnumSheet, RawSheet};
    use crate::pipeline::Compiler;
    use crate::validation::run_pass;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_identifier_rule() {
        assert!(is_valid_name("Item"));
        assert!(is_valid_name("_hidden"));
        assert!(is_valid_name("$meta2"));
        assert!(!is_valid_name("2nd"));
        assert!(!is_valid_name("Max Level"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn test_reports_every_bad_name() {
        let loc = SourceLocation::new("Item.xlsx", "Weapons");
        let input = CompilerInput::new()
            .sheet(
                RawSheet::new(loc.clone(), "Item")
                    .column(RawColumn::new("Id", "*int").cell(1, "1"))
                    .column(RawColumn::new("Max-Stack", "int").cell(1, "5")),
            )
            .enum_sheet(RawEnumSheet::new(loc.clone(), "Grade").member("1st", "1"))
            .dsl("Heal", vec![DslParameter::new("hp amount", "int")])
            .constant(RawConst::new(loc, "Game", "Max.Level", "int", "60"));

        let compiler = Compiler::new(CompilerConfig::default());
        let session = compiler.prepare(&input).unwrap();
        let pass = NamePass::new(&session, &input);

        match run_pass(&pass, &WorkerOptions::new(2)) {
            Err(RunError::Rejected(diagnostics)) => {
                assert!(diagnostics.iter().all(|d| d.code == DiagnosticCode::InvalidName));
                let names: Vec<String> = diagnostics
                    .iter()
                    .map(|d| match &d.error {
                        CompileError::InvalidName(name) => name.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                assert_eq!(names, vec!["Max-Stack", "1st", "hp amount", "Max.Level"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
