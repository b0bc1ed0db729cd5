//! DSL prototypes: parameter types resolve, relation parameters target keyed tables and
//! defaulted parameters come last

use super::relation_type::check_relation;
use super::ValidationPass;
use crate::diagnostics::{conflict, Diagnostic};
use crate::dsl::DslPrototype;
use crate::input::RawValue;
use crate::session::Session;
use crate::types::parse_type;
use crate::worker::{RunError, WorkerOptions};

pub struct DslSyntaxPass<'a> {
    session: &'a Session,
}

impl<'a> DslSyntaxPass<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }
}

impl<'a> ValidationPass for DslSyntaxPass<'a> {
    type Item = &'a DslPrototype;

    fn name(&self) -> &'static str {
        "dsl"
    }

    fn items(&self, _: &WorkerOptions) -> Result<Vec<&'a DslPrototype>, RunError> {
        Ok(self.session.dsl.iter().collect())
    }

    fn check(&self, prototype: &'a DslPrototype) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let mut defaulted: Option<&str> = None;

        for param in &prototype.params {
            match (&param.default, defaulted) {
                (Some(_), None) => defaulted = Some(param.name.as_str()),
                (None, Some(first)) => diagnostics.push(
                    conflict(
                        format!(
                            "parameter '{}' of {} needs a default because '{}' has one",
                            param.name,
                            prototype.signature(),
                            first
                        ),
                        None,
                    )
                    .with_context(&prototype.name, &param.name),
                ),
                _ => {}
            }

            let descriptor = match parse_type(&param.ty) {
                Ok(d) => d,
                Err(e) => {
                    diagnostics.push(Diagnostic::new(e).with_context(&prototype.name, &param.name));
                    continue;
                }
            };

            let before = diagnostics.len();
            for target in descriptor.relations() {
                if let Err(e) = check_relation(&self.session.schemas, target) {
                    diagnostics.push(Diagnostic::new(e).with_context(&prototype.name, &param.name));
                }
            }

            if let (Some(default), true) = (&param.default, diagnostics.len() == before) {
                if let Err(e) = self.session.cast(&param.ty, &RawValue::text(default.as_str())) {
                    diagnostics.push(Diagnostic::new(e).with_context(&prototype.name, &param.name));
                }
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
    use crate::error::SourceLocation;
    use crate::input::{CompilerInput, RawColumn, RawSheet};
    use crate::pipeline::Compiler;
    use crate::validation::run_pass;
    use pretty_assertions::assert_eq;

    fn check(input: &CompilerInput) -> Vec<Diagnostic> {
        let session = Compiler::new(CompilerConfig::default())
            .prepare(input)
            .unwrap();
        match run_pass(&DslSyntaxPass::new(&session), &WorkerOptions::new(2)) {
            Ok(()) => vec![],
            Err(RunError::Rejected(d)) => d,
            Err(other) => panic!("unexpected {:?}", other),
        }
    }

    fn monsters() -> RawSheet {
        RawSheet::new(SourceLocation::new("Monster.xlsx", "Monsters"), "Monster")
            .column(RawColumn::new("Id", "*int").cell(1, "1"))
    }

    #[test]
    fn test_valid_prototypes() {
        let input = CompilerInput::new().sheet(monsters()).dsl(
            "Summon",
            vec![
                DslParameter::new("monster", "$Monster"),
                DslParameter::new("count", "int").with_default("1"),
            ],
        );
        assert!(check(&input).is_empty());
    }

    #[test]
    fn test_defaults_must_trail() {
        let input = CompilerInput::new().dsl(
            "Lerp",
            vec![
                DslParameter::new("from", "float").with_default("0"),
                DslParameter::new("to", "float"),
            ],
        );
        let found = check(&input);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, DiagnosticCode::SchemaConflict);
        assert_eq!(found[0].subject.as_deref(), Some("Lerp.to"));
    }

    #[test]
    fn test_relation_parameters_need_keyed_tables() {
        let input = CompilerInput::new()
            .sheet(
                RawSheet::new(SourceLocation::new("Log.xlsx", "Logs"), "Log")
                    .column(RawColumn::new("Text", "string").cell(1, "hi")),
            )
            .dsl(
                "Spawn",
                vec![
                    DslParameter::new("what", "$Npc"),
                    DslParameter::new("log", "$Log"),
                    DslParameter::new("at", "point<"),
                    DslParameter::new("n", "int").with_default("lots"),
                ],
            );
        let codes: Vec<DiagnosticCode> = check(&input).iter().map(|d| d.code).collect();
        assert_eq!(
            codes,
            vec![
                DiagnosticCode::UnresolvedReference,
                DiagnosticCode::UnresolvedReference,
                DiagnosticCode::SyntaxError,
                DiagnosticCode::TypeCast,
            ]
        );
    }
}
