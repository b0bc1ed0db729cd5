//! Compilation pipeline
//!
//! Stages run in a fixed order:
//!
//! 1. `resolve`: sheets of each table are checked for mergeability and turned into schema sets.
//!    The pool halts on the first rejected table and nothing after this stage runs.
//! 2. `cast`: every sheet chunk and every constant is cast. A rejected cast stops the pipeline
//!    too, since validation reads cast data.
//! 3. Validation passes (`name`, `key`, `enum`, `dsl`, `relation-type`, `relation-value`,
//!    `strong-type`). Each pass reports everything it finds and the remaining passes still run.
//!
//! Internal faults from any stage abort the run immediately.

use thiserror::Error;
use tracing::{info, warn};

use crate::config::CompilerConfig;
use crate::data::{cast_jobs, collect, CastWorker};
use crate::diagnostics::Diagnostic;
use crate::input::{CompilerInput, RawSheet};
use crate::output::CompileOutput;
use crate::resolver::{build_sets, check_group};
use crate::schema::SchemaSet;
use crate::session::Session;
use crate::validation::{
    run_pass, DslSyntaxPass, EnumSyntaxPass, KeyPass, NamePass, RelationTypePass,
    RelationValuePass, StrongTypePass, ValidationPass,
};
use crate::worker::{run, FnWorker, RunError, WorkError, WorkerOptions};

/// Failure of a compilation run
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Structured violations of every stage that ran, in stage order
    #[error("compilation rejected with {} diagnostic(s)", .0.len())]
    Rejected(Vec<Diagnostic>),

    #[error("compilation aborted by {} internal fault(s)", .0.len())]
    Aborted(Vec<anyhow::Error>),
}

impl PipelineError {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::Rejected(diagnostics) => diagnostics,
            Self::Aborted(_) => &[],
        }
    }
}

impl From<RunError> for PipelineError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Rejected(diagnostics) => Self::Rejected(diagnostics),
            RunError::Aborted(faults) => Self::Aborted(faults),
        }
    }
}

pub struct Compiler {
    config: CompilerConfig,
    options: WorkerOptions,
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Self {
        let options = WorkerOptions::from_config(&config);
        Self { config, options }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Resolve and cast: a session holding schemas and data, not yet validated
    pub fn prepare(&self, input: &CompilerInput) -> Result<Session, PipelineError> {
        let mut session = Session::new(self.config.clone(), input);

        let sets = match self.resolve(input) {
            Ok(sets) => sets,
            Err(err) => {
                warn!(stage = "resolve", "schema resolution failed, skipping cast and validation");
                return Err(err);
            }
        };
        for set in sets {
            session.schemas.insert(set);
        }
        self.check_inheritance(&session)?;
        info!(stage = "resolve", tables = session.schemas.len(), "stage complete");

        let data = {
            let worker = CastWorker::new(&session);
            let jobs = cast_jobs(input, self.config.chunk_size());
            match run(&worker, jobs, &self.options) {
                Ok(outputs) => collect(outputs),
                Err(err) => {
                    warn!(stage = "cast", "casting failed, skipping validation");
                    return Err(err.into());
                }
            }
        };
        session.data = data;
        info!(
            stage = "cast",
            rows = session.data.row_count(),
            consts = session.data.consts().len(),
            memo = session.memo_len(),
            "stage complete"
        );

        Ok(session)
    }

    /// Run every validation pass, collecting their diagnostics in pass order
    pub fn validate(&self, session: &Session, input: &CompilerInput) -> Result<(), PipelineError> {
        let mut diagnostics = Vec::new();

        self.run_stage(&NamePass::new(session, input), &mut diagnostics)?;
        self.run_stage(&KeyPass::new(session, input), &mut diagnostics)?;
        self.run_stage(&EnumSyntaxPass::new(session), &mut diagnostics)?;
        self.run_stage(&DslSyntaxPass::new(session), &mut diagnostics)?;
        self.run_stage(&RelationTypePass::new(session, input), &mut diagnostics)?;
        self.run_stage(&RelationValuePass::new(session), &mut diagnostics)?;
        self.run_stage(&StrongTypePass::new(session, input), &mut diagnostics)?;

        if diagnostics.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Rejected(diagnostics))
        }
    }

    /// Full run: resolve, cast, validate and hand out the compiled tables
    pub fn compile(&self, input: &CompilerInput) -> Result<CompileOutput, PipelineError> {
        let session = self.prepare(input)?;
        self.validate(&session, input)?;
        Ok(CompileOutput::from_session(session))
    }

    fn resolve(&self, input: &CompilerInput) -> Result<Vec<SchemaSet>, PipelineError> {
        let groups: Vec<(&str, Vec<&RawSheet>)> = input.tables().into_iter().collect();
        let resolver = FnWorker::new(
            "resolve",
            |(table, sheets): (&str, Vec<&RawSheet>), out: &mut Vec<SchemaSet>| {
                let diagnostics = check_group(table, &sheets, input);
                if !diagnostics.is_empty() {
                    return Err(WorkError::Rejected(diagnostics));
                }
                let sets =
                    build_sets(&self.config, table, &sheets, input).map_err(WorkError::Rejected)?;
                out.extend(sets);
                Ok(())
            },
        );
        Ok(run(&resolver, groups, &self.options.halting())?)
    }

    /// `based` chains end at a defined table without looping
    fn check_inheritance(&self, session: &Session) -> Result<(), PipelineError> {
        let diagnostics: Vec<Diagnostic> = session
            .schemas
            .iter()
            .filter_map(|set| session.schemas.inheritance_depth(&set.name).err())
            .map(Diagnostic::new)
            .collect();
        if diagnostics.is_empty() {
            Ok(())
        } else {
            warn!(stage = "resolve", "inheritance check failed, skipping cast and validation");
            Err(PipelineError::Rejected(diagnostics))
        }
    }

    fn run_stage<P: ValidationPass>(
        &self,
        pass: &P,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<(), PipelineError> {
        match run_pass(pass, &self.options) {
            Ok(()) => {
                info!(stage = pass.name(), "stage complete");
                Ok(())
            }
            Err(RunError::Rejected(found)) => {
                info!(stage = pass.name(), reported = found.len(), "stage complete");
                diagnostics.extend(found);
                Ok(())
            }
            Err(RunError::Aborted(faults)) => Err(PipelineError::Aborted(faults)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticCode;
    use crate::dsl::DslParameter;
    use crate::error::SourceLocation;
    use crate::input::{RawColumn, RawSheet};
    use pretty_assertions::assert_eq;

    fn compiler() -> Compiler {
        Compiler::new(CompilerConfig {
            workers: 2,
            ..CompilerConfig::default()
        })
    }

    #[test]
    fn test_resolve_failure_stops_the_run() {
        let input = CompilerInput::new()
            .sheet(
                RawSheet::new(SourceLocation::new("Item.xlsx", "A"), "Item")
                    .column(RawColumn::new("Id", "*int").cell(1, "x")),
            )
            .sheet(
                RawSheet::new(SourceLocation::new("Item.xlsx", "B"), "Item")
                    .column(RawColumn::new("Id", "*string").cell(1, "y")),
            );

        let err = compiler().compile(&input).unwrap_err();
        let codes: Vec<DiagnosticCode> = err.diagnostics().iter().map(|d| d.code).collect();
        // the bad "x" cell is never cast
        assert_eq!(codes, vec![DiagnosticCode::SchemaConflict]);
    }

    #[test]
    fn test_cast_failure_stops_the_run() {
        let input = CompilerInput::new().sheet(
            RawSheet::new(SourceLocation::new("Item.xlsx", "Items"), "Item")
                .column(RawColumn::new("Id", "*byte").cell(1, "1").cell(2, "300").cell(3, "3"))
                .column(RawColumn::new("Score", "int").cell(1, "10").cell(2, "20")),
        );

        let err = compiler().compile(&input).unwrap_err();
        let diagnostics = err.diagnostics();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].code, DiagnosticCode::TypeCast);
        assert_eq!(
            diagnostics[0].location,
            Some(SourceLocation::new("Item.xlsx", "Items").at_row(2))
        );
        assert_eq!(diagnostics[1].code, DiagnosticCode::NullValue);
        assert_eq!(diagnostics[1].subject.as_deref(), Some("Item.Score"));
    }

    #[test]
    fn test_passes_accumulate() {
        let input = CompilerInput::new()
            .sheet(
                RawSheet::new(SourceLocation::new("Item.xlsx", "Items"), "Item")
                    .column(RawColumn::new("Id", "*int").cell(1, "1").cell(2, "1"))
                    .column(RawColumn::new("Bad Name", "int?")),
            )
            .dsl("Buy", vec![DslParameter::new("shop", "$Shop")]);

        let err = compiler().compile(&input).unwrap_err();
        let codes: Vec<DiagnosticCode> = err.diagnostics().iter().map(|d| d.code).collect();
        assert_eq!(
            codes,
            vec![
                DiagnosticCode::InvalidName,
                DiagnosticCode::DuplicateKey,
                DiagnosticCode::UnresolvedReference,
            ]
        );
    }

    #[test]
    fn test_relation_through_self_referencing_column() {
        let input = CompilerInput::new()
            .sheet(
                RawSheet::new(SourceLocation::new("Node.xlsx", "Node"), "Node")
                    .column(RawColumn::new("Id", "*int").cell(1, "1").cell(2, "2"))
                    .column(RawColumn::new("Next", "$Node?").cell(1, "2")),
            )
            .sheet(
                RawSheet::new(SourceLocation::new("Use.xlsx", "Use"), "Use")
                    .column(RawColumn::new("Ref", "$Node.Next").cell(1, "2")),
            );

        let session = compiler().prepare(&input).unwrap();
        assert_eq!(session.root_type("$Node.Next").unwrap(), "int?");
        assert_eq!(session.data.rows_of("Use").count(), 1);
    }

    #[test]
    fn test_inheritance_cycle() {
        let input = CompilerInput::new()
            .sheet(
                RawSheet::new(SourceLocation::new("A.xlsx", "A"), "A")
                    .based("B")
                    .column(RawColumn::new("Id", "*int")),
            )
            .sheet(
                RawSheet::new(SourceLocation::new("B.xlsx", "B"), "B")
                    .based("A")
                    .column(RawColumn::new("Id", "*int")),
            );

        let err = compiler().prepare(&input).err().unwrap();
        let codes: Vec<DiagnosticCode> = err.diagnostics().iter().map(|d| d.code).collect();
        assert_eq!(codes, vec![DiagnosticCode::SchemaConflict; 2]);
    }
}
