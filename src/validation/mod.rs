//! Validation passes
//!
//! Every pass is independent: it enumerates its items, checks each one on the worker pool and
//! reports every violation it finds. Passes never stop at the first problem.

pub mod dsl_syntax;
pub mod enum_syntax;
pub mod key;
pub mod name;
pub mod relation_type;
pub mod relation_value;
pub mod strong_type;

pub use dsl_syntax::DslSyntaxPass;
pub use enum_syntax::{assert_expression, EnumSyntaxPass};
pub use key::KeyPass;
pub use name::{is_valid_name, NamePass};
pub use relation_type::RelationTypePass;
pub use relation_value::{RelationUse, RelationValuePass};
pub use strong_type::StrongTypePass;

use crate::diagnostics::Diagnostic;
use crate::error::SourceLocation;
use crate::input::CompilerInput;
use crate::session::Session;
use crate::worker::{run, ParallelWorker, RunError, WorkError, WorkerOptions};

pub trait ValidationPass: Sync {
    type Item: Send;

    fn name(&self) -> &'static str;

    /// Units of work, each checked independently
    fn items(&self, options: &WorkerOptions) -> Result<Vec<Self::Item>, RunError>;

    fn check(&self, item: Self::Item) -> Vec<Diagnostic>;
}

struct PassWorker<'p, P>(&'p P);

impl<P: ValidationPass> ParallelWorker for PassWorker<'_, P> {
    type Input = P::Item;
    type Output = ();

    fn name(&self) -> &str {
        self.0.name()
    }

    fn work(&self, item: P::Item, _: &mut Vec<()>) -> Result<(), WorkError> {
        let diagnostics = self.0.check(item);
        if diagnostics.is_empty() {
            Ok(())
        } else {
            Err(WorkError::Rejected(diagnostics))
        }
    }
}

/// Run a pass over all its items
pub fn run_pass<P: ValidationPass>(pass: &P, options: &WorkerOptions) -> Result<(), RunError> {
    let items = pass.items(options)?;
    run(&PassWorker(pass), items, options).map(|_| ())
}

/// Location of the first sheet declaring `table` (attribute tables map to their owner's sheet)
pub(crate) fn table_location(
    session: &Session,
    input: &CompilerInput,
    table: &str,
) -> Option<SourceLocation> {
    input
        .sheets
        .iter()
        .find(|s| s.table == table)
        .or_else(|| {
            input
                .sheets
                .iter()
                .find(|s| s.has_bold() && session.config.parent_table_name(&s.table) == table)
        })
        .map(|s| s.location.clone())
}
