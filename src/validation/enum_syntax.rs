//! Enum definitions: well-formed expressions, resolvable symbols, unique members

use super::ValidationPass;
use crate::diagnostics::{duplicate_key, unresolved, Diagnostic};
use crate::enums::{symbols, tokenize, EnumTable, EnumToken};
use crate::error::{CompileError, CompileResult};
use crate::session::Session;
use crate::worker::{RunError, WorkerOptions};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Last {
    Start,
    Value,
    Op,
    Invert,
}

/// Structural check of a token stream: operands and operators alternate, `~` only before an
/// operand, and the expression ends on an operand
pub fn assert_expression(tokens: &[EnumToken]) -> CompileResult<()> {
    let mut last = Last::Start;
    for token in tokens {
        last = match token {
            EnumToken::Value(v) => {
                if last == Last::Value {
                    return Err(CompileError::parse(format!("'{}' follows another value", v)));
                }
                Last::Value
            }
            EnumToken::Group(inner) => {
                if last == Last::Value {
                    return Err(CompileError::parse("group follows a value"));
                }
                assert_expression(inner)?;
                Last::Value
            }
            EnumToken::Op(op) => match last {
                Last::Start => {
                    return Err(CompileError::parse(format!(
                        "expression starts with operator '{}'",
                        op
                    )))
                }
                Last::Op | Last::Invert => {
                    return Err(CompileError::parse(format!(
                        "operator '{}' follows another operator",
                        op
                    )))
                }
                Last::Value => Last::Op,
            },
            EnumToken::Invert => match last {
                Last::Invert => return Err(CompileError::parse("'~~' is not allowed")),
                Last::Value => return Err(CompileError::parse("'~' follows a value")),
                Last::Start | Last::Op => Last::Invert,
            },
        };
    }
    if last != Last::Value {
        return Err(CompileError::parse("expression must end on a value"));
    }
    Ok(())
}

pub struct EnumSyntaxPass<'a> {
    session: &'a Session,
}

impl<'a> EnumSyntaxPass<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    fn check_table(&self, name: &str, table: &EnumTable) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for (member, repeat) in &table.duplicates {
            let mut locations: Vec<_> = table
                .members
                .get(member)
                .and_then(|m| m.location.clone())
                .into_iter()
                .collect();
            locations.extend(repeat.clone());
            diagnostics.push(duplicate_key(name, member, &locations));
        }

        for (member, definition) in &table.members {
            let location = definition.location.clone();
            let tokens = match tokenize(&definition.definition) {
                Ok(tokens) => tokens,
                Err(e) => {
                    diagnostics.push(Diagnostic::new(e).at_opt(location).with_context(name, member));
                    continue;
                }
            };
            if let Err(e) = assert_expression(&tokens) {
                diagnostics.push(Diagnostic::new(e).at_opt(location).with_context(name, member));
                continue;
            }

            let missing: Vec<&str> = symbols(&tokens)
                .into_iter()
                .filter(|s| !table.contains(s))
                .collect();
            if !missing.is_empty() {
                for symbol in missing {
                    diagnostics.push(
                        unresolved(
                            format!("'{}' is not a member of enum '{}'", symbol, name),
                            location.clone(),
                        )
                        .with_context(name, member),
                    );
                }
                continue;
            }

            if let Err(e) = self.session.enums.member_value(name, member) {
                diagnostics.push(Diagnostic::new(e).at_opt(location).with_context(name, member));
            }
        }
        diagnostics
    }
}

impl<'a> ValidationPass for EnumSyntaxPass<'a> {
    type Item = (&'a str, &'a EnumTable);

    fn name(&self) -> &'static str {
        "enum"
    }

    fn items(&self, _: &WorkerOptions) -> Result<Vec<Self::Item>, RunError> {
        Ok(self.session.enums.iter().collect())
    }

    fn check(&self, (name, table): Self::Item) -> Vec<Diagnostic> {
        self.check_table(name, table)
    }
}
