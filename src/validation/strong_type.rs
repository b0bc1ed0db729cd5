//! Strong references (`!`): a marked column must mention every key of its target table or
//! every member of its enum somewhere in the table

use std::collections::{HashMap, HashSet};

use super::{table_location, ValidationPass};
use crate::diagnostics::{conflict, Diagnostic};
use crate::error::CompileError;
use crate::input::CompilerInput;
use crate::schema::{SchemaColumn, SchemaSet};
use crate::session::Session;
use crate::types::{BaseKind, TypeDescriptor};
use crate::value::CastedValue;
use crate::worker::{RunError, WorkerOptions};

/// Strong-marked descriptors inside `descriptor`, outermost first
fn strong_positions<'d>(descriptor: &'d TypeDescriptor, out: &mut Vec<&'d TypeDescriptor>) {
    if descriptor.strong {
        out.push(descriptor);
    }
    match &descriptor.kind {
        BaseKind::Array(elem)
        | BaseKind::Point(elem)
        | BaseKind::Size(elem)
        | BaseKind::Range(elem) => strong_positions(elem, out),
        BaseKind::Map(key, value) => {
            strong_positions(key, out);
            strong_positions(value, out);
        }
        _ => {}
    }
}

/// Values found at strong positions, keyed by the position's base type
fn collect_present(
    descriptor: &TypeDescriptor,
    value: &CastedValue,
    present: &mut HashMap<String, HashSet<String>>,
) {
    if value.is_null() {
        return;
    }
    if descriptor.strong {
        present
            .entry(descriptor.kind.to_string())
            .or_default()
            .insert(value.to_string());
    }
    match (&descriptor.kind, value) {
        (BaseKind::Array(elem), CastedValue::Array(items)) => {
            for item in items {
                collect_present(elem, item, present);
            }
        }
        (BaseKind::Map(k, v), CastedValue::Map(entries)) => {
            for (key, value) in entries {
                collect_present(k, key, present);
                collect_present(v, value, present);
            }
        }
        (BaseKind::Point(elem), CastedValue::Point { x: a, y: b })
        | (BaseKind::Size(elem), CastedValue::Size { width: a, height: b })
        | (BaseKind::Range(elem), CastedValue::Range { min: a, max: b }) => {
            collect_present(elem, a, present);
            collect_present(elem, b, present);
        }
        _ => {}
    }
}

pub struct StrongTypePass<'a> {
    session: &'a Session,
    input: &'a CompilerInput,
}

impl<'a> StrongTypePass<'a> {
    pub fn new(session: &'a Session, input: &'a CompilerInput) -> Self {
        Self { session, input }
    }

    /// Display forms a strong position must cover, in declaration order
    fn required(&self, descriptor: &TypeDescriptor) -> Result<Vec<String>, String> {
        match &descriptor.kind {
            BaseKind::Relation(target) => {
                let column = match &target.column {
                    Some(column) => column.clone(),
                    None => self
                        .session
                        .schemas
                        .key_of(&target.table)
                        .map(|c| c.name.clone())
                        .ok_or_else(|| format!("table '{}' has no key", target.table))?,
                };
                let mut seen = HashSet::new();
                let mut values = Vec::new();
                for table in self.session.value_group(&target.table) {
                    for row in self.session.data.rows_of(table) {
                        if let Some(value) = row.get(&column).filter(|v| !v.is_null()) {
                            let text = value.to_string();
                            if seen.insert(text.clone()) {
                                values.push(text);
                            }
                        }
                    }
                }
                Ok(values)
            }
            BaseKind::Enum(name) => self
                .session
                .enums
                .get(name)
                .map(|table| table.names().map(str::to_string).collect())
                .ok_or_else(|| format!("enum '{}' is not defined", name)),
            other => Err(format!(
                "'!' marks a relation or enum, not '{}'",
                other
            )),
        }
    }

    /// Integer value of an enum member, used when cells wrote the number instead of the name
    fn member_number(&self, descriptor: &TypeDescriptor, member: &str) -> Option<String> {
        match &descriptor.kind {
            BaseKind::Enum(name) => self
                .session
                .enums
                .member_value(name, member)
                .ok()
                .map(|v| v.to_string()),
            _ => None,
        }
    }

    fn check_column(&self, set: &SchemaSet, column: &SchemaColumn) -> Vec<Diagnostic> {
        let location = table_location(self.session, self.input, &set.name);
        let mut positions = Vec::new();
        strong_positions(&column.descriptor, &mut positions);

        let mut present = HashMap::new();
        for row in self.session.data.rows_of(&set.name) {
            if let Some(value) = row.get(&column.name) {
                collect_present(&column.descriptor, value, &mut present);
            }
        }

        let mut diagnostics = Vec::new();
        for position in positions {
            let required = match self.required(position) {
                Ok(required) => required,
                Err(message) => {
                    diagnostics.push(
                        conflict(message, location.clone()).with_context(&set.name, &column.name),
                    );
                    continue;
                }
            };
            let found = present.get(&position.kind.to_string());
            let missing: Vec<String> = required
                .into_iter()
                .filter(|value| {
                    let Some(found) = found else {
                        return true;
                    };
                    if found.contains(value) {
                        return false;
                    }
                    !self
                        .member_number(position, value)
                        .is_some_and(|n| found.contains(&n))
                })
                .collect();

            if !missing.is_empty() {
                diagnostics.push(
                    Diagnostic::new(CompileError::Exhaustiveness {
                        column: column.name.clone(),
                        missing,
                    })
                    .at_opt(location.clone())
                    .with_context(&set.name, &column.name),
                );
            }
        }
        diagnostics
    }
}

impl<'a> ValidationPass for StrongTypePass<'a> {
    type Item = (&'a SchemaSet, &'a SchemaColumn);

    fn name(&self) -> &'static str {
        "strong-type"
    }

    fn items(&self, _: &WorkerOptions) -> Result<Vec<Self::Item>, RunError> {
        let mut items = Vec::new();
        for set in self.session.schemas.iter() {
            for column in set.columns.values() {
                let mut positions = Vec::new();
                strong_positions(&column.descriptor, &mut positions);
                if !positions.is_empty() {
                    items.push((set, column));
                }
            }
        }
        Ok(items)
    }

    fn check(&self, (set, column): Self::Item) -> Vec<Diagnostic> {
        self.check_column(set, column)
    }
}
