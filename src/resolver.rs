//! Schema resolution
//!
//! Sheets sharing a table name are merged into one table. Bold columns become a separate
//! attribute table (named through `parent_table_format`) and the normal table gains a
//! group-key column pointing at it, so every detail row belongs to the bold row above it.

use crate::config::CompilerConfig;
use crate::diagnostics::{conflict, unresolved, Diagnostic};
use crate::input::{CompilerInput, RawColumn, RawSheet};
use crate::schema::{SchemaColumn, SchemaSet};
use crate::types::{parse_type, KeyRole};
use tracing::debug;

/// Columns of a sheet ordered by name, the form sheets are compared in
fn sorted_columns(sheet: &RawSheet) -> Vec<&RawColumn> {
    let mut columns: Vec<&RawColumn> = sheet.columns.iter().collect();
    columns.sort_by(|a, b| a.name.cmp(&b.name));
    columns
}

/// First sheet declaring `table`
pub fn find_sheet<'a>(input: &'a CompilerInput, table: &str) -> Option<&'a RawSheet> {
    input.sheets.iter().find(|s| s.table == table)
}

/// Mergeability of the sheets of one table and compatibility with its base table
pub fn check_group(table: &str, sheets: &[&RawSheet], input: &CompilerInput) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let Some(pivot) = sheets.first() else {
        return diagnostics;
    };

    let mut bases: Vec<(&str, &RawSheet)> = Vec::new();
    for sheet in sheets {
        let based = sheet.based.as_deref().unwrap_or_default();
        if !bases.iter().any(|(b, _)| *b == based) {
            bases.push((based, sheet));
        }
    }
    if bases.len() > 1 {
        let trace: Vec<String> = bases
            .iter()
            .map(|(b, s)| format!("{}({})", if b.is_empty() { "-" } else { b }, s.location))
            .collect();
        diagnostics.push(conflict(
            format!(
                "sheets of table '{}' inherit from different tables: {}",
                table,
                trace.join(", ")
            ),
            Some(pivot.location.clone()),
        ));
    }

    let pivot_columns = sorted_columns(pivot);
    for sheet in sheets.iter().skip(1) {
        let columns = sorted_columns(sheet);
        let same = columns.len() == pivot_columns.len()
            && columns
                .iter()
                .zip(&pivot_columns)
                .all(|(a, b)| a.same_header(b));
        if !same {
            diagnostics.push(conflict(
                format!(
                    "cannot merge the schema of {} with {}",
                    pivot.location, sheet.location
                ),
                Some(sheet.location.clone()),
            ));
        }
    }

    let Some(based) = pivot.based.as_deref() else {
        return diagnostics;
    };
    let Some(base_sheet) = find_sheet(input, based) else {
        diagnostics.push(unresolved(
            format!("base table '{}' of '{}' is not defined", based, table),
            Some(pivot.location.clone()),
        ));
        return diagnostics;
    };

    for base_column in sorted_columns(base_sheet) {
        let Some(inherited) = pivot.columns.iter().find(|c| c.name == base_column.name) else {
            diagnostics.push(conflict(
                format!(
                    "table '{}' does not declare column '{}' of base table '{}'",
                    table, base_column.name, based
                ),
                Some(pivot.location.clone()),
            ));
            continue;
        };
        if inherited.ty != base_column.ty {
            diagnostics.push(conflict(
                format!(
                    "column '{}' is '{}' in '{}' but '{}' in base table '{}'",
                    inherited.name, inherited.ty, table, base_column.ty, based
                ),
                Some(pivot.location.clone()),
            ));
        }
        if !inherited.scope.contains(base_column.scope) {
            diagnostics.push(conflict(
                format!(
                    "scope {} of column '{}' in '{}' does not cover scope {} of base table '{}'",
                    inherited.scope, inherited.name, table, base_column.scope, based
                ),
                Some(pivot.location.clone()),
            ));
        }
    }

    diagnostics
}

/// Build the schema sets of one table: the attribute table (if any bold column exists)
/// followed by the table itself (if any normal column exists)
pub fn build_sets(
    config: &CompilerConfig,
    table: &str,
    sheets: &[&RawSheet],
    input: &CompilerInput,
) -> Result<Vec<SchemaSet>, Vec<Diagnostic>> {
    let Some(pivot) = sheets.first() else {
        return Ok(vec![]);
    };

    let mut diagnostics = Vec::new();
    let mut bold = Vec::new();
    let mut normal = Vec::new();
    for column in &pivot.columns {
        match parse_type(&column.ty) {
            Ok(descriptor) => {
                let resolved = SchemaColumn {
                    name: column.name.clone(),
                    ty: column.ty.clone(),
                    descriptor,
                    scope: column.scope,
                    inherited: false,
                };
                if column.bold {
                    bold.push(resolved);
                } else {
                    normal.push(resolved);
                }
            }
            Err(e) => diagnostics.push(Diagnostic::new(e).at(pivot.location.clone())),
        }
    }
    if !diagnostics.is_empty() {
        return Err(diagnostics);
    }

    let mut sets = Vec::new();
    let attribute = config.parent_table_name(table);

    let parent_key = bold.iter().find(|c| c.descriptor.key == KeyRole::Primary).cloned();
    if !bold.is_empty() {
        if parent_key.is_none() {
            return Err(vec![conflict(
                format!(
                    "bold columns of table '{}' must declare a primary key for '{}'",
                    table, attribute
                ),
                Some(pivot.location.clone()),
            )]);
        }
        let mut set = SchemaSet::new(attribute.clone(), None, attribute.clone());
        for column in bold {
            set.push(column);
        }
        sets.push(set);
    }

    if !normal.is_empty() {
        let json = pivot.json.clone().unwrap_or_else(|| table.to_string());
        let mut set = SchemaSet::new(table, pivot.based.clone(), json);

        if let Some(parent_key) = &parent_key {
            let ty = format!("(${})", attribute);
            let descriptor = match parse_type(&ty) {
                Ok(d) => d,
                Err(e) => return Err(vec![Diagnostic::new(e).at(pivot.location.clone())]),
            };
            set.push(SchemaColumn {
                name: config.parent_prop_name.clone(),
                ty,
                descriptor,
                scope: parent_key.scope,
                inherited: false,
            });
        }

        let base_columns: Vec<&str> = pivot
            .based
            .as_deref()
            .and_then(|based| find_sheet(input, based))
            .map(|s| s.columns.iter().map(|c| c.name.as_str()).collect())
            .unwrap_or_default();

        for mut column in normal {
            if set.columns.contains_key(&column.name) {
                diagnostics.push(conflict(
                    format!(
                        "column '{}' of table '{}' collides with the generated parent column",
                        column.name, table
                    ),
                    Some(pivot.location.clone()),
                ));
                continue;
            }
            column.inherited = base_columns.contains(&column.name.as_str());
            set.push(column);
        }
        sets.push(set);
    }

    if diagnostics.is_empty() {
        debug!(table, sets = sets.len(), sheets = sheets.len(), "resolved schema");
        Ok(sets)
    } else {
        Err(diagnostics)
    }
}
