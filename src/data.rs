//! Cast table data
//!
//! The casting stage turns every sheet into [`CastedSheet`]s. Work is split into chunks of
//! `chunk_size` rows per tier: bold rows feed the attribute table, normal rows feed the table
//! itself and receive the key of the nearest bold row above them in the parent column.

use indexmap::IndexMap;
use serde::Serialize;

use crate::diagnostics::{unresolved, Diagnostic};
use crate::error::SourceLocation;
use crate::input::{CompilerInput, RawConst, RawSheet, RawValue};
use crate::schema::{Scope, SchemaSet};
use crate::session::Session;
use crate::value::CastedValue;
use crate::worker::{ParallelWorker, WorkError};

/// One output row, columns in schema order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CastedRow {
    /// Row index in the source sheet
    #[serde(skip)]
    pub row: u32,
    #[serde(flatten)]
    pub values: IndexMap<String, CastedValue>,
}

impl CastedRow {
    pub fn get(&self, column: &str) -> Option<&CastedValue> {
        self.values.get(column)
    }
}

/// Rows of one table that came from one sheet
#[derive(Debug, Clone, PartialEq)]
pub struct CastedSheet {
    pub table: String,
    pub location: SourceLocation,
    pub rows: Vec<CastedRow>,
}

impl CastedSheet {
    pub fn location_of(&self, row: &CastedRow) -> SourceLocation {
        self.location.at_row(row.row)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CastedConst {
    pub table: String,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub scope: Scope,
    pub value: CastedValue,
    #[serde(skip)]
    pub location: SourceLocation,
}

/// Every cast table of a session, sheets ordered by sheet name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableData {
    tables: IndexMap<String, Vec<CastedSheet>>,
    consts: Vec<CastedConst>,
}

impl TableData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sheet chunk, merging it into the previous chunk of the same sheet
    pub fn push(&mut self, chunk: CastedSheet) {
        let sheets = self.tables.entry(chunk.table.clone()).or_default();
        match sheets.iter_mut().find(|s| s.location == chunk.location) {
            Some(sheet) => sheet.rows.extend(chunk.rows),
            None => sheets.push(chunk),
        }
    }

    pub fn push_const(&mut self, constant: CastedConst) {
        self.consts.push(constant);
    }

    /// Sort each table's sheets by sheet name and rows by index
    pub fn finish(&mut self) {
        for sheets in self.tables.values_mut() {
            sheets.sort_by(|a, b| {
                a.location
                    .sheet
                    .cmp(&b.location.sheet)
                    .then_with(|| a.location.file.cmp(&b.location.file))
            });
            for sheet in sheets.iter_mut() {
                sheet.rows.sort_by_key(|r| r.row);
            }
        }
    }

    pub fn sheets(&self, table: &str) -> &[CastedSheet] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn rows_of<'a>(&'a self, table: &str) -> impl Iterator<Item = &'a CastedRow> {
        self.sheets(table).iter().flat_map(|s| s.rows.iter())
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &[CastedSheet])> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn consts(&self) -> &[CastedConst] {
        &self.consts
    }

    pub fn take_consts(&mut self) -> Vec<CastedConst> {
        std::mem::take(&mut self.consts)
    }

    pub fn row_count(&self) -> usize {
        self.tables
            .values()
            .flat_map(|sheets| sheets.iter())
            .map(|s| s.rows.len())
            .sum()
    }
}

// ============================================================================
// Casting stage
// ============================================================================

/// Unit of casting work
#[derive(Debug, Clone)]
pub enum CastJob<'a> {
    Rows {
        sheet: &'a RawSheet,
        bold: bool,
        rows: Vec<u32>,
    },
    Const(&'a RawConst),
}

pub enum CastOutput {
    Rows(CastedSheet),
    Const(CastedConst),
}

/// Chunk every sheet by tier, tables in input order and sheets sorted by name, then constants
pub fn cast_jobs<'a>(input: &'a CompilerInput, chunk_size: usize) -> Vec<CastJob<'a>> {
    let mut jobs = Vec::new();
    for (_, mut sheets) in input.tables() {
        sheets.sort_by(|a, b| a.location.sheet.cmp(&b.location.sheet));
        for sheet in sheets {
            for bold in [true, false] {
                let rows = sheet.rows_of(bold);
                for chunk in rows.chunks(chunk_size.max(1)) {
                    jobs.push(CastJob::Rows {
                        sheet,
                        bold,
                        rows: chunk.to_vec(),
                    });
                }
            }
        }
    }
    jobs.extend(input.consts.iter().map(CastJob::Const));
    jobs
}

pub struct CastWorker<'a> {
    session: &'a Session,
}

impl<'a> CastWorker<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Schema a tier of `sheet` is cast into
    fn target(&self, sheet: &RawSheet, bold: bool) -> Option<&'a SchemaSet> {
        let name = if bold {
            self.session.config.parent_table_name(&sheet.table)
        } else {
            sheet.table.clone()
        };
        self.session.schemas.get(&name)
    }

    /// Key of the nearest bold row strictly above `row`
    fn parent_cell<'s>(&self, sheet: &'s RawSheet, row: u32) -> Option<&'s RawValue> {
        let attribute = self.target(sheet, true)?;
        let key = attribute.primary_key()?;
        let column = sheet.columns.iter().find(|c| c.bold && c.name == key.name)?;
        column.rows.range(..row).next_back().map(|(_, v)| v)
    }

    fn cast_rows(
        &self,
        sheet: &RawSheet,
        bold: bool,
        rows: &[u32],
    ) -> Result<CastedSheet, Vec<Diagnostic>> {
        let Some(schema) = self.target(sheet, bold) else {
            return Err(vec![unresolved(
                format!("table '{}' has no resolved schema", sheet.table),
                Some(sheet.location.clone()),
            )]);
        };
        let parent = &self.session.config.parent_prop_name;
        let has_parent = !bold && sheet.has_bold();

        let mut diagnostics = Vec::new();
        let mut casted = Vec::with_capacity(rows.len());
        for &row in rows {
            let location = sheet.location.at_row(row);
            let mut values = IndexMap::with_capacity(schema.columns.len());
            for column in schema.columns.values() {
                let raw = if has_parent && column.name == *parent {
                    match self.parent_cell(sheet, row) {
                        Some(raw) => raw.clone(),
                        None => {
                            diagnostics.push(unresolved(
                                format!(
                                    "row {} of table '{}' has no bold row above it",
                                    row, sheet.table
                                ),
                                Some(location.clone()),
                            ));
                            continue;
                        }
                    }
                } else {
                    sheet
                        .columns
                        .iter()
                        .find(|c| c.bold == bold && c.name == column.name)
                        .and_then(|c| c.rows.get(&row))
                        .cloned()
                        .unwrap_or(RawValue::Null)
                };

                match self.session.cast(&column.ty, &raw) {
                    Ok(value) => {
                        values.insert(column.name.clone(), value);
                    }
                    Err(e) => diagnostics.push(
                        Diagnostic::new(e)
                            .at(location.clone())
                            .with_context(&schema.name, &column.name),
                    ),
                }
            }
            casted.push(CastedRow { row, values });
        }

        if diagnostics.is_empty() {
            Ok(CastedSheet {
                table: schema.name.clone(),
                location: sheet.location.clone(),
                rows: casted,
            })
        } else {
            Err(diagnostics)
        }
    }

    fn cast_const(&self, constant: &RawConst) -> Result<CastedConst, Diagnostic> {
        let value = self
            .session
            .cast(&constant.ty, &constant.value)
            .map_err(|e| {
                Diagnostic::new(e)
                    .at(constant.location.clone())
                    .with_context(&constant.table, &constant.name)
            })?;
        Ok(CastedConst {
            table: constant.table.clone(),
            name: constant.name.clone(),
            ty: constant.ty.clone(),
            scope: constant.scope,
            value,
            location: constant.location.clone(),
        })
    }
}

impl<'a> ParallelWorker for CastWorker<'a> {
    type Input = CastJob<'a>;
    type Output = CastOutput;

    fn name(&self) -> &str {
        "cast"
    }

    fn work(&self, job: CastJob<'a>, output: &mut Vec<CastOutput>) -> Result<(), WorkError> {
        match job {
            CastJob::Rows { sheet, bold, rows } => {
                let chunk = self
                    .cast_rows(sheet, bold, &rows)
                    .map_err(WorkError::Rejected)?;
                output.push(CastOutput::Rows(chunk));
            }
            CastJob::Const(constant) => {
                output.push(CastOutput::Const(self.cast_const(constant)?));
            }
        }
        Ok(())
    }
}

/// Collect worker outputs into [`TableData`]
pub fn collect(outputs: Vec<CastOutput>) -> TableData {
    let mut data = TableData::new();
    for output in outputs {
        match output {
            CastOutput::Rows(chunk) => data.push(chunk),
            CastOutput::Const(constant) => data.push_const(constant),
        }
    }
    data.finish();
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::input::RawColumn;
    use crate::resolver::build_sets;
    use crate::worker::{run, RunError, WorkerOptions};
    use pretty_assertions::assert_eq;

    fn item_sheet() -> RawSheet {
        RawSheet::new(SourceLocation::new("Item.xlsx", "Weapons"), "Item")
            .column(RawColumn::new("Category", "*int").bold().cell(1, "1").cell(4, "2"))
            .column(RawColumn::new("Label", "string").bold().cell(1, "Blades").cell(4, "Axes"))
            .column(RawColumn::new("Id", "*int").cell(2, "10").cell(3, "11").cell(5, "20"))
            .column(RawColumn::new("Weight", "float?").cell(2, "1.5").cell(5, "4"))
    }

    fn session(input: &CompilerInput) -> Session {
        let config = CompilerConfig {
            chunk_size: 2,
            ..CompilerConfig::default()
        };
        let mut session = Session::new(config.clone(), input);
        for (table, sheets) in input.tables() {
            for set in build_sets(&config, table, &sheets, input).unwrap() {
                session.schemas.insert(set);
            }
        }
        session
    }

    fn cast_all(session: &Session, input: &CompilerInput) -> Result<TableData, RunError> {
        let worker = CastWorker::new(session);
        let jobs = cast_jobs(input, session.config.chunk_size());
        run(&worker, jobs, &WorkerOptions::new(3)).map(collect)
    }

    #[test]
    fn test_jobs_chunk_each_tier() {
        let input = CompilerInput::new().sheet(item_sheet());
        let jobs = cast_jobs(&input, 2);
        let shapes: Vec<(bool, Vec<u32>)> = jobs
            .iter()
            .filter_map(|j| match j {
                CastJob::Rows { bold, rows, .. } => Some((*bold, rows.clone())),
                CastJob::Const(_) => None,
            })
            .collect();
        assert_eq!(
            shapes,
            vec![(true, vec![1, 4]), (false, vec![2, 3]), (false, vec![5])]
        );
    }

    #[test]
    fn test_normal_rows_get_nearest_bold_parent() {
        let input = CompilerInput::new().sheet(item_sheet());
        let session = session(&input);
        let data = cast_all(&session, &input).unwrap();

        let attributes: Vec<String> = data
            .rows_of("ItemAttribute")
            .map(|r| r.get("Label").unwrap().to_string())
            .collect();
        assert_eq!(attributes, vec!["Blades", "Axes"]);

        let parents: Vec<(String, String)> = data
            .rows_of("Item")
            .map(|r| (r.get("Id").unwrap().to_string(), r.get("Parent").unwrap().to_string()))
            .collect();
        assert_eq!(
            parents,
            vec![
                ("10".to_string(), "1".to_string()),
                ("11".to_string(), "1".to_string()),
                ("20".to_string(), "2".to_string())
            ]
        );

        let weights: Vec<CastedValue> = data
            .rows_of("Item")
            .map(|r| r.get("Weight").unwrap().clone())
            .collect();
        assert_eq!(
            weights,
            vec![CastedValue::Double(1.5), CastedValue::Null, CastedValue::Double(4.0)]
        );
    }

    #[test]
    fn test_rows_above_first_bold_row_are_reported() {
        let sheet = RawSheet::new(SourceLocation::new("Item.xlsx", "Weapons"), "Item")
            .column(RawColumn::new("Category", "*int").bold().cell(3, "1"))
            .column(RawColumn::new("Id", "*int").cell(2, "10").cell(4, "11"));
        let input = CompilerInput::new().sheet(sheet);
        let session = session(&input);

        match cast_all(&session, &input) {
            Err(RunError::Rejected(diagnostics)) => {
                assert_eq!(diagnostics.len(), 1);
                assert_eq!(
                    diagnostics[0].location.as_ref().map(|l| l.row),
                    Some(Some(2))
                );
            }
            other => panic!("unexpected {:?}", other.map(|d| d.row_count())),
        }
    }

    #[test]
    fn test_cast_failures_cite_row_and_column() {
        let sheet = RawSheet::new(SourceLocation::new("Item.xlsx", "Weapons"), "Item")
            .column(RawColumn::new("Id", "*byte").cell(1, "1").cell(2, "300"))
            .column(RawColumn::new("Name", "string").cell(1, "Sword"));
        let input = CompilerInput::new().sheet(sheet);
        let session = session(&input);

        match cast_all(&session, &input) {
            Err(RunError::Rejected(diagnostics)) => {
                assert_eq!(diagnostics.len(), 1);
                let message = diagnostics[0].to_string();
                assert!(message.contains("Item.xlsx:Weapons:2"), "{}", message);
                assert!(message.contains("Item.Id"), "{}", message);
            }
            other => panic!("unexpected {:?}", other.map(|d| d.row_count())),
        }
    }

    #[test]
    fn test_sheets_are_ordered_by_name() {
        let input = CompilerInput::new()
            .sheet(
                RawSheet::new(SourceLocation::new("Item.xlsx", "Zeta"), "Item")
                    .column(RawColumn::new("Id", "*int").cell(1, "2")),
            )
            .sheet(
                RawSheet::new(SourceLocation::new("Item.xlsx", "Alpha"), "Item")
                    .column(RawColumn::new("Id", "*int").cell(1, "1")),
            )
            .constant(RawConst::new(
                SourceLocation::new("Const.xlsx", "Game"),
                "Game",
                "MaxLevel",
                "int",
                "60",
            ));
        let session = session(&input);
        let data = cast_all(&session, &input).unwrap();

        let ids: Vec<String> = data.rows_of("Item").map(|r| r.get("Id").unwrap().to_string()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(data.consts().len(), 1);
        assert_eq!(data.consts()[0].value, CastedValue::Int(60));
    }
}
