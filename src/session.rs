//! Compilation session
//!
//! Owns everything one run produces and every cache it fills: resolved schemas, enums,
//! DSL prototypes, constants, cast data, the cast memo, relation root types and the
//! realized-value indexes used by the relation validators. Nothing outlives the session.

use dashmap::DashMap;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::CompilerConfig;
use crate::data::TableData;
use crate::dsl::DslRegistry;
use crate::enums::EnumRegistry;
use crate::input::{CompilerInput, RawConst, RawValue};
use crate::schema::SchemaContainer;
use crate::value::CastedValue;

pub struct Session {
    pub config: CompilerConfig,
    pub schemas: SchemaContainer,
    pub enums: EnumRegistry,
    pub dsl: DslRegistry,
    pub data: TableData,
    consts: IndexMap<(String, String), RawConst>,
    pub(crate) memo: DashMap<(String, RawValue), CastedValue>,
    pub(crate) roots: DashMap<String, String>,
    realized: DashMap<(String, String), Arc<HashSet<String>>>,
}

impl Session {
    /// Register enums (plus the generated DSL function-type enum), DSL prototypes and
    /// constants; schemas and data are filled in by the later stages
    pub fn new(config: CompilerConfig, input: &CompilerInput) -> Self {
        let mut enums = EnumRegistry::from_sheets(&input.enums);
        enums.insert_numbered(&config.dsl_type_enum_name, input.dsl.names());

        let mut consts = IndexMap::new();
        for constant in &input.consts {
            consts
                .entry((constant.table.clone(), constant.name.clone()))
                .or_insert_with(|| constant.clone());
        }

        Self {
            config,
            schemas: SchemaContainer::new(),
            enums,
            dsl: input.dsl.clone(),
            data: TableData::default(),
            consts,
            memo: DashMap::new(),
            roots: DashMap::new(),
            realized: DashMap::new(),
        }
    }

    pub fn constant(&self, table: &str, name: &str) -> Option<&RawConst> {
        self.consts.get(&(table.to_string(), name.to_string()))
    }

    pub fn constants(&self) -> impl Iterator<Item = &RawConst> {
        self.consts.values()
    }

    pub fn has_const_table(&self, table: &str) -> bool {
        self.consts.keys().any(|(t, _)| t == table)
    }

    /// Tables whose rows count as values of `table`: itself plus every table emitted
    /// into the output group of that name
    pub fn value_group<'a>(&'a self, table: &'a str) -> Vec<&'a str> {
        let mut tables = vec![table];
        for set in self.schemas.tables_in_group(table) {
            if set.name != table {
                tables.push(set.name.as_str());
            }
        }
        tables
    }

    /// Display forms of every non-null value of `column` in `table`'s value group
    pub fn realized_values(&self, table: &str, column: &str) -> Arc<HashSet<String>> {
        let key = (table.to_string(), column.to_string());
        if let Some(values) = self.realized.get(&key) {
            return Arc::clone(&values);
        }

        let mut values = HashSet::new();
        for name in self.value_group(table) {
            for row in self.data.rows_of(name) {
                if let Some(value) = row.values.get(column) {
                    if !value.is_null() {
                        values.insert(value.to_string());
                    }
                }
            }
        }

        let values = Arc::new(values);
        Arc::clone(self.realized.entry(key).or_insert(values).value())
    }

    /// Number of memoized casts (diagnostics and tests)
    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::DslParameter;
    use crate::error::SourceLocation;
    use crate::schema::SchemaSet;

    #[test]
    fn test_value_group_follows_output_group() {
        let mut session = Session::new(CompilerConfig::default(), &CompilerInput::new());
        session.schemas.insert(SchemaSet::new("Item", None, "Item"));
        session.schemas.insert(SchemaSet::new("Weapon", Some("Item".into()), "Item"));
        session.schemas.insert(SchemaSet::new("Shop", None, "Shop"));

        let owned = String::from("Item");
        assert_eq!(session.value_group(&owned), vec!["Item", "Weapon"]);
        assert_eq!(session.value_group("Shop"), vec!["Shop"]);
        assert_eq!(session.value_group("Unknown"), vec!["Unknown"]);
    }

    #[test]
    fn test_dsl_function_type_enum() {
        let input = CompilerInput::new()
            .dsl("Lerp", vec![DslParameter::new("t", "float")])
            .dsl("Heal", vec![DslParameter::new("amount", "int")]);
        let session = Session::new(CompilerConfig::default(), &input);

        let table = session.enums.get("DslFunctionType").unwrap();
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["Lerp", "Heal"]);
        assert_eq!(session.enums.member_value("DslFunctionType", "Heal").unwrap(), 1);
    }

    #[test]
    fn test_constants_keep_first_definition() {
        let loc = SourceLocation::new("Const.xlsx", "Game");
        let input = CompilerInput::new()
            .constant(RawConst::new(loc.clone(), "Game", "MaxLevel", "int", "60"))
            .constant(RawConst::new(loc, "Game", "MaxLevel", "int", "70"));
        let session = Session::new(CompilerConfig::default(), &input);

        let max = session.constant("Game", "MaxLevel").unwrap();
        assert_eq!(max.value, RawValue::text("60"));
        assert!(session.has_const_table("Game"));
        assert!(session.constant("Game", "MinLevel").is_none());
    }
}
