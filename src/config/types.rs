//! Configuration types
//!
//! Every field is defaulted so an empty (or missing) `config.yaml` yields a usable config.

use serde::{Deserialize, Serialize};

/// Settings of one compilation run
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CompilerConfig {
    /// Name of the implicit table built from bold columns; `{table}` is replaced by the table name
    #[serde(default = "default_parent_table_format")]
    pub parent_table_format: String,
    /// Column that links a normal row to its owning bold row
    #[serde(default = "default_parent_prop_name")]
    pub parent_prop_name: String,
    /// Synthetic enum listing every DSL prototype
    #[serde(default = "default_dsl_type_enum_name")]
    pub dsl_type_enum_name: String,
    /// Pool size (0 = available parallelism)
    #[serde(default)]
    pub workers: usize,
    /// Rows per casting work item
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Relation references per validation work item
    #[serde(default = "default_relation_chunk_size")]
    pub relation_chunk_size: usize,
}

fn default_parent_table_format() -> String {
    "{table}Attribute".to_string()
}

fn default_parent_prop_name() -> String {
    "Parent".to_string()
}

fn default_dsl_type_enum_name() -> String {
    "DslFunctionType".to_string()
}

fn default_chunk_size() -> usize {
    250
}

fn default_relation_chunk_size() -> usize {
    1000
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            parent_table_format: default_parent_table_format(),
            parent_prop_name: default_parent_prop_name(),
            dsl_type_enum_name: default_dsl_type_enum_name(),
            workers: 0,
            chunk_size: default_chunk_size(),
            relation_chunk_size: default_relation_chunk_size(),
        }
    }
}

impl CompilerConfig {
    /// Name of the attribute table carrying the bold columns of `table`
    pub fn parent_table_name(&self, table: &str) -> String {
        self.parent_table_format.replace("{table}", table)
    }

    /// Effective pool size
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }

    pub fn relation_chunk_size(&self) -> usize {
        self.relation_chunk_size.max(1)
    }
}
