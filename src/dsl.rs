//! DSL prototypes and call-literal parsing
//!
//! A DSL cell holds a flat call such as `Lerp(0, 10)`. Prototypes declare the ordered
//! parameter list; trailing parameters may carry a default literal.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::error::{CompileError, CompileResult};

static CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<name>\w+)\((?P<args>.*)\)$").expect("valid regex"));

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DslParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
}

impl DslParameter {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
            default: None,
            desc: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// A named DSL function signature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DslPrototype {
    pub name: String,
    pub params: Vec<DslParameter>,
}

impl DslPrototype {
    /// Parameters without a default
    pub fn required(&self) -> usize {
        self.params.iter().filter(|p| p.default.is_none()).count()
    }

    /// `Name(a:int, b:float)` rendering used in messages
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{}:{}", p.name, p.ty))
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

/// Prototypes in declaration order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DslRegistry {
    prototypes: IndexMap<String, DslPrototype>,
}

impl DslRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, params: Vec<DslParameter>) {
        let name = name.into();
        self.prototypes.insert(
            name.clone(),
            DslPrototype {
                name,
                params,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&DslPrototype> {
        self.prototypes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.prototypes.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DslPrototype> {
        self.prototypes.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.prototypes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }
}

impl From<IndexMap<String, Vec<DslParameter>>> for DslRegistry {
    fn from(raw: IndexMap<String, Vec<DslParameter>>) -> Self {
        let mut registry = Self::new();
        for (name, params) in raw {
            registry.insert(name, params);
        }
        registry
    }
}

/// A parsed call literal, arguments still raw text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DslCall {
    pub name: String,
    pub args: Vec<String>,
}

/// Parse `Name(a, b, ...)`; empty arguments are dropped
pub fn parse_call(text: &str) -> CompileResult<DslCall> {
    let caps = CALL_RE
        .captures(text.trim())
        .ok_or_else(|| CompileError::parse(format!("'{}' is not a DSL call", text)))?;

    let args = split_top_level(&caps["args"], ',')
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();

    Ok(DslCall {
        name: caps["name"].to_string(),
        args,
    })
}

/// Split on `sep` outside of parentheses
pub(crate) fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}
