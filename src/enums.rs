//! Enum tables and bitwise enum expressions
//!
//! A cell (or a member definition) may hold a symbol, a decimal or `0x` literal, or an
//! expression combining them with `&`, `|` and parentheses:
//!
//! ```text
//! A&B|C      -> (A & B) | C
//! A|(B&C)    -> A | (B & C)
//! ```
//!
//! There is no precedence between `&` and `|`: the postfix conversion keeps a single
//! pending operator and flushes it whenever the next one arrives, so expressions reduce
//! left to right. Unary `~` is tokenized so the syntax pass can check it, but evaluating
//! it is an error.

use dashmap::DashMap;
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

use crate::error::{CompileError, CompileResult, SourceLocation};
use crate::input::RawEnumSheet;

static OPERAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:0[xX][0-9A-Fa-f]+|[A-Za-z_][A-Za-z0-9_]*|\d+)").expect("valid regex")
});

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumOp {
    And,
    Or,
}

impl EnumOp {
    fn apply(self, lhs: i64, rhs: i64) -> i64 {
        match self {
            Self::And => lhs & rhs,
            Self::Or => lhs | rhs,
        }
    }
}

impl fmt::Display for EnumOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "&"),
            Self::Or => write!(f, "|"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumToken {
    /// Symbol or numeric literal
    Value(String),
    Op(EnumOp),
    Invert,
    Group(Vec<EnumToken>),
}

/// Decimal or `0x` hexadecimal literal
pub fn parse_literal(text: &str) -> Option<i64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        return text.parse().ok();
    }
    None
}

pub fn is_literal(text: &str) -> bool {
    parse_literal(text).is_some()
}

/// Tokenize an expression; whitespace is ignored
pub fn tokenize(text: &str) -> CompileResult<Vec<EnumToken>> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let mut stack: Vec<Vec<EnumToken>> = vec![vec![]];
    let mut index = 0;

    while index < compact.len() {
        let rest = &compact[index..];
        let c = rest.chars().next().unwrap_or_default();
        let token = match c {
            '(' => {
                stack.push(vec![]);
                index += 1;
                continue;
            }
            ')' => {
                let group = stack.pop().unwrap_or_default();
                let Some(parent) = stack.last_mut() else {
                    return Err(CompileError::parse(format!("unbalanced ')' in '{}'", text)));
                };
                parent.push(EnumToken::Group(group));
                index += 1;
                continue;
            }
            '&' => EnumToken::Op(EnumOp::And),
            '|' => EnumToken::Op(EnumOp::Or),
            '~' => EnumToken::Invert,
            _ => {
                let Some(m) = OPERAND_RE.find(rest) else {
                    return Err(CompileError::parse(format!(
                        "unexpected '{}' in enum expression '{}'",
                        c, text
                    )));
                };
                index += m.end();
                if let Some(top) = stack.last_mut() {
                    top.push(EnumToken::Value(m.as_str().to_string()));
                }
                continue;
            }
        };
        if let Some(top) = stack.last_mut() {
            top.push(token);
        }
        index += c.len_utf8();
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(tokens), true) => Ok(tokens),
        _ => Err(CompileError::parse(format!("unclosed '(' in '{}'", text))),
    }
}

/// Every value token that is not a numeric literal, groups included
pub fn symbols(tokens: &[EnumToken]) -> Vec<&str> {
    let mut found = Vec::new();
    for token in tokens {
        match token {
            EnumToken::Value(v) if !is_literal(v) => found.push(v.as_str()),
            EnumToken::Group(inner) => found.extend(symbols(inner)),
            _ => {}
        }
    }
    found
}

/// Whether the text combines several operands
pub fn is_combined(text: &str) -> bool {
    text.contains('&') || text.contains('|')
}

// ============================================================================
// Evaluation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Postfix<'a> {
    Operand(&'a str),
    Invert,
    Op(EnumOp),
}

/// Postfix with a single pending-operator slot
fn to_postfix<'a>(tokens: &'a [EnumToken], out: &mut Vec<Postfix<'a>>) {
    let mut pending: Option<EnumOp> = None;
    for token in tokens {
        match token {
            EnumToken::Group(inner) => to_postfix(inner, out),
            EnumToken::Op(op) => {
                if let Some(prev) = pending.take() {
                    out.push(Postfix::Op(prev));
                }
                pending = Some(*op);
            }
            EnumToken::Value(v) => out.push(Postfix::Operand(v)),
            EnumToken::Invert => out.push(Postfix::Invert),
        }
    }
    if let Some(op) = pending {
        out.push(Postfix::Op(op));
    }
}

fn flatten(tokens: &[EnumToken]) -> Vec<&EnumToken> {
    let mut flat = Vec::new();
    for token in tokens {
        match token {
            EnumToken::Group(inner) => flat.extend(flatten(inner)),
            other => flat.push(other),
        }
    }
    flat
}

/// Result of evaluating an enum literal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum EnumValue {
    /// Single symbol, left unconverted
    Symbol(String),
    Integer(i64),
}

impl fmt::Display for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symbol(s) => write!(f, "{}", s),
            Self::Integer(i) => write!(f, "{}", i),
        }
    }
}

/// Evaluate tokens; `resolve` maps a symbol to its integer value
pub fn evaluate<F>(tokens: &[EnumToken], mut resolve: F) -> CompileResult<EnumValue>
where
    F: FnMut(&str) -> CompileResult<i64>,
{
    if let [single] = flatten(tokens).as_slice() {
        return match single {
            EnumToken::Value(v) => Ok(match parse_literal(v) {
                Some(n) => EnumValue::Integer(n),
                None => EnumValue::Symbol(v.clone()),
            }),
            _ => Err(CompileError::parse("enum expression has no operand")),
        };
    }

    let mut postfix = Vec::new();
    to_postfix(tokens, &mut postfix);

    let mut stack: Vec<i64> = Vec::new();
    for item in postfix {
        match item {
            Postfix::Operand(v) => {
                let n = match parse_literal(v) {
                    Some(n) => n,
                    None => resolve(v)?,
                };
                stack.push(n);
            }
            Postfix::Invert => {
                return Err(CompileError::parse("unary '~' is not supported"));
            }
            Postfix::Op(op) => {
                let (Some(rhs), Some(lhs)) = (stack.pop(), stack.pop()) else {
                    return Err(CompileError::parse(format!(
                        "operator '{}' is missing an operand",
                        op
                    )));
                };
                stack.push(op.apply(lhs, rhs));
            }
        }
    }

    match stack.as_slice() {
        [n] => Ok(EnumValue::Integer(*n)),
        [] => Err(CompileError::parse("empty enum expression")),
        _ => Err(CompileError::parse("enum operands are missing an operator")),
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumMember {
    pub definition: String,
    #[serde(skip)]
    pub location: Option<SourceLocation>,
}

/// Members of one enum merged across all its sheets
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnumTable {
    pub members: IndexMap<String, EnumMember>,
    /// Members declared more than once: name and the location of the repeat
    #[serde(skip)]
    pub duplicates: Vec<(String, Option<SourceLocation>)>,
    /// Sheets this table was merged from
    #[serde(skip)]
    pub locations: Vec<SourceLocation>,
}

impl EnumTable {
    pub fn contains(&self, member: &str) -> bool {
        self.members.contains_key(member)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }
}

/// Every enum of a session with lazily computed member values
#[derive(Debug, Default)]
pub struct EnumRegistry {
    tables: IndexMap<String, EnumTable>,
    values: DashMap<(String, String), i64>,
}

impl EnumRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge enum sheets by table name, keeping first declarations
    pub fn from_sheets(sheets: &[RawEnumSheet]) -> Self {
        let mut registry = Self::new();
        for sheet in sheets {
            let table = registry.tables.entry(sheet.table.clone()).or_default();
            table.locations.push(sheet.location.clone());
            for (name, definition) in &sheet.members {
                if table.members.contains_key(name) {
                    table
                        .duplicates
                        .push((name.clone(), Some(sheet.location.clone())));
                    continue;
                }
                table.members.insert(
                    name.clone(),
                    EnumMember {
                        definition: definition.trim().to_string(),
                        location: Some(sheet.location.clone()),
                    },
                );
            }
        }
        registry
    }

    /// Register a generated enum whose members are numbered in order
    pub fn insert_numbered<'a>(&mut self, name: &str, members: impl IntoIterator<Item = &'a str>) {
        let table = self.tables.entry(name.to_string()).or_default();
        for (i, member) in members.into_iter().enumerate() {
            table.members.insert(
                member.to_string(),
                EnumMember {
                    definition: i.to_string(),
                    location: None,
                },
            );
        }
    }

    pub fn get(&self, table: &str) -> Option<&EnumTable> {
        self.tables.get(table)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EnumTable)> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn tables(&self) -> &IndexMap<String, EnumTable> {
        &self.tables
    }

    /// Integer value of a member, computed once per session
    pub fn member_value(&self, table: &str, member: &str) -> CompileResult<i64> {
        let mut visiting = Vec::new();
        self.member_value_guarded(table, member, &mut visiting)
    }

    fn member_value_guarded(
        &self,
        table: &str,
        member: &str,
        visiting: &mut Vec<String>,
    ) -> CompileResult<i64> {
        let key = (table.to_string(), member.to_string());
        if let Some(cached) = self.values.get(&key) {
            return Ok(*cached);
        }

        let enum_table = self
            .tables
            .get(table)
            .ok_or_else(|| CompileError::reference(format!("enum '{}' is not defined", table)))?;
        let definition = enum_table.members.get(member).ok_or_else(|| {
            CompileError::reference(format!("'{}' is not a member of enum '{}'", member, table))
        })?;

        if visiting.iter().any(|v| v == member) {
            visiting.push(member.to_string());
            return Err(CompileError::reference(format!(
                "enum '{}' members reference each other in a cycle: {}",
                table,
                visiting.join(" -> ")
            )));
        }
        visiting.push(member.to_string());

        let tokens = tokenize(&definition.definition)?;
        let evaluated = evaluate(&tokens, |sym| self.member_value_guarded(table, sym, visiting))?;
        let value = match evaluated {
            EnumValue::Integer(n) => n,
            EnumValue::Symbol(sym) => self.member_value_guarded(table, &sym, visiting)?,
        };
        visiting.pop();

        self.values.insert(key, value);
        Ok(value)
    }

    /// Evaluate a cell literal against `table`; symbols must be members
    pub fn evaluate(&self, table: &str, text: &str) -> CompileResult<EnumValue> {
        let enum_table = self
            .tables
            .get(table)
            .ok_or_else(|| CompileError::reference(format!("enum '{}' is not defined", table)))?;
        let tokens = tokenize(text)?;
        for symbol in symbols(&tokens) {
            if !enum_table.contains(symbol) {
                return Err(CompileError::reference(format!(
                    "'{}' is not a member of enum '{}'",
                    symbol, table
                )));
            }
        }
        evaluate(&tokens, |sym| self.member_value(table, sym))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn flags() -> EnumRegistry {
        EnumRegistry::from_sheets(&[RawEnumSheet::new(
            SourceLocation::new("Enum.xlsx", "Flags"),
            "Flags",
        )
        .member("None", "0")
        .member("A", "1")
        .member("B", "2")
        .member("C", "4")
        .member("AB", "A|B")
        .member("High", "0x10")])
    }

    #[test]
    fn test_tokenize_groups() {
        let tokens = tokenize("A | (B & 0x1F)").unwrap();
        assert_eq!(
            tokens,
            vec![
                EnumToken::Value("A".into()),
                EnumToken::Op(EnumOp::Or),
                EnumToken::Group(vec![
                    EnumToken::Value("B".into()),
                    EnumToken::Op(EnumOp::And),
                    EnumToken::Value("0x1F".into()),
                ]),
            ]
        );
        assert_eq!(symbols(&tokens), vec!["A", "B"]);
    }

    #[test]
    fn test_tokenize_rejects_unbalanced() {
        assert!(tokenize("(A|B").is_err());
        assert!(tokenize("A|B)").is_err());
        assert!(tokenize("A+B").is_err());
    }

    #[test]
    fn test_no_precedence_between_operators() {
        let registry = flags();
        assert_eq!(registry.evaluate("Flags", "A&B|C").unwrap(), EnumValue::Integer(4));
        assert_eq!(registry.evaluate("Flags", "A|B&C").unwrap(), EnumValue::Integer(0));
        assert_eq!(registry.evaluate("Flags", "A|(B&C)").unwrap(), EnumValue::Integer(1));
        assert_eq!(registry.evaluate("Flags", "A|B").unwrap(), EnumValue::Integer(3));
    }

    #[test]
    fn test_single_token_is_unconverted() {
        let registry = flags();
        assert_eq!(
            registry.evaluate("Flags", "B").unwrap(),
            EnumValue::Symbol("B".into())
        );
        assert_eq!(registry.evaluate("Flags", "(C)").unwrap(), EnumValue::Symbol("C".into()));
        assert_eq!(registry.evaluate("Flags", "0x20").unwrap(), EnumValue::Integer(32));
    }

    #[test]
    fn test_unknown_symbol_and_invert() {
        let registry = flags();
        assert!(matches!(
            registry.evaluate("Flags", "A|Z"),
            Err(CompileError::Reference(_))
        ));
        assert!(matches!(
            registry.evaluate("Flags", "A|~B"),
            Err(CompileError::Parse(_))
        ));
        assert!(matches!(
            registry.evaluate("Missing", "A"),
            Err(CompileError::Reference(_))
        ));
    }

    #[test]
    fn test_member_values_are_lazy_and_composed() {
        let registry = flags();
        assert_eq!(registry.member_value("Flags", "AB").unwrap(), 3);
        assert_eq!(registry.member_value("Flags", "High").unwrap(), 16);
        assert_eq!(registry.evaluate("Flags", "AB|C").unwrap(), EnumValue::Integer(7));
    }

    #[test]
    fn test_member_cycle_is_reported() {
        let registry = EnumRegistry::from_sheets(&[RawEnumSheet::new(
            SourceLocation::new("Enum.xlsx", "Loop"),
            "Loop",
        )
        .member("X", "Y|1")
        .member("Y", "X")]);
        let err = registry.member_value("Loop", "X").unwrap_err();
        assert!(err.to_string().contains("X -> Y -> X"), "{}", err);
    }

    #[test]
    fn test_duplicates_across_sheets_keep_first() {
        let registry = EnumRegistry::from_sheets(&[
            RawEnumSheet::new(SourceLocation::new("a.xlsx", "Grade"), "Grade").member("Rare", "1"),
            RawEnumSheet::new(SourceLocation::new("b.xlsx", "Grade"), "Grade")
                .member("Rare", "2")
                .member("Epic", "3"),
        ]);
        let grade = registry.get("Grade").unwrap();
        assert_eq!(grade.names().collect::<Vec<_>>(), vec!["Rare", "Epic"]);
        assert_eq!(grade.duplicates.len(), 1);
        assert_eq!(registry.member_value("Grade", "Rare").unwrap(), 1);
    }

    #[test]
    fn test_numbered_enum() {
        let mut registry = EnumRegistry::new();
        registry.insert_numbered("DslFunctionType", ["Lerp", "Heal"]);
        assert_eq!(registry.member_value("DslFunctionType", "Heal").unwrap(), 1);
    }
}
