//! Column type annotation grammar
//!
//! Annotations are compact strings such as `*int`, `($ItemAttribute)`, `!$Monster?`,
//! `[{string:float}]` or `range<ushort>`. Modifiers, outer to inner:
//!
//! ```text
//! *T        primary key
//! (T)       group key
//! !T        strong reference (exhaustive over the target's keys/members)
//! ~T        sequence (always an int)
//! $T[.C]    relation to table T (optionally column C)
//! T?        nullable
//! ```
//!
//! [`parse_type`] builds a [`TypeDescriptor`]; [`nake`] strips a selectable subset of
//! modifiers from the raw text.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::sync::LazyLock;

use crate::error::{CompileError, CompileResult};

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_]\w*$").expect("valid regex"));

static RELATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<table>[A-Za-z_]\w*)(\.(?P<column>[A-Za-z_]\w*))?$").expect("valid regex")
});

static GENERIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<kind>point|size|range)(<(?P<elem>.*)>)?$").expect("valid regex")
});

/// Element type of `point`/`size`/`range` when none is given
pub const DEFAULT_GEOMETRY_ELEMENT: &str = "uint";

// ============================================================================
// Naking
// ============================================================================

/// Selects which modifiers [`nake`] strips
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NakeMask(u32);

impl NakeMask {
    pub const PRIMARY_KEY: Self = Self(0x01);
    pub const GROUP_KEY: Self = Self(0x02);
    pub const RELATION: Self = Self(0x04);
    pub const NULLABLE: Self = Self(0x08);
    pub const STRONG: Self = Self(0x10);
    pub const SEQUENCE: Self = Self(0x20);
    pub const KEY: Self = Self(0x01 | 0x02);
    pub const ALL: Self = Self(0x3f);
    pub const NONE: Self = Self(0);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for NakeMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for NakeMask {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for NakeMask {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0 & Self::ALL.0)
    }
}

/// Index of the bracket closing the one opening at `open` (byte offsets)
fn matching_close(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        match c {
            '(' | '[' | '{' | '<' => depth += 1,
            ')' | ']' | '}' | '>' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// `(T)` or `(T)?` → (`T`, trailing `?` present)
fn split_group_key(text: &str) -> Option<(&str, bool)> {
    if !text.starts_with('(') {
        return None;
    }
    let close = matching_close(text, 0)?;
    match &text[close + 1..] {
        "" => Some((&text[1..close], false)),
        "?" => Some((&text[1..close], true)),
        _ => None,
    }
}

/// One stripping step; `None` when nothing in `mask` applies
fn nake_once(text: &str, mask: NakeMask) -> Option<String> {
    if mask.contains(NakeMask::PRIMARY_KEY) {
        if let Some(rest) = text.strip_prefix('*') {
            return Some(rest.trim().to_string());
        }
    }
    if mask.contains(NakeMask::GROUP_KEY) {
        if let Some((inner, nullable)) = split_group_key(text) {
            let inner = inner.trim();
            return Some(if nullable {
                format!("{}?", inner)
            } else {
                inner.to_string()
            });
        }
    }
    if mask.contains(NakeMask::STRONG) {
        if let Some(rest) = text.strip_prefix('!') {
            return Some(rest.trim().to_string());
        }
    }
    if mask.contains(NakeMask::SEQUENCE) {
        if let Some(rest) = text.strip_prefix('~') {
            return Some(rest.trim().to_string());
        }
    }
    if mask.contains(NakeMask::RELATION) {
        if let Some(rest) = text.strip_prefix('$') {
            return Some(rest.trim().to_string());
        }
    }
    if mask.contains(NakeMask::NULLABLE) {
        if let Some(rest) = text.strip_suffix('?') {
            return Some(rest.trim().to_string());
        }
    }
    None
}

/// Strip the selected modifiers until none of them applies any more
pub fn nake(text: &str, mask: NakeMask) -> String {
    let mut current = text.trim().to_string();
    while let Some(next) = nake_once(&current, mask) {
        if next == current || next.is_empty() {
            break;
        }
        current = next;
    }
    current
}

pub fn is_nullable(text: &str) -> bool {
    text.trim().ends_with('?')
}

pub fn make_nullable(text: &str) -> String {
    if is_nullable(text) {
        text.to_string()
    } else {
        format!("{}?", text.trim())
    }
}

// ============================================================================
// Descriptor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum KeyRole {
    None,
    Primary,
    Group,
}

/// Target of a `$Table[.Column]` relation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RelationRef {
    pub table: String,
    pub column: Option<String>,
}

impl fmt::Display for RelationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(column) => write!(f, "{}.{}", self.table, column),
            None => write!(f, "{}", self.table),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum BaseKind {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    String,
    DateTime,
    TimeSpan,
    DateRange,
    Dsl,
    Array(Box<TypeDescriptor>),
    Map(Box<TypeDescriptor>, Box<TypeDescriptor>),
    Enum(String),
    Point(Box<TypeDescriptor>),
    Size(Box<TypeDescriptor>),
    Range(Box<TypeDescriptor>),
    Relation(RelationRef),
}

/// Inclusive bounds of an integral kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntBounds {
    Signed(i64, i64),
    Unsigned(u64),
}

impl BaseKind {
    /// Primitive spelled by `name`, accepting every alias
    pub fn primitive(name: &str) -> Option<Self> {
        let kind = match name {
            "bool" => Self::Bool,
            "sbyte" | "int8" | "int8_t" => Self::Int8,
            "byte" | "uint8" | "uint8_t" => Self::UInt8,
            "short" | "int16" | "int16_t" => Self::Int16,
            "ushort" | "uint16" | "uint16_t" => Self::UInt16,
            "int" | "int32" | "int32_t" => Self::Int32,
            "uint" | "uint32" | "uint32_t" => Self::UInt32,
            "long" | "int64" | "int64_t" => Self::Int64,
            "ulong" | "uint64" | "uint64_t" => Self::UInt64,
            "float" => Self::Float,
            "double" => Self::Double,
            "string" => Self::String,
            "DateTime" => Self::DateTime,
            "TimeSpan" => Self::TimeSpan,
            "DateRange" => Self::DateRange,
            "dsl" => Self::Dsl,
            _ => return None,
        };
        Some(kind)
    }

    pub fn int_bounds(&self) -> Option<IntBounds> {
        let bounds = match self {
            Self::Int8 => IntBounds::Signed(i8::MIN as i64, i8::MAX as i64),
            Self::Int16 => IntBounds::Signed(i16::MIN as i64, i16::MAX as i64),
            Self::Int32 => IntBounds::Signed(i32::MIN as i64, i32::MAX as i64),
            Self::Int64 => IntBounds::Signed(i64::MIN, i64::MAX),
            Self::UInt8 => IntBounds::Unsigned(u8::MAX as u64),
            Self::UInt16 => IntBounds::Unsigned(u16::MAX as u64),
            Self::UInt32 => IntBounds::Unsigned(u32::MAX as u64),
            Self::UInt64 => IntBounds::Unsigned(u64::MAX),
            _ => return None,
        };
        Some(bounds)
    }

    pub fn is_integral(&self) -> bool {
        self.int_bounds().is_some()
    }
}

impl fmt::Display for BaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int8 => write!(f, "sbyte"),
            Self::UInt8 => write!(f, "byte"),
            Self::Int16 => write!(f, "short"),
            Self::UInt16 => write!(f, "ushort"),
            Self::Int32 => write!(f, "int"),
            Self::UInt32 => write!(f, "uint"),
            Self::Int64 => write!(f, "long"),
            Self::UInt64 => write!(f, "ulong"),
            Self::Float => write!(f, "float"),
            Self::Double => write!(f, "double"),
            Self::String => write!(f, "string"),
            Self::DateTime => write!(f, "DateTime"),
            Self::TimeSpan => write!(f, "TimeSpan"),
            Self::DateRange => write!(f, "DateRange"),
            Self::Dsl => write!(f, "dsl"),
            Self::Array(elem) => write!(f, "[{}]", elem),
            Self::Map(key, value) => write!(f, "{{{}:{}}}", key, value),
            Self::Enum(name) => write!(f, "{}", name),
            Self::Point(elem) => write!(f, "point<{}>", elem),
            Self::Size(elem) => write!(f, "size<{}>", elem),
            Self::Range(elem) => write!(f, "range<{}>", elem),
            Self::Relation(target) => write!(f, "${}", target),
        }
    }
}

/// Parsed form of a type annotation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TypeDescriptor {
    pub kind: BaseKind,
    pub nullable: bool,
    pub key: KeyRole,
    pub strong: bool,
    pub sequence: bool,
}

impl TypeDescriptor {
    pub fn plain(kind: BaseKind) -> Self {
        Self {
            kind,
            nullable: false,
            key: KeyRole::None,
            strong: false,
            sequence: false,
        }
    }

    pub fn is_key(&self) -> bool {
        self.key != KeyRole::None
    }

    pub fn relation(&self) -> Option<&RelationRef> {
        match &self.kind {
            BaseKind::Relation(target) => Some(target),
            _ => None,
        }
    }

    /// Every relation reachable through containers, outermost first
    pub fn relations(&self) -> Vec<&RelationRef> {
        let mut found = Vec::new();
        self.collect_relations(&mut found);
        found
    }

    fn collect_relations<'a>(&'a self, found: &mut Vec<&'a RelationRef>) {
        match &self.kind {
            BaseKind::Relation(target) => found.push(target),
            BaseKind::Array(elem)
            | BaseKind::Point(elem)
            | BaseKind::Size(elem)
            | BaseKind::Range(elem) => elem.collect_relations(found),
            BaseKind::Map(key, value) => {
                key.collect_relations(found);
                value.collect_relations(found);
            }
            _ => {}
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut inner = String::new();
        if self.strong {
            inner.push('!');
        }
        if self.sequence {
            inner.push('~');
        }
        inner.push_str(&self.kind.to_string());
        if self.nullable {
            inner.push('?');
        }
        match self.key {
            KeyRole::None => write!(f, "{}", inner),
            KeyRole::Primary => write!(f, "*{}", inner),
            KeyRole::Group => write!(f, "({})", inner),
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn check_balanced(text: &str) -> CompileResult<()> {
    let mut stack = Vec::new();
    for c in text.chars() {
        match c {
            '(' | '[' | '{' | '<' => stack.push(c),
            ')' | ']' | '}' | '>' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    '}' => '{',
                    _ => '<',
                };
                if stack.pop() != Some(expected) {
                    return Err(CompileError::parse(format!(
                        "unbalanced '{}' in type '{}'",
                        c, text
                    )));
                }
            }
            _ => {}
        }
    }
    match stack.last() {
        Some(open) => Err(CompileError::parse(format!(
            "unclosed '{}' in type '{}'",
            open, text
        ))),
        None => Ok(()),
    }
}

/// Split `K:V` at the first top-level colon
fn split_map_entry(text: &str) -> Option<(&str, &str)> {
    let mut depth = 0i32;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' | '<' => depth += 1,
            ')' | ']' | '}' | '>' => depth -= 1,
            ':' if depth == 0 => return Some((&text[..i], &text[i + 1..])),
            _ => {}
        }
    }
    None
}

/// Parse a type annotation
pub fn parse_type(text: &str) -> CompileResult<TypeDescriptor> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(CompileError::parse("empty type annotation"));
    }
    check_balanced(trimmed)?;
    parse_checked(trimmed, text)
}

fn parse_checked(text: &str, original: &str) -> CompileResult<TypeDescriptor> {
    let mut rest = text.trim();
    let mut nullable = false;
    let mut key = KeyRole::None;

    if let Some(stripped) = rest.strip_suffix('?') {
        nullable = true;
        rest = stripped.trim_end();
    }

    if let Some(stripped) = rest.strip_prefix('*') {
        key = KeyRole::Primary;
        rest = stripped.trim_start();
    }
    if let Some((inner, inner_nullable)) = split_group_key(rest) {
        if key == KeyRole::Primary {
            return Err(CompileError::parse(format!(
                "'{}' is both a primary and a group key",
                original
            )));
        }
        key = KeyRole::Group;
        nullable |= inner_nullable;
        rest = inner.trim();
    }
    if key != KeyRole::None {
        if let Some(stripped) = rest.strip_suffix('?') {
            nullable = true;
            rest = stripped.trim_end();
        }
    }

    let mut strong = false;
    let mut sequence = false;
    loop {
        if let Some(stripped) = rest.strip_prefix('!') {
            strong = true;
            rest = stripped.trim_start();
        } else if let Some(stripped) = rest.strip_prefix('~') {
            sequence = true;
            rest = stripped.trim_start();
        } else {
            break;
        }
    }

    let kind = if let Some(target) = rest.strip_prefix('$') {
        let caps = RELATION_RE.captures(target.trim()).ok_or_else(|| {
            CompileError::parse(format!(
                "'{}' is not a valid relation target in '{}'",
                target, original
            ))
        })?;
        BaseKind::Relation(RelationRef {
            table: caps["table"].to_string(),
            column: caps.name("column").map(|c| c.as_str().to_string()),
        })
    } else {
        parse_base(rest, original)?
    };

    Ok(TypeDescriptor {
        kind,
        nullable,
        key,
        strong,
        sequence,
    })
}

fn parse_base(text: &str, original: &str) -> CompileResult<BaseKind> {
    if text.is_empty() {
        return Err(CompileError::parse(format!(
            "missing base type in '{}'",
            original
        )));
    }

    if let Some(kind) = BaseKind::primitive(text) {
        return Ok(kind);
    }

    if text.starts_with('[') && matching_close(text, 0) == Some(text.len() - 1) {
        let elem = parse_checked(&text[1..text.len() - 1], original)?;
        return Ok(BaseKind::Array(Box::new(elem)));
    }

    if text.starts_with('{') && matching_close(text, 0) == Some(text.len() - 1) {
        let body = &text[1..text.len() - 1];
        let (key, value) = split_map_entry(body).ok_or_else(|| {
            CompileError::parse(format!("map type '{}' needs 'key:value'", original))
        })?;
        let key = parse_checked(key, original)?;
        let value = parse_checked(value, original)?;
        return Ok(BaseKind::Map(Box::new(key), Box::new(value)));
    }

    if let Some(caps) = GENERIC_RE.captures(text) {
        let elem = match caps.name("elem").map(|e| e.as_str().trim()) {
            Some(e) if !e.is_empty() => e,
            _ => DEFAULT_GEOMETRY_ELEMENT,
        };
        let elem = Box::new(parse_checked(elem, original)?);
        return Ok(match &caps["kind"] {
            "point" => BaseKind::Point(elem),
            "size" => BaseKind::Size(elem),
            _ => BaseKind::Range(elem),
        });
    }

    if IDENT_RE.is_match(text) {
        return Ok(BaseKind::Enum(text.to_string()));
    }

    Err(CompileError::parse(format!(
        "unrecognized type '{}' in '{}'",
        text, original
    )))
}
