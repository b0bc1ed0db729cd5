//! Typed cell values
//!
//! [`CastedValue`] is what the caster produces for every cell. Its `Display` form is the
//! canonical text used when comparing relation values against realized key values.

use chrono::{NaiveDateTime, TimeDelta};
use serde::ser::{SerializeMap, SerializeSeq, SerializeStruct};
use serde::{Serialize, Serializer};
use std::fmt;

use crate::enums::EnumValue;

pub(crate) const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A DSL call with its casted arguments
#[derive(Debug, Clone, PartialEq)]
pub struct DslValue {
    pub name: String,
    pub args: Vec<CastedValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CastedValue {
    Null,
    Bool(bool),
    /// Any signed integral kind, range-checked to its declared width
    Int(i64),
    /// Any unsigned integral kind, range-checked to its declared width
    UInt(u64),
    Double(f64),
    String(String),
    DateTime(NaiveDateTime),
    TimeSpan(TimeDelta),
    DateRange {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    Array(Vec<CastedValue>),
    /// Entries in cell order
    Map(Vec<(CastedValue, CastedValue)>),
    Enum(EnumValue),
    Dsl(DslValue),
    Point {
        x: Box<CastedValue>,
        y: Box<CastedValue>,
    },
    Size {
        width: Box<CastedValue>,
        height: Box<CastedValue>,
    },
    Range {
        min: Box<CastedValue>,
        max: Box<CastedValue>,
    },
}

impl CastedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// `[-][d.]hh:mm:ss[.fffffff]`
pub fn format_timespan(span: &TimeDelta) -> String {
    let negative = *span < TimeDelta::zero();
    let abs = if negative { -*span } else { *span };
    let days = abs.num_days();
    let hours = abs.num_hours() % 24;
    let minutes = abs.num_minutes() % 60;
    let seconds = abs.num_seconds() % 60;
    let ticks = abs.subsec_nanos() / 100;

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if days > 0 {
        out.push_str(&format!("{}.", days));
    }
    out.push_str(&format!("{:02}:{:02}:{:02}", hours, minutes, seconds));
    if ticks > 0 {
        out.push_str(&format!(".{:07}", ticks));
    }
    out
}

fn join(values: &[CastedValue], sep: &str) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

impl fmt::Display for CastedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::UInt(u) => write!(f, "{}", u),
            Self::Double(d) => write!(f, "{}", d),
            Self::String(s) => write!(f, "{}", s),
            Self::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            Self::TimeSpan(ts) => write!(f, "{}", format_timespan(ts)),
            Self::DateRange { start, end } => write!(
                f,
                "{} ~ {}",
                start.format(DATETIME_FORMAT),
                end.format(DATETIME_FORMAT)
            ),
            Self::Array(items) => write!(f, "{}", join(items, "|")),
            Self::Map(entries) => {
                let entries: Vec<String> =
                    entries.iter().map(|(k, v)| format!("{}:{}", k, v)).collect();
                write!(f, "{}", entries.join("|"))
            }
            Self::Enum(e) => write!(f, "{}", e),
            Self::Dsl(dsl) => write!(f, "{}({})", dsl.name, join(&dsl.args, ", ")),
            Self::Point { x, y } => write!(f, "{},{}", x, y),
            Self::Size { width, height } => write!(f, "{},{}", width, height),
            Self::Range { min, max } => write!(f, "{}~{}", min, max),
        }
    }
}

impl Serialize for CastedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::UInt(u) => serializer.serialize_u64(*u),
            Self::Double(d) => serializer.serialize_f64(*d),
            Self::String(s) => serializer.serialize_str(s),
            Self::DateTime(_) | Self::TimeSpan(_) => serializer.collect_str(self),
            Self::DateRange { start, end } => {
                let mut s = serializer.serialize_struct("DateRange", 2)?;
                s.serialize_field("start", &start.format(DATETIME_FORMAT).to_string())?;
                s.serialize_field("end", &end.format(DATETIME_FORMAT).to_string())?;
                s.end()
            }
            Self::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(&k.to_string(), v)?;
                }
                map.end()
            }
            Self::Enum(e) => e.serialize(serializer),
            Self::Dsl(dsl) => {
                let mut s = serializer.serialize_struct("Dsl", 2)?;
                s.serialize_field("type", &dsl.name)?;
                s.serialize_field("args", &dsl.args)?;
                s.end()
            }
            Self::Point { x, y } => {
                let mut s = serializer.serialize_struct("Point", 2)?;
                s.serialize_field("x", x)?;
                s.serialize_field("y", y)?;
                s.end()
            }
            Self::Size { width, height } => {
                let mut s = serializer.serialize_struct("Size", 2)?;
                s.serialize_field("width", width)?;
                s.serialize_field("height", height)?;
                s.end()
            }
            Self::Range { min, max } => {
                let mut s = serializer.serialize_struct("Range", 2)?;
                s.serialize_field("min", min)?;
                s.serialize_field("max", max)?;
                s.end()
            }
        }
    }
}
