//! Value casting
//!
//! Converts raw cell scalars into [`CastedValue`]s following the column's annotation.
//! Relations are cast through the root type of their target key, sequences as `int`.
//! Results are memoized per (annotation, normalized raw value) in the session; spreadsheet
//! data repeats the same literals across thousands of rows. Normalizing trims text, except
//! for `string` targets, which keep the cell text as written.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use regex::Regex;
use std::sync::LazyLock;

use crate::dsl::parse_call;
use crate::enums::EnumValue;
use crate::error::{CompileError, CompileResult};
use crate::input::RawValue;
use crate::session::Session;
use crate::types::{make_nullable, nake, parse_type, BaseKind, IntBounds, NakeMask, TypeDescriptor};
use crate::value::{CastedValue, DslValue};

static CONST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Const:(?P<table>\w+):(?P<name>\w+)$").expect("valid regex"));

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// `Const:<Table>:<Name>` reference in a cell
pub fn const_ref(raw: &RawValue) -> Option<(&str, &str)> {
    let caps = CONST_RE.captures(raw.as_text()?.trim())?;
    Some((caps.name("table")?.as_str(), caps.name("name")?.as_str()))
}

/// Split container text on `&`, `|` or newline, but not inside parentheses
pub fn split_elements(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            '&' | '|' | '\n' if depth <= 0 => {
                parts.push(text[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(text[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

/// `0001-01-01 00:00:00`, the origin of duration-only date ranges
pub fn min_datetime() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .unwrap_or(NaiveDate::MIN)
        .and_time(NaiveTime::MIN)
}

pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date.and_time(NaiveTime::MIN));
        }
    }
    None
}

/// `[-][d.]hh:mm[:ss[.fffffff]]` or a whole number of days; a space may separate days
pub fn parse_timespan(text: &str) -> Option<TimeDelta> {
    let text = text.trim().replace(' ', ".");
    let negative = text.starts_with('-');
    let text = text.strip_prefix('-').unwrap_or(&text);

    let span = if text.bytes().all(|b| b.is_ascii_digit()) {
        TimeDelta::try_days(text.parse().ok()?)?
    } else {
        let (days, clock) = match text.split_once('.') {
            Some((d, rest)) if !d.contains(':') => (d.parse::<i64>().ok()?, rest),
            _ => (0, text),
        };

        let parts: Vec<&str> = clock.split(':').collect();
        let (hours, minutes, seconds) = match parts.as_slice() {
            [h, m] => (*h, *m, "0"),
            [h, m, s] => (*h, *m, *s),
            _ => return None,
        };
        let hours: i64 = hours.parse().ok()?;
        let minutes: i64 = minutes.parse().ok()?;
        let (whole, fraction) = seconds.split_once('.').unwrap_or((seconds, ""));
        let seconds: i64 = whole.parse().ok()?;
        if hours > 23 || minutes > 59 || seconds > 59 || fraction.len() > 7 {
            return None;
        }
        let nanos = if fraction.is_empty() {
            0
        } else {
            let ticks: i64 = format!("{:0<7}", fraction).parse().ok()?;
            ticks * 100
        };

        TimeDelta::try_days(days)?
            + TimeDelta::try_hours(hours)?
            + TimeDelta::try_minutes(minutes)?
            + TimeDelta::try_seconds(seconds)?
            + TimeDelta::nanoseconds(nanos)
    };

    Some(if negative { -span } else { span })
}

/// Integral text: decimal, `0x` hex, or a float without fractional part
fn parse_signed(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    if let Ok(v) = text.parse::<i64>() {
        return Some(v);
    }
    let f = text.parse::<f64>().ok()?;
    (f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64)
        .then_some(f as i64)
}

fn parse_unsigned(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok();
    }
    if let Ok(v) = text.parse::<u64>() {
        return Some(v);
    }
    let f = text.parse::<f64>().ok()?;
    (f.is_finite() && f.fract() == 0.0 && f >= 0.0 && f <= u64::MAX as f64).then_some(f as u64)
}

impl Session {
    /// Cast a raw cell into the type `ty`
    pub fn cast(&self, ty: &str, raw: &RawValue) -> CompileResult<CastedValue> {
        let mut trail = Vec::new();
        self.cast_traced(ty, raw, &mut trail)
    }

    /// Type a relation finally stores: follows `$Table[.Column]` through key columns
    /// until a plain type is reached; nullability of any link carries over
    pub fn root_type(&self, ty: &str) -> CompileResult<String> {
        if let Some(hit) = self.roots.get(ty) {
            return Ok(hit.value().clone());
        }
        let mut visited = Vec::new();
        let root = self.root_type_guarded(ty, &mut visited)?;
        self.roots.insert(ty.to_string(), root.clone());
        Ok(root)
    }

    /// `visited` holds (table, column) links, so a chain may pass through one table twice
    fn root_type_guarded(
        &self,
        ty: &str,
        visited: &mut Vec<(String, String)>,
    ) -> CompileResult<String> {
        let descriptor = parse_type(ty)?;

        // `~$T` is a sequence over T, not a relation
        if descriptor.sequence {
            return Ok(if descriptor.nullable { "int?" } else { "int" }.to_string());
        }

        if let Some(target) = descriptor.relation() {
            let schema = self.schemas.get(&target.table).ok_or_else(|| {
                CompileError::reference(format!("table '{}' is not defined", target.table))
            })?;
            let column = match &target.column {
                Some(column) => schema.get(column).ok_or_else(|| {
                    CompileError::reference(format!(
                        "column '{}' is not defined in table '{}'",
                        column, target.table
                    ))
                })?,
                None => schema.key().ok_or_else(|| {
                    CompileError::reference(format!("table '{}' has no key", target.table))
                })?,
            };

            let link = (target.table.clone(), column.name.clone());
            let looped = visited.contains(&link);
            visited.push(link);
            if looped {
                let chain: Vec<&str> = visited.iter().map(|(table, _)| table.as_str()).collect();
                return Err(CompileError::reference(format!(
                    "relation cycle: {}",
                    chain.join(" -> ")
                )));
            }

            let next = nake(&column.ty, NakeMask::KEY);
            let root = self.root_type_guarded(&next, visited)?;
            return Ok(if descriptor.nullable {
                make_nullable(&root)
            } else {
                root
            });
        }

        Ok(nake(ty, NakeMask::ALL & !NakeMask::NULLABLE))
    }

    fn is_string_root(&self, ty: &str) -> CompileResult<bool> {
        let root = self.root_type(ty)?;
        Ok(matches!(parse_type(&root)?.kind, BaseKind::String))
    }

    fn cast_traced(
        &self,
        ty: &str,
        raw: &RawValue,
        trail: &mut Vec<(String, String)>,
    ) -> CompileResult<CastedValue> {
        if let Some((table, name)) = const_ref(raw) {
            return self.cast_const(table, name, trail);
        }

        // string cells keep their text as written; only blank and `null` cells turn null
        let normalized = raw.clone().normalize();
        let raw = match (&normalized, raw) {
            (RawValue::Text(_), RawValue::Text(_)) if self.is_string_root(ty)? => raw.clone(),
            _ => normalized,
        };
        let key = (ty.to_string(), raw);
        if let Some(hit) = self.memo.get(&key) {
            return Ok(hit.value().clone());
        }

        let value = self.cast_uncached(ty, &key.1, trail)?;
        Ok(self.memo.entry(key).or_insert(value).value().clone())
    }

    fn cast_const(
        &self,
        table: &str,
        name: &str,
        trail: &mut Vec<(String, String)>,
    ) -> CompileResult<CastedValue> {
        let constant = self.constant(table, name).ok_or_else(|| {
            if self.has_const_table(table) {
                CompileError::reference(format!("constant '{}' is not defined in '{}'", name, table))
            } else {
                CompileError::reference(format!("constant table '{}' is not defined", table))
            }
        })?;

        let link = (table.to_string(), name.to_string());
        if trail.contains(&link) {
            let mut chain: Vec<String> = trail.iter().map(|(t, n)| format!("{}:{}", t, n)).collect();
            chain.push(format!("{}:{}", table, name));
            return Err(CompileError::reference(format!(
                "constant cycle: {}",
                chain.join(" -> ")
            )));
        }

        trail.push(link);
        let value = self.cast_traced(&constant.ty, &constant.value, trail);
        trail.pop();
        value
    }

    fn cast_uncached(
        &self,
        ty: &str,
        raw: &RawValue,
        trail: &mut Vec<(String, String)>,
    ) -> CompileResult<CastedValue> {
        let root = self.root_type(ty)?;
        let descriptor = parse_type(&root)?;
        let nullable = descriptor.nullable;

        match &descriptor.kind {
            BaseKind::Array(elem) => return self.cast_array(&root, elem, raw, trail),
            BaseKind::Map(k, v) => return self.cast_map(&root, k, v, raw, trail),
            BaseKind::String => {
                return Ok(match raw {
                    RawValue::Null => CastedValue::Null,
                    RawValue::Text(s) => CastedValue::String(s.clone()),
                    other => CastedValue::String(other.to_string()),
                })
            }
            _ => {}
        }

        if raw.is_null() {
            return if nullable {
                Ok(CastedValue::Null)
            } else {
                Err(CompileError::null_value(&root))
            };
        }

        match &descriptor.kind {
            kind if kind.is_integral() => self.cast_integral(&root, kind, raw),
            BaseKind::Bool => match raw {
                RawValue::Bool(b) => Ok(CastedValue::Bool(*b)),
                RawValue::Text(s) if s.eq_ignore_ascii_case("true") => Ok(CastedValue::Bool(true)),
                RawValue::Text(s) if s.eq_ignore_ascii_case("false") => {
                    Ok(CastedValue::Bool(false))
                }
                other => Err(CompileError::type_cast(other, &root, "expected true or false")),
            },
            BaseKind::Float | BaseKind::Double => {
                let text = raw.as_text().ok_or_else(|| {
                    CompileError::type_cast(raw, &root, "expected a number")
                })?;
                let v: f64 = text
                    .trim()
                    .parse()
                    .map_err(|_| CompileError::type_cast(text, &root, "expected a number"))?;
                if !v.is_finite() {
                    return Err(CompileError::type_cast(text, &root, "value is not finite"));
                }
                if descriptor.kind == BaseKind::Float && v.abs() > f32::MAX as f64 {
                    return Err(CompileError::type_cast(text, &root, "out of range for float"));
                }
                Ok(CastedValue::Double(v))
            }
            BaseKind::DateTime => match raw {
                RawValue::DateTime(dt) => Ok(CastedValue::DateTime(*dt)),
                RawValue::Text(s) => parse_datetime(s)
                    .map(CastedValue::DateTime)
                    .ok_or_else(|| CompileError::type_cast(s, &root, "expected a date/time")),
                other => Err(CompileError::type_cast(other, &root, "expected a date/time")),
            },
            BaseKind::TimeSpan => match raw {
                RawValue::TimeSpan(ts) => Ok(CastedValue::TimeSpan(*ts)),
                RawValue::Text(s) => parse_timespan(s)
                    .map(CastedValue::TimeSpan)
                    .ok_or_else(|| CompileError::type_cast(s, &root, "expected [d.]hh:mm[:ss]")),
                other => Err(CompileError::type_cast(other, &root, "expected a time span")),
            },
            BaseKind::DateRange => self.cast_date_range(&root, raw, trail),
            BaseKind::Point(elem) => {
                let (x, y) = self.cast_pair(&root, elem, raw, ',', trail)?;
                Ok(CastedValue::Point { x, y })
            }
            BaseKind::Size(elem) => {
                let (width, height) = self.cast_pair(&root, elem, raw, ',', trail)?;
                Ok(CastedValue::Size { width, height })
            }
            BaseKind::Range(elem) => {
                let (min, max) = self.cast_pair(&root, elem, raw, '~', trail)?;
                Ok(CastedValue::Range { min, max })
            }
            BaseKind::Enum(name) => self.cast_enum(&root, name, raw),
            BaseKind::Dsl => self.cast_dsl(&root, raw, trail),
            _ => Err(CompileError::type_cast(raw, &root, "unsupported type")),
        }
    }

    fn cast_integral(&self, root: &str, kind: &BaseKind, raw: &RawValue) -> CompileResult<CastedValue> {
        let text = raw
            .as_text()
            .ok_or_else(|| CompileError::type_cast(raw, root, "expected an integer"))?;
        match kind.int_bounds() {
            Some(IntBounds::Signed(min, max)) => {
                let v = parse_signed(text)
                    .ok_or_else(|| CompileError::type_cast(text, root, "expected an integer"))?;
                if v < min || v > max {
                    return Err(CompileError::type_cast(
                        text,
                        root,
                        format!("out of range {}..={}", min, max),
                    ));
                }
                Ok(CastedValue::Int(v))
            }
            Some(IntBounds::Unsigned(max)) => {
                let v = match parse_unsigned(text) {
                    Some(v) => v,
                    None if parse_signed(text).is_some_and(|v| v < 0) => {
                        return Err(CompileError::type_cast(
                            text,
                            root,
                            format!("out of range 0..={}", max),
                        ))
                    }
                    None => {
                        return Err(CompileError::type_cast(text, root, "expected an integer"))
                    }
                };
                if v > max {
                    return Err(CompileError::type_cast(
                        text,
                        root,
                        format!("out of range 0..={}", max),
                    ));
                }
                Ok(CastedValue::UInt(v))
            }
            None => Err(CompileError::type_cast(text, root, "not an integral type")),
        }
    }

    fn cast_array(
        &self,
        root: &str,
        elem: &TypeDescriptor,
        raw: &RawValue,
        trail: &mut Vec<(String, String)>,
    ) -> CompileResult<CastedValue> {
        if raw.is_null() {
            return Ok(CastedValue::Array(vec![]));
        }
        let text = raw.to_string();
        let elem_ty = elem.to_string();
        let items = split_elements(&text)
            .into_iter()
            .map(|item| self.cast_traced(&elem_ty, &RawValue::text(item), trail))
            .collect::<CompileResult<Vec<_>>>()
            .map_err(|e| nest(e, &text, root))?;
        Ok(CastedValue::Array(items))
    }

    fn cast_map(
        &self,
        root: &str,
        key: &TypeDescriptor,
        value: &TypeDescriptor,
        raw: &RawValue,
        trail: &mut Vec<(String, String)>,
    ) -> CompileResult<CastedValue> {
        if raw.is_null() {
            return Ok(CastedValue::Map(vec![]));
        }
        let text = raw.to_string();
        let (key_ty, value_ty) = (key.to_string(), value.to_string());
        let mut entries = Vec::new();
        for entry in split_elements(&text) {
            let (k, v) = entry.split_once(':').ok_or_else(|| {
                CompileError::type_cast(entry, root, "map entries are written key:value")
            })?;
            let k = self.cast_traced(&key_ty, &RawValue::text(k.trim()), trail)?;
            let v = self.cast_traced(&value_ty, &RawValue::text(v.trim()), trail)?;
            entries.push((k, v));
        }
        Ok(CastedValue::Map(entries))
    }

    fn cast_pair(
        &self,
        root: &str,
        elem: &TypeDescriptor,
        raw: &RawValue,
        sep: char,
        trail: &mut Vec<(String, String)>,
    ) -> CompileResult<(Box<CastedValue>, Box<CastedValue>)> {
        let text = raw
            .as_text()
            .ok_or_else(|| CompileError::type_cast(raw, root, format!("expected a{}b", sep)))?;
        let (a, b) = text
            .split_once(sep)
            .ok_or_else(|| CompileError::type_cast(text, root, format!("expected a{}b", sep)))?;
        let elem_ty = elem.to_string();
        let a = self.cast_traced(&elem_ty, &RawValue::text(a.trim()), trail)?;
        let b = self.cast_traced(&elem_ty, &RawValue::text(b.trim()), trail)?;
        Ok((Box::new(a), Box::new(b)))
    }

    fn cast_date_range(
        &self,
        root: &str,
        raw: &RawValue,
        trail: &mut Vec<(String, String)>,
    ) -> CompileResult<CastedValue> {
        let text = raw
            .as_text()
            .ok_or_else(|| CompileError::type_cast(raw, root, "expected 'start ~ end'"))?;

        if let Some((start, end)) = text.split_once('~') {
            let start = self.cast_traced("DateTime", &RawValue::text(start.trim()), trail)?;
            let end = self.cast_traced("DateTime", &RawValue::text(end.trim()), trail)?;
            return match (start, end) {
                (CastedValue::DateTime(start), CastedValue::DateTime(end)) => {
                    Ok(CastedValue::DateRange { start, end })
                }
                _ => Err(CompileError::type_cast(text, root, "expected 'start ~ end'")),
            };
        }

        let span = parse_timespan(text).ok_or_else(|| {
            CompileError::type_cast(text, root, "expected 'start ~ end' or a time span")
        })?;
        let start = min_datetime();
        let end = start
            .checked_add_signed(span)
            .ok_or_else(|| CompileError::type_cast(text, root, "time span out of range"))?;
        Ok(CastedValue::DateRange { start, end })
    }

    fn cast_enum(&self, root: &str, name: &str, raw: &RawValue) -> CompileResult<CastedValue> {
        if !self.enums.contains(name) {
            return Err(CompileError::reference(format!(
                "'{}' is neither a primitive type nor a defined enum",
                name
            )));
        }
        let text = raw
            .as_text()
            .ok_or_else(|| CompileError::type_cast(raw, root, "expected an enum literal"))?;
        let value: EnumValue = self.enums.evaluate(name, text)?;
        Ok(CastedValue::Enum(value))
    }

    fn cast_dsl(
        &self,
        root: &str,
        raw: &RawValue,
        trail: &mut Vec<(String, String)>,
    ) -> CompileResult<CastedValue> {
        let text = raw
            .as_text()
            .ok_or_else(|| CompileError::type_cast(raw, root, "expected a DSL call"))?;
        let call = parse_call(text)?;
        let prototype = self.dsl.get(&call.name).ok_or_else(|| {
            CompileError::reference(format!("DSL '{}' is not defined", call.name))
        })?;

        let required = prototype.required();
        if call.args.len() < required {
            return Err(CompileError::type_cast(
                text,
                root,
                format!("{} takes at least {} arguments", prototype.signature(), required),
            ));
        }
        if call.args.len() > prototype.params.len() {
            return Err(CompileError::type_cast(
                text,
                root,
                format!(
                    "{} takes at most {} arguments",
                    prototype.signature(),
                    prototype.params.len()
                ),
            ));
        }

        let mut args = Vec::with_capacity(prototype.params.len());
        for (i, param) in prototype.params.iter().enumerate() {
            let arg = match (call.args.get(i), &param.default) {
                (Some(arg), _) => arg.as_str(),
                (None, Some(default)) => default.as_str(),
                (None, None) => {
                    return Err(CompileError::type_cast(
                        text,
                        root,
                        format!("parameter '{}' has no default", param.name),
                    ))
                }
            };
            args.push(self.cast_traced(&param.ty, &RawValue::text(arg), trail)?);
        }

        Ok(CastedValue::Dsl(DslValue {
            name: call.name,
            args,
        }))
    }
}

/// Element failures keep their own kind; only the message gains the container literal
fn nest(error: CompileError, text: &str, root: &str) -> CompileError {
    match error {
        CompileError::TypeCast { value, ty, detail } => CompileError::TypeCast {
            value,
            ty,
            detail: format!("{} (in '{}' of type '{}')", detail, text, root),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::dsl::DslParameter;
    use crate::error::SourceLocation;
    use crate::input::{CompilerInput, RawConst, RawEnumSheet};
    use crate::schema::{Scope, SchemaColumn, SchemaSet};
    use pretty_assertions::assert_eq;

    fn schema(name: &str, columns: &[(&str, &str)]) -> SchemaSet {
        let mut set = SchemaSet::new(name, None, name);
        for (column, ty) in columns {
            set.push(SchemaColumn {
                name: column.to_string(),
                ty: ty.to_string(),
                descriptor: parse_type(ty).unwrap(),
                scope: Scope::Common,
                inherited: false,
            });
        }
        set
    }

    fn session() -> Session {
        let loc = SourceLocation::new("Data.xlsx", "Sheet");
        let input = CompilerInput::new()
            .enum_sheet(
                RawEnumSheet::new(loc.clone(), "Flags")
                    .member("None", "0")
                    .member("A", "1")
                    .member("B", "2"),
            )
            .constant(RawConst::new(loc.clone(), "Game", "MaxLevel", "int", "60"))
            .constant(RawConst::new(loc.clone(), "Game", "Cap", "int", "Const:Game:MaxLevel"))
            .constant(RawConst::new(loc.clone(), "Loop", "X", "int", "Const:Loop:Y"))
            .constant(RawConst::new(loc, "Loop", "Y", "int", "Const:Loop:X"))
            .dsl(
                "Lerp",
                vec![
                    DslParameter::new("from", "float"),
                    DslParameter::new("to", "float"),
                    DslParameter::new("t", "float").with_default("1.0"),
                ],
            );
        let mut session = Session::new(CompilerConfig::default(), &input);
        session.schemas.insert(schema("Y", &[("Id", "*int")]));
        session.schemas.insert(schema("X", &[("Id", "*$Y")]));
        session.schemas.insert(schema("N", &[("Id", "*$Y?"), ("Code", "string")]));
        session.schemas.insert(schema("P", &[("Id", "*$Q")]));
        session.schemas.insert(schema("Q", &[("Id", "*$P")]));
        session
    }

    #[test]
    fn test_numeric_width() {
        let s = session();
        assert!(matches!(
            s.cast("byte", &"300".into()),
            Err(CompileError::TypeCast { .. })
        ));
        assert_eq!(s.cast("byte", &"255".into()).unwrap(), CastedValue::UInt(255));
        assert_eq!(s.cast("sbyte", &"-128".into()).unwrap(), CastedValue::Int(-128));
        assert!(s.cast("ushort", &"-1".into()).is_err());
        assert_eq!(s.cast("int", &"0x10".into()).unwrap(), CastedValue::Int(16));
        assert_eq!(s.cast("long", &"3.0".into()).unwrap(), CastedValue::Int(3));
        assert!(s.cast("int", &"3.5".into()).is_err());
        assert!(s.cast("float", &"1e300".into()).is_err());
        assert_eq!(s.cast("double", &"1e300".into()).unwrap(), CastedValue::Double(1e300));
    }

    #[test]
    fn test_null_handling() {
        let s = session();
        assert!(matches!(
            s.cast("int", &RawValue::Null),
            Err(CompileError::NullValue { .. })
        ));
        assert_eq!(s.cast("int?", &"null".into()).unwrap(), CastedValue::Null);
        assert_eq!(s.cast("string", &"".into()).unwrap(), CastedValue::Null);
        assert_eq!(s.cast("[int]", &RawValue::Null).unwrap(), CastedValue::Array(vec![]));
        assert_eq!(s.cast("{int:int}", &"".into()).unwrap(), CastedValue::Map(vec![]));
    }

    #[test]
    fn test_memoized_casts_are_equal() {
        let s = session();
        let first = s.cast("[int]", &"1|2&3".into()).unwrap();
        let len = s.memo_len();
        let second = s.cast("[int]", &"1|2&3".into()).unwrap();
        assert_eq!(first, second);
        assert_eq!(s.memo_len(), len);
        assert_eq!(
            first,
            CastedValue::Array(vec![
                CastedValue::Int(1),
                CastedValue::Int(2),
                CastedValue::Int(3)
            ])
        );
    }

    #[test]
    fn test_root_type_chain() {
        let s = session();
        assert_eq!(s.root_type("$X").unwrap(), "int");
        assert_eq!(s.root_type("$X?").unwrap(), "int?");
        assert_eq!(s.root_type("$N").unwrap(), "int?");
        assert_eq!(s.root_type("$N.Code").unwrap(), "string");
        assert_eq!(s.root_type("~int?").unwrap(), "int?");
        assert_eq!(s.root_type("*!Flags").unwrap(), "Flags");
        assert!(matches!(s.root_type("$Missing"), Err(CompileError::Reference(_))));
        assert!(matches!(s.root_type("$X.Nope"), Err(CompileError::Reference(_))));
    }

    #[test]
    fn test_root_type_cycle_is_reported() {
        let s = session();
        let err = s.root_type("$P").unwrap_err();
        assert!(matches!(err, CompileError::Reference(_)));
        assert!(err.to_string().contains("P -> Q -> P"), "{}", err);
    }

    #[test]
    fn test_root_type_revisits_table_through_other_column() {
        let mut s = session();
        s.schemas.insert(schema("Node", &[("Id", "*int"), ("Next", "$Node?")]));
        s.schemas.insert(schema("Use", &[("Ref", "$Node.Next")]));

        assert_eq!(s.root_type("$Node.Next").unwrap(), "int?");
        assert_eq!(s.cast("$Node.Next", &"4".into()).unwrap(), CastedValue::Int(4));
        assert_eq!(s.cast("$Node.Next", &RawValue::Null).unwrap(), CastedValue::Null);
    }

    #[test]
    fn test_sequence_over_relation_is_int() {
        let mut s = session();
        s.schemas.insert(schema("Tag", &[("Name", "*string")]));

        assert_eq!(s.root_type("$Tag").unwrap(), "string");
        assert_eq!(s.root_type("~$Tag").unwrap(), "int");
        assert_eq!(s.root_type("~$Tag?").unwrap(), "int?");
        assert_eq!(s.cast("~$Tag", &"3".into()).unwrap(), CastedValue::Int(3));
        assert!(matches!(
            s.cast("~$Tag", &"abc".into()),
            Err(CompileError::TypeCast { .. })
        ));
    }

    #[test]
    fn test_string_keeps_cell_text() {
        let s = session();
        assert_eq!(
            s.cast("string", &" abc ".into()).unwrap(),
            CastedValue::String(" abc ".into())
        );
        assert_eq!(s.cast("string?", &"  ".into()).unwrap(), CastedValue::Null);
        assert_eq!(s.cast("int", &" 12 ".into()).unwrap(), CastedValue::Int(12));
        assert_eq!(
            s.cast("[string]", &"a | b ".into()).unwrap(),
            CastedValue::Array(vec![
                CastedValue::String("a".into()),
                CastedValue::String("b".into())
            ])
        );
    }

    #[test]
    fn test_relation_casts_through_root() {
        let s = session();
        assert_eq!(s.cast("[$X]", &"1|2".into()).unwrap().to_string(), "1|2");
        assert_eq!(s.cast("$X?", &RawValue::Null).unwrap(), CastedValue::Null);
        assert_eq!(s.cast("~int", &"7".into()).unwrap(), CastedValue::Int(7));
    }

    #[test]
    fn test_enum_values() {
        let s = session();
        assert_eq!(
            s.cast("Flags", &"A|B".into()).unwrap(),
            CastedValue::Enum(EnumValue::Integer(3))
        );
        assert_eq!(
            s.cast("Flags", &"B".into()).unwrap(),
            CastedValue::Enum(EnumValue::Symbol("B".into()))
        );
        assert!(matches!(
            s.cast("Flags", &"C".into()),
            Err(CompileError::Reference(_))
        ));
        assert!(matches!(
            s.cast("Unknown", &"A".into()),
            Err(CompileError::Reference(_))
        ));
    }

    #[test]
    fn test_dsl_defaults_and_arity() {
        let s = session();
        assert_eq!(
            s.cast("dsl", &"Lerp(0, 10)".into()).unwrap(),
            CastedValue::Dsl(DslValue {
                name: "Lerp".into(),
                args: vec![
                    CastedValue::Double(0.0),
                    CastedValue::Double(10.0),
                    CastedValue::Double(1.0)
                ],
            })
        );
        assert!(s.cast("dsl", &"Lerp(0)".into()).is_err());
        assert!(s.cast("dsl", &"Lerp(0, 1, 2, 3)".into()).is_err());
        assert!(matches!(
            s.cast("dsl", &"Warp(1)".into()),
            Err(CompileError::Reference(_))
        ));
    }

    #[test]
    fn test_containers_do_not_split_inside_calls() {
        let s = session();
        let value = s.cast("[dsl]", &"Lerp(0, 1) | Lerp(2, 3, 0.5)".into()).unwrap();
        match value {
            CastedValue::Array(items) => assert_eq!(items.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(split_elements("a(b|c)&d\ne"), vec!["a(b|c)", "d", "e"]);

        let map = s.cast("{string:int}", &"hp:10 | mp:5".into()).unwrap();
        assert_eq!(map.to_string(), "hp:10|mp:5");
        assert!(s.cast("{string:int}", &"hp".into()).is_err());
    }

    #[test]
    fn test_geometry() {
        let s = session();
        assert_eq!(s.cast("point", &"3, 4".into()).unwrap().to_string(), "3,4");
        assert_eq!(s.cast("range<int>", &"-2 ~ 5".into()).unwrap().to_string(), "-2~5");
        assert!(s.cast("size", &"3".into()).is_err());
        assert!(s.cast("point", &"-1,2".into()).is_err());
    }

    #[test]
    fn test_dates_and_spans() {
        let s = session();
        assert_eq!(
            s.cast("DateTime", &"2024-03-01 12:30:00".into())
                .unwrap()
                .to_string(),
            "2024-03-01 12:30:00"
        );
        assert_eq!(
            s.cast("DateTime", &"2024/03/01".into()).unwrap().to_string(),
            "2024-03-01 00:00:00"
        );
        assert_eq!(
            s.cast("TimeSpan", &"1 02:03".into()).unwrap(),
            CastedValue::TimeSpan(TimeDelta::hours(26) + TimeDelta::minutes(3))
        );
        assert!(s.cast("TimeSpan", &"25:00".into()).is_err());

        let range = s
            .cast("DateRange", &"2024-01-01 ~ 2024-01-31 23:59:59".into())
            .unwrap();
        assert_eq!(range.to_string(), "2024-01-01 00:00:00 ~ 2024-01-31 23:59:59");

        let span = s.cast("DateRange", &"2.00:00:00".into()).unwrap();
        assert_eq!(span.to_string(), "0001-01-01 00:00:00 ~ 0001-01-03 00:00:00");
    }

    #[test]
    fn test_constants() {
        let s = session();
        assert_eq!(s.cast("int", &"Const:Game:MaxLevel".into()).unwrap(), CastedValue::Int(60));
        assert_eq!(s.cast("string", &"Const:Game:Cap".into()).unwrap(), CastedValue::Int(60));
        assert!(matches!(
            s.cast("int", &"Const:Game:Nope".into()),
            Err(CompileError::Reference(_))
        ));
        let err = s.cast("int", &"Const:Loop:X".into()).unwrap_err();
        assert!(err.to_string().contains("Loop:X -> Loop:Y -> Loop:X"), "{}", err);
    }

    #[test]
    fn test_bool() {
        let s = session();
        assert_eq!(s.cast("bool", &"TRUE".into()).unwrap(), CastedValue::Bool(true));
        assert_eq!(s.cast("bool", &RawValue::Bool(false)).unwrap(), CastedValue::Bool(false));
        assert!(s.cast("bool", &"yes".into()).is_err());
    }
}
