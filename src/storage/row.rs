//! Typed row values and their on-page encoding.
//!
//! A row is encoded against its table's schema as a null bitmap — one bit
//! per column, set meaning NULL — followed by the non-null fields in column
//! order. Fixed-width fields are little-endian; `Text` and `Bytes` carry a
//! `u16` length prefix, which caps a single inline value at 65535 bytes.
//! Decoding ignores trailing bytes so a row written by an older schema
//! prefix still reads.

use std::convert::TryFrom;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bytes::{get_f64, get_i64, get_u16, get_u32, put_f64, put_i64, put_u16, put_u32};
use crate::error::{Result, TablaError};

/// Column data types supported by the engine.
///
/// The `u8` wire discriminants (0..=5) are stable: they appear in every
/// table's JSON metadata sidecar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ColumnType {
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// Boolean.
    Bool,
    /// 64-bit IEEE-754 float.
    Float64,
    /// UTF-8 string, at most 65535 bytes.
    Text,
    /// Opaque bytes, at most 65535 bytes.
    Bytes,
}

impl From<ColumnType> for u8 {
    fn from(ty: ColumnType) -> u8 {
        match ty {
            ColumnType::Int32 => 0,
            ColumnType::Int64 => 1,
            ColumnType::Bool => 2,
            ColumnType::Float64 => 3,
            ColumnType::Text => 4,
            ColumnType::Bytes => 5,
        }
    }
}

impl TryFrom<u8> for ColumnType {
    type Error = TablaError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ColumnType::Int32),
            1 => Ok(ColumnType::Int64),
            2 => Ok(ColumnType::Bool),
            3 => Ok(ColumnType::Float64),
            4 => Ok(ColumnType::Text),
            5 => Ok(ColumnType::Bytes),
            other => Err(TablaError::Meta(format!("unknown column type {other}"))),
        }
    }
}

/// One column definition: name, type, nullability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name, unique within its schema.
    pub name: String,
    /// Data type.
    #[serde(rename = "type")]
    pub ty: ColumnType,
    /// Whether NULL is accepted.
    pub nullable: bool,
}

impl Column {
    /// Builds a column definition.
    pub fn new(name: impl Into<String>, ty: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable,
        }
    }
}

/// Ordered list of columns describing a table's rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    cols: Vec<Column>,
}

impl Schema {
    /// Validates and wraps a column list: at least one column, non-empty
    /// unique names.
    pub fn new(cols: Vec<Column>) -> Result<Self> {
        if cols.is_empty() {
            return Err(TablaError::InvalidArgument(
                "schema needs at least one column".into(),
            ));
        }
        for (i, col) in cols.iter().enumerate() {
            if col.name.is_empty() {
                return Err(TablaError::InvalidArgument(format!(
                    "column {i} has an empty name"
                )));
            }
            if cols[..i].iter().any(|c| c.name == col.name) {
                return Err(TablaError::InvalidArgument(format!(
                    "duplicate column name {:?}",
                    col.name
                )));
            }
        }
        Ok(Self { cols })
    }

    /// The columns in declaration order.
    pub fn columns(&self) -> &[Column] {
        &self.cols
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.cols.len()
    }

    /// True if the schema has no columns; never the case for a validated
    /// schema, but serde can produce one from hand-edited metadata.
    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    /// Position of the named column, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.cols.iter().position(|c| c.name == name)
    }
}

/// A single typed value in a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL; only accepted for nullable columns.
    Null,
    /// 32-bit integer.
    Int32(i32),
    /// 64-bit integer.
    Int64(i64),
    /// Boolean.
    Bool(bool),
    /// 64-bit float.
    Float64(f64),
    /// UTF-8 string.
    Text(String),
    /// Opaque bytes.
    Bytes(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Bytes(b) => {
                let head = &b[..b.len().min(8)];
                write!(f, "0x{}", hex::encode(head))?;
                if b.len() > 8 {
                    write!(f, "..{}b", b.len())?;
                }
                Ok(())
            }
        }
    }
}

const MAX_VARLEN: usize = u16::MAX as usize;

fn bitmap_len(columns: usize) -> usize {
    columns.div_ceil(8)
}

/// Encodes `values` against `schema`.
///
/// Integer values widen (`Int32` into an `Int64` column) unconditionally and
/// narrow (`Int64` into an `Int32` column) only when the value fits.
pub fn encode_row(schema: &Schema, values: &[Value]) -> Result<Vec<u8>> {
    if values.len() != schema.len() {
        return Err(TablaError::InvalidArgument(format!(
            "row has {} values for {} columns",
            values.len(),
            schema.len()
        )));
    }
    let mut buf = vec![0u8; bitmap_len(schema.len())];
    for (i, (col, value)) in schema.columns().iter().zip(values).enumerate() {
        if matches!(value, Value::Null) {
            if !col.nullable {
                return Err(TablaError::InvalidArgument(format!(
                    "column {:?} is not nullable",
                    col.name
                )));
            }
            buf[i / 8] |= 1 << (i % 8);
            continue;
        }
        encode_field(&mut buf, col, value)?;
    }
    Ok(buf)
}

fn encode_field(buf: &mut Vec<u8>, col: &Column, value: &Value) -> Result<()> {
    let mismatch = || {
        TablaError::InvalidArgument(format!(
            "value {value} does not fit column {:?} ({:?})",
            col.name, col.ty
        ))
    };
    match col.ty {
        ColumnType::Int32 => {
            let v = match value {
                Value::Int32(v) => *v,
                Value::Int64(v) => i32::try_from(*v).map_err(|_| mismatch())?,
                _ => return Err(mismatch()),
            };
            let off = buf.len();
            buf.resize(off + 4, 0);
            put_u32(buf, off, v as u32);
        }
        ColumnType::Int64 => {
            let v = match value {
                Value::Int64(v) => *v,
                Value::Int32(v) => i64::from(*v),
                _ => return Err(mismatch()),
            };
            let off = buf.len();
            buf.resize(off + 8, 0);
            put_i64(buf, off, v);
        }
        ColumnType::Bool => {
            let Value::Bool(v) = value else {
                return Err(mismatch());
            };
            buf.push(u8::from(*v));
        }
        ColumnType::Float64 => {
            let Value::Float64(v) = value else {
                return Err(mismatch());
            };
            let off = buf.len();
            buf.resize(off + 8, 0);
            put_f64(buf, off, *v);
        }
        ColumnType::Text => {
            let Value::Text(s) = value else {
                return Err(mismatch());
            };
            encode_varlen(buf, s.as_bytes(), col)?;
        }
        ColumnType::Bytes => {
            let Value::Bytes(b) = value else {
                return Err(mismatch());
            };
            encode_varlen(buf, b, col)?;
        }
    }
    Ok(())
}

fn encode_varlen(buf: &mut Vec<u8>, bytes: &[u8], col: &Column) -> Result<()> {
    if bytes.len() > MAX_VARLEN {
        return Err(TablaError::InvalidArgument(format!(
            "value of {} bytes in column {:?} exceeds the {MAX_VARLEN}-byte inline limit",
            bytes.len(),
            col.name
        )));
    }
    let off = buf.len();
    buf.resize(off + 2, 0);
    put_u16(buf, off, bytes.len() as u16);
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Decodes a row previously produced by [`encode_row`] for the same schema.
/// Bytes past the last column are ignored.
pub fn decode_row(schema: &Schema, buf: &[u8]) -> Result<Vec<Value>> {
    let bitmap = bitmap_len(schema.len());
    if buf.len() < bitmap {
        return Err(TablaError::Corruption(
            "row shorter than its null bitmap".into(),
        ));
    }
    let mut off = bitmap;
    let mut values = Vec::with_capacity(schema.len());
    for (i, col) in schema.columns().iter().enumerate() {
        if buf[i / 8] & (1 << (i % 8)) != 0 {
            values.push(Value::Null);
            continue;
        }
        let value = decode_field(buf, &mut off, col)?;
        values.push(value);
    }
    Ok(values)
}

fn need(buf: &[u8], off: usize, n: usize, col: &Column) -> Result<()> {
    if off + n > buf.len() {
        Err(TablaError::Corruption(format!(
            "row truncated in column {:?}",
            col.name
        )))
    } else {
        Ok(())
    }
}

fn decode_field(buf: &[u8], off: &mut usize, col: &Column) -> Result<Value> {
    let value = match col.ty {
        ColumnType::Int32 => {
            need(buf, *off, 4, col)?;
            let v = get_u32(buf, *off) as i32;
            *off += 4;
            Value::Int32(v)
        }
        ColumnType::Int64 => {
            need(buf, *off, 8, col)?;
            let v = get_i64(buf, *off);
            *off += 8;
            Value::Int64(v)
        }
        ColumnType::Bool => {
            need(buf, *off, 1, col)?;
            let v = buf[*off];
            *off += 1;
            if v > 1 {
                return Err(TablaError::Corruption(format!(
                    "bool column {:?} holds byte {v}",
                    col.name
                )));
            }
            Value::Bool(v == 1)
        }
        ColumnType::Float64 => {
            need(buf, *off, 8, col)?;
            let v = get_f64(buf, *off);
            *off += 8;
            Value::Float64(v)
        }
        ColumnType::Text => {
            need(buf, *off, 2, col)?;
            let len = get_u16(buf, *off) as usize;
            *off += 2;
            need(buf, *off, len, col)?;
            let s = std::str::from_utf8(&buf[*off..*off + len]).map_err(|_| {
                TablaError::Corruption(format!("column {:?} is not valid UTF-8", col.name))
            })?;
            *off += len;
            Value::Text(s.to_string())
        }
        ColumnType::Bytes => {
            need(buf, *off, 2, col)?;
            let len = get_u16(buf, *off) as usize;
            *off += 2;
            need(buf, *off, len, col)?;
            let b = buf[*off..*off + len].to_vec();
            *off += len;
            Value::Bytes(b)
        }
    };
    Ok(value)
}
