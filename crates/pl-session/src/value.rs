use bytes::{Buf, BufMut};

/// DbType is the runtime type tag of a value or column domain.
/// Discriminants are stable and are used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum DbType {
    Null = 0,
    Integer = 1,
    Float = 2,
    Double = 3,
    String = 4,
    Object = 5,
    Set = 6,
    Multiset = 7,
    Sequence = 8,
    Time = 10,
    Timestamp = 11,
    Date = 12,
    Monetary = 13,
    Short = 18,
    ResultSet = 20,
    Oid = 21,
    Numeric = 22,
    Char = 25,
    BigInt = 31,
    Datetime = 32,
}

impl DbType {
    /// Width in bytes of the physical encoding, for fixed-width types.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Self::Short => Some(2),
            Self::Integer | Self::Float | Self::Date | Self::Time | Self::Timestamp => Some(4),
            Self::BigInt | Self::Double | Self::Monetary | Self::Datetime => Some(8),
            Self::Object | Self::Oid => Some(8),
            _ => None,
        }
    }

    /// Collection types, which have no scalar representation in a tuple.
    pub fn is_collection(self) -> bool {
        matches!(self, Self::Set | Self::Multiset | Self::Sequence)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "varchar",
            Self::Object => "object",
            Self::Set => "set",
            Self::Multiset => "multiset",
            Self::Sequence => "sequence",
            Self::Time => "time",
            Self::Timestamp => "timestamp",
            Self::Date => "date",
            Self::Monetary => "monetary",
            Self::Short => "smallint",
            Self::ResultSet => "cursor",
            Self::Oid => "oid",
            Self::Numeric => "numeric",
            Self::Char => "char",
            Self::BigInt => "bigint",
            Self::Datetime => "datetime",
        }
    }
}

impl std::fmt::Display for DbType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Oid identifies a stored object by its volume, page and slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Oid {
    pub page_id: i32,
    pub slot_id: i16,
    pub vol_id: i16,
}

/// Domain is the declared type of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Domain {
    pub ty: DbType,
    pub precision: i32,
    pub scale: i16,
}

impl Domain {
    pub const DEFAULT_PRECISION: i32 = 0;
    pub const DEFAULT_SCALE: i16 = 0;

    pub fn new(ty: DbType) -> Self {
        Self {
            ty,
            precision: Self::DEFAULT_PRECISION,
            scale: Self::DEFAULT_SCALE,
        }
    }

    /// Decode the physical representation of a bound column value.
    pub fn decode(&self, mut buf: &[u8]) -> Result<Value, DecodeError> {
        if self.ty.is_collection() || matches!(self.ty, DbType::Null | DbType::ResultSet) {
            return Err(DecodeError::Unsupported(self.ty));
        }
        if let Some(expected) = self.ty.fixed_width() {
            if buf.len() != expected {
                return Err(DecodeError::Length {
                    ty: self.ty,
                    expected,
                    actual: buf.len(),
                });
            }
        }

        let value = match self.ty {
            DbType::Short => Value::Short(buf.get_i16()),
            DbType::Integer => Value::Integer(buf.get_i32()),
            DbType::BigInt => Value::BigInt(buf.get_i64()),
            DbType::Float => Value::Float(buf.get_f32()),
            DbType::Double => Value::Double(buf.get_f64()),
            DbType::Monetary => Value::Monetary(buf.get_f64()),
            DbType::Date => Value::Date(buf.get_i32()),
            DbType::Time => Value::Time(buf.get_u32()),
            DbType::Timestamp => Value::Timestamp(buf.get_u32()),
            DbType::Datetime => Value::Datetime(buf.get_i64()),
            DbType::Object | DbType::Oid => {
                let oid = Oid {
                    page_id: buf.get_i32(),
                    slot_id: buf.get_i16(),
                    vol_id: buf.get_i16(),
                };
                if self.ty == DbType::Oid {
                    Value::Oid(oid)
                } else {
                    Value::Object(oid)
                }
            }
            DbType::Numeric | DbType::Char | DbType::String => {
                let text = std::str::from_utf8(buf)
                    .map_err(|source| DecodeError::Utf8 {
                        ty: self.ty,
                        source,
                    })?
                    .to_string();

                match self.ty {
                    DbType::Numeric => Value::Numeric(text),
                    DbType::Char => Value::Char(text),
                    _ => Value::String(text),
                }
            }
            DbType::Null
            | DbType::Set
            | DbType::Multiset
            | DbType::Sequence
            | DbType::ResultSet => unreachable!("rejected above"),
        };
        Ok(value)
    }

    /// Encode `value` into its physical representation under this domain.
    /// Null values have no representation and are written as unbound.
    pub fn encode<B: BufMut>(&self, value: &Value, buf: &mut B) -> Result<(), DecodeError> {
        if value.db_type() != self.ty {
            return Err(DecodeError::Mismatch {
                domain: self.ty,
                value: value.db_type(),
            });
        }

        match value {
            Value::Null(_) => (),
            Value::Short(v) => buf.put_i16(*v),
            Value::Integer(v) => buf.put_i32(*v),
            Value::BigInt(v) => buf.put_i64(*v),
            Value::Float(v) => buf.put_f32(*v),
            Value::Double(v) | Value::Monetary(v) => buf.put_f64(*v),
            Value::Date(v) => buf.put_i32(*v),
            Value::Time(v) | Value::Timestamp(v) => buf.put_u32(*v),
            Value::Datetime(v) => buf.put_i64(*v),
            Value::Object(oid) | Value::Oid(oid) => {
                buf.put_i32(oid.page_id);
                buf.put_i16(oid.slot_id);
                buf.put_i16(oid.vol_id);
            }
            Value::Numeric(s) | Value::Char(s) | Value::String(s) => buf.put_slice(s.as_bytes()),
        }
        Ok(())
    }
}

/// Value is a typed, nullable SQL value.
/// A null value still carries the type of the domain it was read from.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null(DbType),
    Short(i16),
    Integer(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Monetary(f64),
    Numeric(String),
    Char(String),
    String(String),
    // Days since the epoch.
    Date(i32),
    // Seconds since midnight.
    Time(u32),
    // Seconds since the epoch.
    Timestamp(u32),
    // Milliseconds since the epoch.
    Datetime(i64),
    Object(Oid),
    Oid(Oid),
}

impl Value {
    pub fn db_type(&self) -> DbType {
        match self {
            Self::Null(ty) => *ty,
            Self::Short(_) => DbType::Short,
            Self::Integer(_) => DbType::Integer,
            Self::BigInt(_) => DbType::BigInt,
            Self::Float(_) => DbType::Float,
            Self::Double(_) => DbType::Double,
            Self::Monetary(_) => DbType::Monetary,
            Self::Numeric(_) => DbType::Numeric,
            Self::Char(_) => DbType::Char,
            Self::String(_) => DbType::String,
            Self::Date(_) => DbType::Date,
            Self::Time(_) => DbType::Time,
            Self::Timestamp(_) => DbType::Timestamp,
            Self::Datetime(_) => DbType::Datetime,
            Self::Object(_) => DbType::Object,
            Self::Oid(_) => DbType::Oid,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null(DbType::Null)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("{0} column has no tuple representation")]
    Unsupported(DbType),
    #[error("{ty} column expected {expected} bytes but found {actual}")]
    Length {
        ty: DbType,
        expected: usize,
        actual: usize,
    },
    #[error("{ty} column is not valid UTF-8")]
    Utf8 {
        ty: DbType,
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("value of type {value} cannot be stored in a {domain} column")]
    Mismatch { domain: DbType, value: DbType },
}
