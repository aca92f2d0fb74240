//! Dialect-neutral column types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical column type shared by declared and live schemas
///
/// Each dialect renders a logical type to one catalog type and maps that
/// catalog type back to the same logical type, so a table created from a
/// declaration introspects to an identical descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogicalType {
    /// Variable-length string; `None` means unbounded `VARCHAR`
    String { length: Option<u32> },
    Text,
    SmallInt,
    Integer,
    BigInt,
    Bool,
    Float,
    Double,
    Decimal {
        precision: Option<u32>,
        scale: Option<u32>,
    },
    Timestamp,
    TimestampTz,
    Date,
    Json,
    JsonBinary,
    Uuid,
    Binary,
    /// Backend-specific type carried through verbatim (lowercased)
    Custom { name: String },
}

impl LogicalType {
    /// `VARCHAR(n)` shorthand
    #[must_use]
    pub fn string(length: u32) -> Self {
        LogicalType::String {
            length: Some(length),
        }
    }

    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        LogicalType::Custom {
            name: name.into().to_ascii_lowercase(),
        }
    }

    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            LogicalType::SmallInt | LogicalType::Integer | LogicalType::BigInt
        )
    }

    fn integer_rank(&self) -> Option<u8> {
        match self {
            LogicalType::SmallInt => Some(1),
            LogicalType::Integer => Some(2),
            LogicalType::BigInt => Some(3),
            _ => None,
        }
    }

    /// Whether every value of `self` is representable in `to` without loss
    ///
    /// Identity is not a widening; callers only ask about types that differ.
    #[must_use]
    pub fn widens_to(&self, to: &LogicalType) -> bool {
        if self == to {
            return false;
        }
        if let (Some(a), Some(b)) = (self.integer_rank(), to.integer_rank()) {
            return a < b;
        }
        match (self, to) {
            (LogicalType::String { length: Some(n) }, LogicalType::String { length: m }) => {
                m.map_or(true, |m| m >= *n)
            }
            (LogicalType::String { .. }, LogicalType::Text) => true,
            (LogicalType::Float, LogicalType::Double) => true,
            (
                LogicalType::Decimal {
                    precision: Some(p1),
                    scale: s1,
                },
                LogicalType::Decimal {
                    precision: p2,
                    scale: s2,
                },
            ) => s1 == s2 && p2.map_or(true, |p2| p2 >= *p1),
            (LogicalType::Json, LogicalType::JsonBinary) => true,
            (LogicalType::Timestamp, LogicalType::TimestampTz) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalType::String { length: Some(n) } => write!(f, "varchar({n})"),
            LogicalType::String { length: None } => write!(f, "varchar"),
            LogicalType::Text => write!(f, "text"),
            LogicalType::SmallInt => write!(f, "smallint"),
            LogicalType::Integer => write!(f, "integer"),
            LogicalType::BigInt => write!(f, "bigint"),
            LogicalType::Bool => write!(f, "boolean"),
            LogicalType::Float => write!(f, "real"),
            LogicalType::Double => write!(f, "double precision"),
            LogicalType::Decimal {
                precision: Some(p),
                scale: Some(s),
            } => write!(f, "numeric({p}, {s})"),
            LogicalType::Decimal {
                precision: Some(p),
                scale: None,
            } => write!(f, "numeric({p})"),
            LogicalType::Decimal { .. } => write!(f, "numeric"),
            LogicalType::Timestamp => write!(f, "timestamp"),
            LogicalType::TimestampTz => write!(f, "timestamptz"),
            LogicalType::Date => write!(f, "date"),
            LogicalType::Json => write!(f, "json"),
            LogicalType::JsonBinary => write!(f, "jsonb"),
            LogicalType::Uuid => write!(f, "uuid"),
            LogicalType::Binary => write!(f, "bytea"),
            LogicalType::Custom { name } => write!(f, "{name}"),
        }
    }
}

/// Action taken on referencing rows when the referenced row is deleted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    /// SQL spelling used in `ON DELETE`
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }

    /// Parse `PostgreSQL`'s `pg_constraint.confdeltype` code
    #[must_use]
    pub fn from_pg_code(code: &str) -> Option<Self> {
        match code {
            "a" => Some(ReferentialAction::NoAction),
            "r" => Some(ReferentialAction::Restrict),
            "c" => Some(ReferentialAction::Cascade),
            "n" => Some(ReferentialAction::SetNull),
            "d" => Some(ReferentialAction::SetDefault),
            _ => None,
        }
    }

    /// Parse the `on_delete` text reported by `PRAGMA foreign_key_list`
    #[must_use]
    pub fn from_sql(text: &str) -> Option<Self> {
        match text.trim().to_ascii_uppercase().as_str() {
            "NO ACTION" | "" => Some(ReferentialAction::NoAction),
            "RESTRICT" => Some(ReferentialAction::Restrict),
            "CASCADE" => Some(ReferentialAction::Cascade),
            "SET NULL" => Some(ReferentialAction::SetNull),
            "SET DEFAULT" => Some(ReferentialAction::SetDefault),
            _ => None,
        }
    }
}
