//! Safety classification of diff operations.
//!
//! Every operation gets a [`RiskTier`] and a human-readable reason. A plan
//! whose highest tier is [`RiskTier::Destructive`] is only applied after
//! explicit confirmation.

use crate::operation::DiffOperation;
use crate::schema::LogicalType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Risk tier, ordered from least to most risky
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// Cannot lose data or fail on existing rows
    Safe,
    /// May lose data or fail on existing rows
    Destructive,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskTier::Safe => write!(f, "safe"),
            RiskTier::Destructive => write!(f, "destructive"),
        }
    }
}

/// Tier plus the reason shown in reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub tier: RiskTier,
    pub reason: String,
}

impl Classification {
    fn safe(reason: impl Into<String>) -> Self {
        Self {
            tier: RiskTier::Safe,
            reason: reason.into(),
        }
    }

    fn destructive(reason: impl Into<String>) -> Self {
        Self {
            tier: RiskTier::Destructive,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn is_destructive(&self) -> bool {
        self.tier == RiskTier::Destructive
    }
}

/// An operation with its classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedOperation {
    pub operation: DiffOperation,
    pub classification: Classification,
}

/// Classify one operation on its own
#[must_use]
pub fn classify(op: &DiffOperation) -> Classification {
    match op {
        DiffOperation::CreateTable { .. } => Classification::safe("new table"),
        DiffOperation::DropTable { table } => Classification::destructive(format!(
            "drops table '{}' and all of its rows",
            table.name
        )),
        DiffOperation::AddColumn { column, .. } => {
            if column.nullable {
                Classification::safe("nullable column")
            } else if column.default.is_some() {
                Classification::safe("NOT NULL column with a default")
            } else {
                Classification::destructive(
                    "NOT NULL column without a default fails on tables that have rows",
                )
            }
        }
        DiffOperation::DropColumn { table, column } => Classification::destructive(format!(
            "drops column {table}.{} and its data",
            column.name
        )),
        DiffOperation::AlterColumnType { from, to, .. } => classify_type_change(from, to),
        DiffOperation::AlterColumnNullability {
            from_nullable,
            to_nullable,
            ..
        } => {
            if *to_nullable && !*from_nullable {
                Classification::safe("drops a NOT NULL constraint")
            } else {
                Classification::destructive("adds a NOT NULL constraint; fails if any row holds NULL")
            }
        }
        DiffOperation::AddIndex { index, .. } if index.unique => Classification::destructive(
            "unique index on an existing table fails if duplicate rows exist",
        ),
        DiffOperation::AddIndex { .. } => Classification::safe("index"),
        DiffOperation::DropIndex { .. } => Classification::safe("index removal keeps data"),
        DiffOperation::AddForeignKey { .. } => Classification::safe("foreign key"),
        DiffOperation::DropForeignKey { .. } => Classification::safe("constraint removal keeps data"),
        DiffOperation::AddUniqueConstraint { .. } => Classification::destructive(
            "unique constraint on an existing table fails if duplicate rows exist",
        ),
        DiffOperation::DropUniqueConstraint { .. } => {
            Classification::safe("constraint removal keeps data")
        }
        DiffOperation::RenameColumn { .. } => Classification::safe("explicit rename keeps data"),
    }
}

fn classify_type_change(from: &LogicalType, to: &LogicalType) -> Classification {
    if from.widens_to(to) {
        Classification::safe(format!("widens {from} to {to}"))
    } else {
        Classification::destructive(format!(
            "changes {from} to {to}; existing values may be truncated or fail to convert"
        ))
    }
}

/// Classify a batch of operations
///
/// Same as [`classify`] per operation, except that an added column paired
/// with a dropped column of the same type in the same table is treated as a
/// possible rename and marked destructive.
#[must_use]
pub fn classify_all(ops: Vec<DiffOperation>) -> Vec<ClassifiedOperation> {
    let mut dropped: BTreeMap<(&str, &LogicalType), Vec<&str>> = BTreeMap::new();
    for op in &ops {
        if let DiffOperation::DropColumn { table, column } = op {
            dropped
                .entry((table.as_str(), &column.logical_type))
                .or_default()
                .push(column.name.as_str());
        }
    }

    let classifications: Vec<Classification> = ops
        .iter()
        .map(|op| match op {
            DiffOperation::AddColumn { table, column } => {
                match dropped.get(&(table.as_str(), &column.logical_type)) {
                    Some(names) => Classification::destructive(format!(
                        "may be a rename of {table}.{}; renames are never inferred, declare a column rename to keep the data",
                        names.join(", ")
                    )),
                    None => classify(op),
                }
            }
            _ => classify(op),
        })
        .collect();

    ops.into_iter()
        .zip(classifications)
        .map(|(operation, classification)| ClassifiedOperation {
            operation,
            classification,
        })
        .collect()
}

/// Highest tier present, `Safe` for an empty set
#[must_use]
pub fn overall_tier<'a>(classifications: impl IntoIterator<Item = &'a Classification>) -> RiskTier {
    classifications
        .into_iter()
        .map(|c| c.tier)
        .max()
        .unwrap_or(RiskTier::Safe)
}
