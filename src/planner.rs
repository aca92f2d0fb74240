//! Migration planner.
//!
//! Orders classified operations into dependency-safe phases, rejects
//! conflicting operation sets, precomputes each operation's compensation and
//! computes the plan checksum.
//!
//! Phase order:
//!
//! 1. rename column
//! 2. drop foreign key
//! 3. drop index / drop unique constraint
//! 4. drop column
//! 5. drop table (dependents first)
//! 6. create table (referenced tables first)
//! 7. add column
//! 8. alter column type / nullability
//! 9. add unique constraint / add index
//! 10. add foreign key
//!
//! Foreign keys inside a cycle of dropped tables are dropped explicitly in
//! phase 2. Foreign keys inside a cycle of created tables are stripped from
//! the `CREATE TABLE` and added in phase 10.

use crate::diff::rename_column;
use crate::migration::checksum::{calculate_checksum, chain_checksum};
use crate::migration::SyncError;
use crate::operation::DiffOperation;
use crate::safety::{classify, overall_tier, Classification, ClassifiedOperation, RiskTier};
use crate::schema::{ForeignKeyDescriptor, SchemaSnapshot, TableDescriptor};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedOperation {
    pub operation: DiffOperation,
    pub tier: RiskTier,
    /// Why the operation is destructive; `None` for safe operations
    pub reason: Option<String>,
    /// Operation that undoes this one, run if a later step fails on a
    /// backend without transactional DDL
    pub compensation: DiffOperation,
}

impl PlannedOperation {
    fn new(operation: DiffOperation, classification: Classification) -> Self {
        let compensation = operation.reverse();
        let reason = classification.is_destructive().then_some(classification.reason);
        Self {
            operation,
            tier: classification.tier,
            reason,
            compensation,
        }
    }

    #[must_use]
    pub fn is_destructive(&self) -> bool {
        self.tier == RiskTier::Destructive
    }

    #[must_use]
    pub fn describe(&self) -> String {
        self.operation.describe()
    }
}

/// Ordered, checksummed set of operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    pub operations: Vec<PlannedOperation>,
    /// Ledger identity: `content_checksum`, chained to the last applied plan
    /// once [`MigrationPlan::chain_to`] has run
    pub checksum: String,
    /// SHA-256 of the algorithm version and the ordered operations
    pub content_checksum: String,
    /// Highest tier present
    pub risk: RiskTier,
}

impl MigrationPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn destructive_operations(&self) -> impl Iterator<Item = &PlannedOperation> {
        self.operations.iter().filter(|op| op.is_destructive())
    }

    /// One line per operation, in execution order
    #[must_use]
    pub fn descriptions(&self) -> Vec<String> {
        self.operations.iter().map(PlannedOperation::describe).collect()
    }

    /// Chain the checksum to the checksum of the last applied plan
    pub fn chain_to(&mut self, parent: Option<&str>) {
        self.checksum = chain_checksum(parent, &self.content_checksum);
    }

    /// Short label stored in the ledger
    #[must_use]
    pub fn label(&self) -> String {
        match self.operations.as_slice() {
            [] => "empty plan".to_string(),
            [only] => only.describe(),
            [first, rest @ ..] => format!("{} (+{} more)", first.describe(), rest.len()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Rename,
    DropForeignKey,
    DropIndex,
    DropColumn,
    DropTable,
    CreateTable,
    AddColumn,
    AlterColumn,
    AddIndex,
    AddForeignKey,
}

fn phase_of(op: &DiffOperation) -> Phase {
    match op {
        DiffOperation::RenameColumn { .. } => Phase::Rename,
        DiffOperation::DropForeignKey { .. } => Phase::DropForeignKey,
        DiffOperation::DropIndex { .. } | DiffOperation::DropUniqueConstraint { .. } => {
            Phase::DropIndex
        }
        DiffOperation::DropColumn { .. } => Phase::DropColumn,
        DiffOperation::DropTable { .. } => Phase::DropTable,
        DiffOperation::CreateTable { .. } => Phase::CreateTable,
        DiffOperation::AddColumn { .. } => Phase::AddColumn,
        DiffOperation::AlterColumnType { .. } | DiffOperation::AlterColumnNullability { .. } => {
            Phase::AlterColumn
        }
        DiffOperation::AddUniqueConstraint { .. } | DiffOperation::AddIndex { .. } => {
            Phase::AddIndex
        }
        DiffOperation::AddForeignKey { .. } => Phase::AddForeignKey,
    }
}

// Final tie-break when table and object name are equal
fn kind_rank(op: &DiffOperation) -> u8 {
    match op {
        DiffOperation::AlterColumnType { .. } => 0,
        DiffOperation::AlterColumnNullability { .. } => 1,
        DiffOperation::DropUniqueConstraint { .. } | DiffOperation::AddUniqueConstraint { .. } => 2,
        _ => 3,
    }
}

/// Order, validate and checksum a set of classified operations
///
/// `current` is the live snapshot before any rename override was applied.
///
/// # Errors
///
/// Returns `SyncError::Planning` listing every conflict found: duplicate
/// operations, a column both added and dropped, operations touching a
/// column another operation drops, repeated alterations of one column,
/// operations on tables or columns that will not exist, and foreign keys
/// whose target will not exist.
pub fn plan(
    classified: Vec<ClassifiedOperation>,
    current: &SchemaSnapshot,
) -> Result<MigrationPlan, SyncError> {
    let mut conflicts = find_conflicts(&classified);

    let mut phases: BTreeMap<Phase, Vec<ClassifiedOperation>> = BTreeMap::new();
    let mut dropped_tables = BTreeMap::new();
    let mut created_tables = BTreeMap::new();

    for item in classified {
        match item.operation {
            DiffOperation::DropTable { table } => {
                dropped_tables.insert(table.name.clone(), (table, item.classification));
            }
            DiffOperation::CreateTable { table } => {
                created_tables.insert(table.name.clone(), (table, item.classification));
            }
            operation => {
                let phase = phase_of(&operation);
                phases.entry(phase).or_default().push(ClassifiedOperation {
                    operation,
                    classification: item.classification,
                });
            }
        }
    }

    for ops in phases.values_mut() {
        ops.sort_by(|a, b| {
            let (a, b) = (&a.operation, &b.operation);
            a.table_name()
                .cmp(b.table_name())
                .then_with(|| a.object_name().cmp(b.object_name()))
                .then_with(|| kind_rank(a).cmp(&kind_rank(b)))
        });
    }

    // Dropped tables: dependents before the tables they reference
    let (drop_order, cyclic) = dependency_order(&dropped_tables, true);
    let mut cycle_drops = Vec::new();
    let mut drops = Vec::with_capacity(drop_order.len());
    for name in drop_order {
        let Some((mut table, classification)) = dropped_tables.remove(&name) else {
            continue;
        };
        for fk in strip_foreign_keys(&mut table, &cyclic) {
            let operation = DiffOperation::DropForeignKey {
                table: table.name.clone(),
                foreign_key: fk,
            };
            let classification = classify(&operation);
            cycle_drops.push(ClassifiedOperation {
                operation,
                classification,
            });
        }
        drops.push(ClassifiedOperation {
            operation: DiffOperation::DropTable { table },
            classification,
        });
    }

    // Created tables: referenced tables first
    let (create_order, cyclic) = dependency_order(&created_tables, false);
    let mut cycle_adds = Vec::new();
    let mut creates = Vec::with_capacity(create_order.len());
    for name in create_order {
        let Some((mut table, classification)) = created_tables.remove(&name) else {
            continue;
        };
        for fk in strip_foreign_keys(&mut table, &cyclic) {
            let operation = DiffOperation::AddForeignKey {
                table: table.name.clone(),
                foreign_key: fk,
            };
            let classification = classify(&operation);
            cycle_adds.push(ClassifiedOperation {
                operation,
                classification,
            });
        }
        creates.push(ClassifiedOperation {
            operation: DiffOperation::CreateTable { table },
            classification,
        });
    }

    let mut ordered = Vec::new();
    for phase in [
        Phase::Rename,
        Phase::DropForeignKey,
        Phase::DropIndex,
        Phase::DropColumn,
        Phase::DropTable,
        Phase::CreateTable,
        Phase::AddColumn,
        Phase::AlterColumn,
        Phase::AddIndex,
        Phase::AddForeignKey,
    ] {
        match phase {
            Phase::DropForeignKey => ordered.append(&mut cycle_drops),
            Phase::DropTable => ordered.append(&mut drops),
            Phase::CreateTable => ordered.append(&mut creates),
            _ => {}
        }
        if let Some(mut ops) = phases.remove(&phase) {
            ordered.append(&mut ops);
        }
        if phase == Phase::AddForeignKey {
            ordered.append(&mut cycle_adds);
        }
    }

    conflicts.extend(simulate(current, &ordered));
    if !conflicts.is_empty() {
        return Err(SyncError::Planning { conflicts });
    }

    let risk = overall_tier(ordered.iter().map(|c| &c.classification));
    let operations: Vec<PlannedOperation> = ordered
        .into_iter()
        .map(|c| PlannedOperation::new(c.operation, c.classification))
        .collect();
    let checksum = calculate_checksum(operations.iter().map(|p| &p.operation)).map_err(|e| {
        SyncError::Planning {
            conflicts: vec![format!("plan cannot be serialized for checksumming: {e}")],
        }
    })?;

    Ok(MigrationPlan {
        operations,
        content_checksum: checksum.clone(),
        checksum,
        risk,
    })
}

fn find_conflicts(classified: &[ClassifiedOperation]) -> Vec<String> {
    let ops: Vec<&DiffOperation> = classified.iter().map(|c| &c.operation).collect();
    let mut conflicts = Vec::new();

    for (i, op) in ops.iter().enumerate() {
        if ops[..i].contains(op) {
            conflicts.push(format!("duplicate operation: {op}"));
        }
    }

    let mut added = BTreeSet::new();
    let mut dropped = BTreeSet::new();
    for op in &ops {
        match op {
            DiffOperation::AddColumn { table, column } => {
                added.insert((table.as_str(), column.name.as_str()));
            }
            DiffOperation::DropColumn { table, column } => {
                dropped.insert((table.as_str(), column.name.as_str()));
            }
            _ => {}
        }
    }
    for (table, column) in added.intersection(&dropped) {
        conflicts.push(format!("column {table}.{column} is both added and dropped"));
    }

    let mut alterations: BTreeMap<(&str, &str, &str), usize> = BTreeMap::new();
    for op in &ops {
        let table = op.table_name();
        let touched: Vec<&str> = match op {
            DiffOperation::AlterColumnType { column, .. }
            | DiffOperation::AlterColumnNullability { column, .. } => {
                *alterations
                    .entry((table, column.as_str(), op.kind()))
                    .or_default() += 1;
                vec![column.as_str()]
            }
            DiffOperation::AddIndex { index, .. } => index.columns.iter().map(String::as_str).collect(),
            DiffOperation::AddForeignKey { foreign_key, .. } => {
                foreign_key.columns.iter().map(String::as_str).collect()
            }
            DiffOperation::AddUniqueConstraint { constraint, .. } => {
                constraint.columns.iter().map(String::as_str).collect()
            }
            DiffOperation::RenameColumn { from, to, .. } => vec![from.as_str(), to.as_str()],
            _ => Vec::new(),
        };
        for column in touched {
            if dropped.contains(&(table, column)) {
                conflicts.push(format!("{op} touches column {table}.{column}, which is dropped"));
            }
        }
    }
    for ((table, column, kind), count) in alterations {
        if count > 1 {
            conflicts.push(format!("{kind} on {table}.{column} appears {count} times"));
        }
    }

    conflicts
}

/// Order of `tables` by foreign-key dependency, ties by name, plus the
/// foreign keys that close a cycle among them
///
/// With `dependents_first` a table comes before every table it references
/// (drop order); otherwise after them (creation order).
fn dependency_order<T>(
    tables: &BTreeMap<String, (TableDescriptor, T)>,
    dependents_first: bool,
) -> (Vec<String>, BTreeSet<(String, String)>) {
    let edges: BTreeMap<&str, BTreeSet<&str>> = tables
        .iter()
        .map(|(name, (table, _))| {
            let refs = table
                .referenced_tables()
                .into_iter()
                .filter(|r| tables.contains_key(*r))
                .collect();
            (name.as_str(), refs)
        })
        .collect();

    let component = strongly_connected(&edges);

    // Foreign keys between two tables of one component are cyclic
    let mut cyclic = BTreeSet::new();
    for (name, (table, _)) in tables {
        for fk in &table.foreign_keys {
            let target = fk.referenced_table.as_str();
            if target != name && component.get(name.as_str()) == component.get(target) {
                cyclic.insert((name.clone(), fk.name.clone()));
            }
        }
    }

    // Kahn's algorithm over the acyclic remainder
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut successors: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (&name, refs) in &edges {
        in_degree.entry(name).or_default();
        for &target in refs {
            if component.get(name) == component.get(target) {
                continue;
            }
            let (before, after) = if dependents_first {
                (name, target)
            } else {
                (target, name)
            };
            *in_degree.entry(after).or_default() += 1;
            successors.entry(before).or_default().push(after);
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(tables.len());
    while let Some(name) = ready.pop_first() {
        order.push(name.to_string());
        for &next in successors.get(name).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(next);
                }
            }
        }
    }

    (order, cyclic)
}

/// Tarjan's algorithm; maps each node to its component id
fn strongly_connected<'a>(edges: &BTreeMap<&'a str, BTreeSet<&'a str>>) -> BTreeMap<&'a str, usize> {
    struct State<'a> {
        next_index: usize,
        index: BTreeMap<&'a str, usize>,
        low: BTreeMap<&'a str, usize>,
        stack: Vec<&'a str>,
        on_stack: BTreeSet<&'a str>,
        component: BTreeMap<&'a str, usize>,
        next_component: usize,
    }

    fn visit<'a>(node: &'a str, edges: &BTreeMap<&'a str, BTreeSet<&'a str>>, s: &mut State<'a>) {
        s.index.insert(node, s.next_index);
        s.low.insert(node, s.next_index);
        s.next_index += 1;
        s.stack.push(node);
        s.on_stack.insert(node);

        for &next in edges.get(node).into_iter().flatten() {
            if !s.index.contains_key(next) {
                visit(next, edges, s);
                let low = s.low[node].min(s.low[next]);
                s.low.insert(node, low);
            } else if s.on_stack.contains(next) {
                let low = s.low[node].min(s.index[next]);
                s.low.insert(node, low);
            }
        }

        if s.low[node] == s.index[node] {
            while let Some(member) = s.stack.pop() {
                s.on_stack.remove(member);
                s.component.insert(member, s.next_component);
                if member == node {
                    break;
                }
            }
            s.next_component += 1;
        }
    }

    let mut state = State {
        next_index: 0,
        index: BTreeMap::new(),
        low: BTreeMap::new(),
        stack: Vec::new(),
        on_stack: BTreeSet::new(),
        component: BTreeMap::new(),
        next_component: 0,
    };
    for &node in edges.keys() {
        if !state.index.contains_key(node) {
            visit(node, edges, &mut state);
        }
    }
    state.component
}

fn strip_foreign_keys(
    table: &mut TableDescriptor,
    cyclic: &BTreeSet<(String, String)>,
) -> Vec<ForeignKeyDescriptor> {
    let (stripped, kept): (BTreeSet<_>, BTreeSet<_>) = std::mem::take(&mut table.foreign_keys)
        .into_iter()
        .partition(|fk| cyclic.contains(&(table.name.clone(), fk.name.clone())));
    table.foreign_keys = kept;
    stripped.into_iter().collect()
}

/// Apply the ordered operations to a copy of the live snapshot and report
/// every operation that would hit a missing or existing object
fn simulate(current: &SchemaSnapshot, ordered: &[ClassifiedOperation]) -> Vec<String> {
    let mut tables: BTreeMap<String, TableDescriptor> = current
        .tables()
        .map(|t| (t.name.clone(), t.clone()))
        .collect();
    let mut conflicts = Vec::new();
    let mut touched = BTreeSet::new();

    for ClassifiedOperation { operation: op, .. } in ordered {
        touched.insert(op.table_name().to_string());
        if let Err(conflict) = apply_to(&mut tables, op) {
            conflicts.push(format!("{op}: {conflict}"));
        }
    }

    for table in tables.values() {
        for fk in &table.foreign_keys {
            if !touched.contains(&table.name) && !touched.contains(&fk.referenced_table) {
                continue;
            }
            match tables.get(&fk.referenced_table) {
                None => conflicts.push(format!(
                    "foreign key {} on '{}' references table '{}', which will not exist",
                    fk.name, table.name, fk.referenced_table
                )),
                Some(target) => {
                    for column in &fk.referenced_columns {
                        if !target.has_column(column) {
                            conflicts.push(format!(
                                "foreign key {} on '{}' references column {}.{}, which will not exist",
                                fk.name, table.name, fk.referenced_table, column
                            ));
                        }
                    }
                }
            }
        }
    }

    conflicts
}

fn apply_to(tables: &mut BTreeMap<String, TableDescriptor>, op: &DiffOperation) -> Result<(), String> {
    let name = op.table_name();

    match op {
        DiffOperation::CreateTable { table } => {
            if tables.contains_key(name) {
                return Err("table already exists".to_string());
            }
            tables.insert(name.to_string(), table.clone());
            return Ok(());
        }
        DiffOperation::DropTable { .. } => {
            return match tables.remove(name) {
                Some(_) => Ok(()),
                None => Err("table does not exist".to_string()),
            };
        }
        DiffOperation::RenameColumn { from, to, .. } => {
            let table = tables.get(name).ok_or("table does not exist")?;
            if !table.has_column(from) {
                return Err(format!("column '{from}' does not exist"));
            }
            if table.has_column(to) {
                return Err(format!("column '{to}' already exists"));
            }
            let snapshot: SchemaSnapshot = tables.values().cloned().collect();
            *tables = rename_column(&snapshot, name, from, to)
                .tables()
                .map(|t| (t.name.clone(), t.clone()))
                .collect();
            return Ok(());
        }
        _ => {}
    }

    let table = tables.get_mut(name).ok_or("table does not exist")?;
    let require_columns = |table: &TableDescriptor, columns: &[String]| -> Result<(), String> {
        match columns.iter().find(|c| !table.has_column(c)) {
            Some(missing) => Err(format!("column '{missing}' does not exist")),
            None => Ok(()),
        }
    };

    match op {
        DiffOperation::AddColumn { column, .. } => {
            if table.has_column(&column.name) {
                return Err(format!("column '{}' already exists", column.name));
            }
            let column = column.clone().ordinal(table.next_ordinal());
            table.columns.insert(column.name.clone(), column);
        }
        DiffOperation::DropColumn { column, .. } => {
            if table.columns.remove(&column.name).is_none() {
                return Err(format!("column '{}' does not exist", column.name));
            }
        }
        DiffOperation::AlterColumnType { column, to, .. } => {
            let live = table
                .columns
                .get_mut(column)
                .ok_or_else(|| format!("column '{column}' does not exist"))?;
            live.logical_type = to.clone();
        }
        DiffOperation::AlterColumnNullability {
            column,
            to_nullable,
            ..
        } => {
            let live = table
                .columns
                .get_mut(column)
                .ok_or_else(|| format!("column '{column}' does not exist"))?;
            live.nullable = *to_nullable;
        }
        DiffOperation::AddIndex { index, .. } => {
            require_columns(table, &index.columns)?;
            if table.indexes.iter().any(|i| i.name == index.name) {
                return Err(format!("index '{}' already exists", index.name));
            }
            table.indexes.insert(index.clone());
        }
        DiffOperation::DropIndex { index, .. } => {
            if !table.indexes.remove(index) {
                return Err(format!("index '{}' does not exist", index.name));
            }
        }
        DiffOperation::AddForeignKey { foreign_key, .. } => {
            require_columns(table, &foreign_key.columns)?;
            if table.foreign_keys.iter().any(|fk| fk.name == foreign_key.name) {
                return Err(format!("foreign key '{}' already exists", foreign_key.name));
            }
            table.foreign_keys.insert(foreign_key.clone());
        }
        DiffOperation::DropForeignKey { foreign_key, .. } => {
            if !table.foreign_keys.remove(foreign_key) {
                return Err(format!("foreign key '{}' does not exist", foreign_key.name));
            }
        }
        DiffOperation::AddUniqueConstraint { constraint, .. } => {
            require_columns(table, &constraint.columns)?;
            if !table.unique_constraints.insert(constraint.clone()) {
                return Err("an identical unique constraint already exists".to_string());
            }
        }
        DiffOperation::DropUniqueConstraint { constraint, .. } => {
            if !table.unique_constraints.remove(constraint) {
                return Err(format!("unique constraint '{}' does not exist", constraint.name));
            }
        }
        DiffOperation::CreateTable { .. }
        | DiffOperation::DropTable { .. }
        | DiffOperation::RenameColumn { .. } => {}
    }
    Ok(())
}
