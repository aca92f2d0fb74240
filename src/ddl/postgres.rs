//! `PostgreSQL` DDL via `sea-query`

use super::{quote, quote_list};
use crate::operation::DiffOperation;
use crate::schema::{
    ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, LogicalType, ReferentialAction,
    TableDescriptor,
};
use sea_query::{
    ColumnDef, ForeignKey, ForeignKeyAction, ForeignKeyCreateStatement, Index,
    IndexCreateStatement, PostgresQueryBuilder, Table,
};

/// Statements that apply `op`, in order
#[must_use]
pub fn render(op: &DiffOperation) -> Vec<String> {
    match op {
        DiffOperation::CreateTable { table } => create_table(table),
        DiffOperation::DropTable { table } => {
            vec![Table::drop().table(table.name.clone()).build(PostgresQueryBuilder)]
        }
        DiffOperation::AddColumn { table, column } => vec![Table::alter()
            .table(table.clone())
            .add_column(column_def(column, true))
            .build(PostgresQueryBuilder)],
        DiffOperation::DropColumn { table, column } => vec![Table::alter()
            .table(table.clone())
            .drop_column(column.name.clone())
            .build(PostgresQueryBuilder)],
        DiffOperation::RenameColumn { table, from, to } => vec![Table::alter()
            .table(table.clone())
            .rename_column(from.clone(), to.clone())
            .build(PostgresQueryBuilder)],
        DiffOperation::AlterColumnType {
            table, column, to, ..
        } => vec![format!(
            "ALTER TABLE {} ALTER COLUMN {col} TYPE {to} USING {col}::{to}",
            quote(table),
            col = quote(column),
        )],
        DiffOperation::AlterColumnNullability {
            table,
            column,
            to_nullable,
            ..
        } => vec![format!(
            "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL",
            quote(table),
            quote(column),
            if *to_nullable { "DROP" } else { "SET" }
        )],
        DiffOperation::AddIndex { table, index } => {
            vec![create_index(table, index).build(PostgresQueryBuilder)]
        }
        DiffOperation::DropIndex { table, index } => vec![Index::drop()
            .name(index.name.clone())
            .table(table.clone())
            .build(PostgresQueryBuilder)],
        DiffOperation::AddForeignKey { table, foreign_key } => {
            vec![create_foreign_key(table, foreign_key).build(PostgresQueryBuilder)]
        }
        DiffOperation::DropForeignKey { table, foreign_key } => vec![ForeignKey::drop()
            .name(foreign_key.name.clone())
            .table(table.clone())
            .build(PostgresQueryBuilder)],
        DiffOperation::AddUniqueConstraint { table, constraint } => vec![format!(
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
            quote(table),
            quote(&constraint.name),
            quote_list(&constraint.columns)
        )],
        DiffOperation::DropUniqueConstraint { table, constraint } => vec![format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            quote(table),
            quote(&constraint.name)
        )],
    }
}

/// `CREATE TABLE` followed by one `CREATE INDEX` per plain index
#[must_use]
pub fn create_table(table: &TableDescriptor) -> Vec<String> {
    let primary_key = table.primary_key();
    let inline_pk = primary_key.len() == 1;

    let mut stmt = Table::create();
    stmt.table(table.name.clone());
    for column in table.columns_in_order() {
        stmt.col(column_def(column, inline_pk));
    }
    if primary_key.len() > 1 {
        let mut pk = Index::create();
        for column in &primary_key {
            pk.col(column.clone());
        }
        stmt.primary_key(&mut pk);
    }
    for constraint in &table.unique_constraints {
        let mut unique = Index::create();
        unique.name(constraint.name.clone()).unique();
        for column in &constraint.columns {
            unique.col(column.clone());
        }
        stmt.index(&mut unique);
    }
    for fk in &table.foreign_keys {
        stmt.foreign_key(&mut create_foreign_key(&table.name, fk));
    }

    let mut statements = vec![stmt.build(PostgresQueryBuilder)];
    statements.extend(
        table
            .indexes
            .iter()
            .map(|index| create_index(&table.name, index).build(PostgresQueryBuilder)),
    );
    statements
}

fn column_def(column: &ColumnDescriptor, inline_pk: bool) -> ColumnDef {
    let mut def = ColumnDef::new(column.name.clone());
    // one `extra` clause: the builder keeps only the last one set
    let mut extra = Vec::new();
    if column.auto_increment {
        def.big_integer();
        extra.push("GENERATED BY DEFAULT AS IDENTITY".to_string());
    } else {
        apply_type(&mut def, &column.logical_type);
    }
    if column.nullable {
        def.null();
    } else {
        def.not_null();
    }
    if inline_pk && column.primary_key {
        def.primary_key();
    }
    if let Some(default) = &column.default {
        extra.push(format!("DEFAULT {default}"));
    }
    if !extra.is_empty() {
        def.extra(extra.join(" "));
    }
    def
}

fn apply_type(def: &mut ColumnDef, logical_type: &LogicalType) {
    match logical_type {
        LogicalType::String { length: Some(n) } => {
            def.string_len(*n);
        }
        LogicalType::String { length: None } => {
            def.string();
        }
        LogicalType::Text => {
            def.text();
        }
        LogicalType::SmallInt => {
            def.small_integer();
        }
        LogicalType::Integer => {
            def.integer();
        }
        LogicalType::BigInt => {
            def.big_integer();
        }
        LogicalType::Bool => {
            def.boolean();
        }
        LogicalType::Float => {
            def.float();
        }
        LogicalType::Double => {
            def.double();
        }
        LogicalType::Decimal {
            precision: Some(p),
            scale: Some(s),
        } => {
            def.decimal_len(*p, *s);
        }
        LogicalType::Timestamp => {
            def.timestamp();
        }
        LogicalType::TimestampTz => {
            def.timestamp_with_time_zone();
        }
        LogicalType::Date => {
            def.date();
        }
        LogicalType::Json => {
            def.json();
        }
        LogicalType::JsonBinary => {
            def.json_binary();
        }
        LogicalType::Uuid => {
            def.uuid();
        }
        // numeric without a full precision, bytea and custom types use the catalog name
        LogicalType::Decimal { .. } | LogicalType::Binary | LogicalType::Custom { .. } => {
            def.custom(logical_type.to_string());
        }
    }
}

fn create_index(table: &str, index: &IndexDescriptor) -> IndexCreateStatement {
    let mut stmt = Index::create();
    stmt.name(index.name.clone()).table(table.to_string());
    if index.unique {
        stmt.unique();
    }
    for column in &index.columns {
        stmt.col(column.clone());
    }
    stmt
}

fn create_foreign_key(table: &str, fk: &ForeignKeyDescriptor) -> ForeignKeyCreateStatement {
    let mut stmt = ForeignKey::create();
    stmt.name(fk.name.clone())
        .from_tbl(table.to_string())
        .to_tbl(fk.referenced_table.clone())
        .on_delete(action(fk.on_delete));
    for column in &fk.columns {
        stmt.from_col(column.clone());
    }
    for column in &fk.referenced_columns {
        stmt.to_col(column.clone());
    }
    stmt
}

fn action(action: ReferentialAction) -> ForeignKeyAction {
    match action {
        ReferentialAction::NoAction => ForeignKeyAction::NoAction,
        ReferentialAction::Restrict => ForeignKeyAction::Restrict,
        ReferentialAction::Cascade => ForeignKeyAction::Cascade,
        ReferentialAction::SetNull => ForeignKeyAction::SetNull,
        ReferentialAction::SetDefault => ForeignKeyAction::SetDefault,
    }
}
