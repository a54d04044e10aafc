//! Row-level SQL primitives over entity tables.
//!
//! # Invariants
//! - Identifiers are always quoted through [`quote_ident`].
//! - Reads reject persisted state that does not fit the model.

use super::{RowKey, StoreError, StoreResult};
use crate::model::{AttributeType, Column, ColumnKind, Model, Value};
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, Row, ToSql};
use std::collections::HashMap;

pub(crate) const PK_COLUMN: &str = "_pk";
pub(crate) const ENTITY_COLUMN: &str = "_ent";
pub(crate) const METADATA_TABLE: &str = "_safestore_metadata";

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(SqlValue::Null),
            Self::Boolean(value) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*value))),
            Self::Integer(value) => ToSqlOutput::Owned(SqlValue::Integer(*value)),
            Self::Double(value) => ToSqlOutput::Owned(SqlValue::Real(*value)),
            Self::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
            Self::Binary(value) => ToSqlOutput::Borrowed(ValueRef::Blob(value.as_slice())),
        })
    }
}

/// Column values written for one row.
#[derive(Debug, Clone, Default)]
pub(crate) struct RowWrite {
    pub attributes: Vec<(String, Value)>,
    pub relations: Vec<(String, Option<i64>)>,
}

impl RowWrite {
    fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.relations.is_empty()
    }

    fn columns(&self) -> Vec<String> {
        self.attributes
            .iter()
            .map(|(name, _)| quote_ident(name))
            .chain(self.relations.iter().map(|(name, _)| quote_ident(name)))
            .collect()
    }

    fn values(&self) -> Vec<Value> {
        self.attributes
            .iter()
            .map(|(_, value)| value.clone())
            .chain(
                self.relations
                    .iter()
                    .map(|(_, target)| target.map_or(Value::Null, Value::Integer)),
            )
            .collect()
    }
}

/// One persisted row as seen through the model.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RowData {
    pub key: RowKey,
    pub entity: String,
    pub attributes: HashMap<String, Value>,
    pub relations: HashMap<String, Option<RowKey>>,
}

/// Query over one hierarchy table.
#[derive(Debug, Clone, Default)]
pub(crate) struct RowQuery<'a> {
    pub entities: Vec<&'a str>,
    pub filter: Option<(String, Vec<Value>)>,
    pub order: String,
    pub limit: Option<usize>,
    pub offset: usize,
}

pub(crate) fn max_pk(conn: &Connection, root: &str) -> StoreResult<i64> {
    let sql = format!(
        "SELECT COALESCE(MAX({}), 0) FROM {};",
        quote_ident(PK_COLUMN),
        quote_ident(root)
    );
    Ok(conn.query_row(&sql, [], |row| row.get::<_, i64>(0))?)
}

pub(crate) fn insert_row(
    conn: &Connection,
    root: &str,
    pk: i64,
    entity: &str,
    write: &RowWrite,
) -> StoreResult<()> {
    let mut columns = vec![quote_ident(PK_COLUMN), quote_ident(ENTITY_COLUMN)];
    columns.extend(write.columns());
    let mut values = vec![Value::Integer(pk), Value::Text(entity.to_string())];
    values.extend(write.values());

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({});",
        quote_ident(root),
        columns.join(", "),
        placeholders(values.len())
    );
    conn.execute(&sql, params_from_iter(values.iter()))?;
    Ok(())
}

pub(crate) fn update_row(conn: &Connection, key: &RowKey, write: &RowWrite) -> StoreResult<()> {
    if write.is_empty() {
        return Ok(());
    }
    let assignments = write
        .columns()
        .into_iter()
        .map(|column| format!("{column} = ?"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut values = write.values();
    values.push(Value::Integer(key.pk));

    let sql = format!(
        "UPDATE {} SET {assignments} WHERE {} = ?;",
        quote_ident(&key.root),
        quote_ident(PK_COLUMN)
    );
    let changed = conn.execute(&sql, params_from_iter(values.iter()))?;
    if changed == 0 {
        return Err(StoreError::InvalidData(format!(
            "row {} of `{}` no longer exists",
            key.pk, key.root
        )));
    }
    Ok(())
}

/// Deletes one row after clearing every foreign key that points at it.
pub(crate) fn delete_row(conn: &Connection, model: &Model, key: &RowKey) -> StoreResult<()> {
    nullify_inbound(conn, model, &key.root, "?", &[Value::Integer(key.pk)])?;
    let sql = format!(
        "DELETE FROM {} WHERE {} = ?;",
        quote_ident(&key.root),
        quote_ident(PK_COLUMN)
    );
    conn.execute(&sql, [key.pk])?;
    Ok(())
}

/// Clears foreign keys into `root` whose target is selected by `selector`.
///
/// `selector` is either a single placeholder or a sub-select of `_pk` values.
fn nullify_inbound(
    conn: &Connection,
    model: &Model,
    root: &str,
    selector: &str,
    params: &[Value],
) -> StoreResult<usize> {
    let mut cleared = 0;
    for reference in model.inbound_references(root) {
        let column = quote_ident(&reference.column);
        let sql = format!(
            "UPDATE {table} SET {column} = NULL WHERE {column} IN ({selector}) AND {ent} IN ({owners});",
            table = quote_ident(&reference.table),
            ent = quote_ident(ENTITY_COLUMN),
            owners = placeholders(reference.owners.len()),
        );
        let values = params
            .iter()
            .cloned()
            .chain(reference.owners.iter().map(|owner| Value::Text(owner.clone())));
        cleared += conn.execute(&sql, params_from_iter(values))?;
    }
    Ok(cleared)
}

/// Deletes matching rows and returns their keys and entity names.
pub(crate) fn batch_delete(
    conn: &Connection,
    model: &Model,
    root: &str,
    query: &RowQuery<'_>,
) -> StoreResult<Vec<(i64, String)>> {
    let (condition, params) = where_clause(query);
    let selector = format!(
        "SELECT {} FROM {} WHERE {condition}",
        quote_ident(PK_COLUMN),
        quote_ident(root)
    );
    nullify_inbound(conn, model, root, &selector, &params)?;

    let sql = format!(
        "DELETE FROM {} WHERE {condition} RETURNING {}, {};",
        quote_ident(root),
        quote_ident(PK_COLUMN),
        quote_ident(ENTITY_COLUMN)
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut deleted = Vec::new();
    while let Some(row) = rows.next()? {
        deleted.push((row.get::<_, i64>(0)?, row.get::<_, String>(1)?));
    }
    Ok(deleted)
}

pub(crate) fn select_rows(
    conn: &Connection,
    model: &Model,
    root: &str,
    query: &RowQuery<'_>,
) -> StoreResult<Vec<RowData>> {
    let columns = model.table_columns(root);
    let (condition, mut params) = where_clause(query);
    let tie_break = format!("{} ASC", quote_ident(PK_COLUMN));
    let order = if query.order.is_empty() {
        format!(" ORDER BY {tie_break}")
    } else {
        format!("{}, {tie_break}", query.order)
    };
    params.push(Value::Integer(
        query
            .limit
            .map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX)),
    ));
    params.push(Value::Integer(
        i64::try_from(query.offset).unwrap_or(i64::MAX),
    ));

    let sql = format!(
        "SELECT {} FROM {} WHERE {condition}{order} LIMIT ? OFFSET ?;",
        select_list(&columns),
        quote_ident(root)
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(parse_row(row, model, root, &columns)?);
    }
    Ok(out)
}

pub(crate) fn load_row(conn: &Connection, model: &Model, key: &RowKey) -> StoreResult<Option<RowData>> {
    let columns = model.table_columns(&key.root);
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ?;",
        select_list(&columns),
        quote_ident(&key.root),
        quote_ident(PK_COLUMN)
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([key.pk])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_row(row, model, &key.root, &columns)?));
    }
    Ok(None)
}

fn where_clause(query: &RowQuery<'_>) -> (String, Vec<Value>) {
    let mut params: Vec<Value> = query
        .entities
        .iter()
        .map(|entity| Value::Text((*entity).to_string()))
        .collect();
    let mut condition = format!(
        "{} IN ({})",
        quote_ident(ENTITY_COLUMN),
        placeholders(query.entities.len())
    );
    if let Some((filter, values)) = &query.filter {
        condition.push_str(&format!(" AND ({filter})"));
        params.extend(values.iter().cloned());
    }
    (condition, params)
}

fn select_list(columns: &[Column]) -> String {
    let mut names = vec![quote_ident(PK_COLUMN), quote_ident(ENTITY_COLUMN)];
    names.extend(columns.iter().map(|column| quote_ident(&column.name)));
    names.join(", ")
}

fn placeholders(count: usize) -> String {
    if count == 0 {
        return "NULL".to_string();
    }
    vec!["?"; count].join(", ")
}

fn parse_row(row: &Row<'_>, model: &Model, root: &str, columns: &[Column]) -> StoreResult<RowData> {
    let pk: i64 = row.get(0)?;
    let entity: String = row.get(1)?;
    if model.root_name(&entity) != Some(root) {
        return Err(StoreError::InvalidData(format!(
            "row {pk} of `{root}` has unknown entity `{entity}`"
        )));
    }

    let mut attributes = HashMap::new();
    let mut relations = HashMap::new();
    for (index, column) in columns.iter().enumerate() {
        let raw = row.get_ref(index + 2)?;
        match &column.kind {
            ColumnKind::Attribute(kind) => {
                if model.attribute(&entity, &column.name).is_some() {
                    attributes.insert(column.name.clone(), column_value(raw, *kind)?);
                }
            }
            ColumnKind::Relationship => {
                let Some(relationship) = model.relationship(&entity, &column.name) else {
                    continue;
                };
                let target_root = model.root_name(&relationship.destination).ok_or_else(|| {
                    StoreError::InvalidData(format!(
                        "relationship `{}` has no destination table",
                        relationship.name
                    ))
                })?;
                let target = match raw {
                    ValueRef::Null => None,
                    ValueRef::Integer(fk) => Some(RowKey::new(target_root, fk)),
                    other => {
                        return Err(StoreError::InvalidData(format!(
                            "foreign key `{}` of row {pk} is {:?}",
                            column.name,
                            other.data_type()
                        )))
                    }
                };
                relations.insert(column.name.clone(), target);
            }
        }
    }

    Ok(RowData {
        key: RowKey::new(root, pk),
        entity,
        attributes,
        relations,
    })
}

fn column_value(raw: ValueRef<'_>, kind: AttributeType) -> StoreResult<Value> {
    Ok(match (raw, kind) {
        (ValueRef::Null, _) => Value::Null,
        (ValueRef::Integer(value), AttributeType::Boolean) => Value::Boolean(value != 0),
        (ValueRef::Integer(value), AttributeType::Double) => Value::Double(value as f64),
        (ValueRef::Integer(value), _) => Value::Integer(value),
        (ValueRef::Real(value), _) => Value::Double(value),
        (ValueRef::Text(bytes), _) => Value::Text(
            std::str::from_utf8(bytes)
                .map_err(|err| StoreError::InvalidData(format!("text column is not utf-8: {err}")))?
                .to_string(),
        ),
        (ValueRef::Blob(bytes), _) => Value::Binary(bytes.to_vec()),
    })
}
