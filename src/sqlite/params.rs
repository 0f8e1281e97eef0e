use rusqlite::Statement;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqliteValue, ValueRef};

use crate::driver::{NamedValue, Rows, Value};
use crate::error::TxxError;

const NAME_PREFIXES: [char; 3] = [':', '@', '$'];

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqliteValue::Null),
            Value::Integer(v) => ToSqlOutput::Owned(SqliteValue::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Owned(SqliteValue::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

// TEXT that isn't valid UTF-8 comes back as a blob holding the original bytes.
pub(crate) fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::Text(text.to_owned()),
            Err(_) => Value::Blob(bytes.to_vec()),
        },
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

/// Bind every argument, by name when it has one, by ordinal otherwise.
///
/// Every placeholder must receive exactly one argument.
pub(crate) fn bind_args(stmt: &mut Statement<'_>, args: &[NamedValue]) -> Result<(), TxxError> {
    let expected = stmt.parameter_count();
    if expected != args.len() {
        return Err(TxxError::ExecutionError(format!(
            "sqlite: expected {expected} arguments, got {}",
            args.len()
        )));
    }
    let mut bound = vec![false; expected];
    for arg in args {
        let idx = match &arg.name {
            Some(name) => parameter_index(stmt, name)?,
            None => arg.ordinal,
        };
        match idx.checked_sub(1).and_then(|slot| bound.get_mut(slot)) {
            Some(seen) if !*seen => *seen = true,
            Some(_) => {
                return Err(TxxError::ExecutionError(format!(
                    "sqlite: parameter {idx} bound more than once"
                )));
            }
            None => {
                return Err(TxxError::ExecutionError(format!(
                    "sqlite: no parameter at position {idx}"
                )));
            }
        }
        stmt.raw_bind_parameter(idx, &arg.value)?;
    }
    Ok(())
}

// Names may come with or without their placeholder prefix.
fn parameter_index(stmt: &Statement<'_>, name: &str) -> Result<usize, TxxError> {
    if name.starts_with(NAME_PREFIXES) {
        if let Some(idx) = stmt.parameter_index(name)? {
            return Ok(idx);
        }
    } else {
        for prefix in NAME_PREFIXES {
            if let Some(idx) = stmt.parameter_index(&format!("{prefix}{name}"))? {
                return Ok(idx);
            }
        }
    }
    Err(TxxError::ExecutionError(format!(
        "sqlite: no parameter named {name:?}"
    )))
}

/// Step a bound statement to completion, collecting every row.
pub(crate) fn read_rows(stmt: &mut Statement<'_>) -> Result<Rows, TxxError> {
    let columns: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();
    let width = columns.len();

    let mut out = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            values.push(value_from_ref(row.get_ref(idx)?));
        }
        out.push(values);
    }
    Ok(Rows::new(columns, out))
}
