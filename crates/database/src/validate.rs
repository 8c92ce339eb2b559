//! Frame validation against a table contract.
//!
//! 1. Every required column must be present (always fatal).
//! 2. Under strict mode, no column outside required ∪ nullable.
//! 3. Scalar columns whose Arrow type differs from the contract are cast; a value
//!    that does not survive the cast fails the whole frame.
//! 4. Nested columns only need a struct-like or list-like outer shape.
//!
//! Column order is not significant.

use crate::error::{IoError, Result};
use arrow::array::ArrayRef;
use arrow::compute::{can_cast_types, cast_with_options, CastOptions};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use lake_types::{DType, TableContract};
use std::sync::Arc;

/// Arrow type a scalar contract dtype is materialised as.
pub fn arrow_type_for(dtype: DType) -> Option<DataType> {
    match dtype {
        DType::I64 => Some(DataType::Int64),
        DType::F64 => Some(DataType::Float64),
        DType::Str => Some(DataType::Utf8),
        DType::Struct | DType::ListStruct => None,
    }
}

fn is_struct_like(dt: &DataType) -> bool {
    matches!(dt, DataType::Struct(_) | DataType::Map(_, _))
}

fn is_list_like(dt: &DataType) -> bool {
    matches!(
        dt,
        DataType::List(_) | DataType::LargeList(_) | DataType::FixedSizeList(_, _)
    )
}

/// Validate `batch` against `contract`, returning the (possibly cast) batch.
pub fn validate_frame(batch: &RecordBatch, contract: &TableContract, strict: bool) -> Result<RecordBatch> {
    let table = contract.name.as_str();
    let schema = batch.schema();

    let missing: Vec<&str> = contract
        .required
        .iter()
        .map(String::as_str)
        .filter(|c| schema.index_of(c).is_err())
        .collect();
    if !missing.is_empty() {
        return Err(IoError::schema(table, format!("missing required columns: {missing:?}")));
    }

    if strict {
        let known = contract.known_columns();
        let extras: Vec<&str> = schema
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .filter(|c| !known.contains(c))
            .collect();
        if !extras.is_empty() {
            return Err(IoError::schema(
                table,
                format!("unexpected columns present: {extras:?} (allowed={known:?})"),
            ));
        }
    }

    let mut fields: Vec<Arc<Field>> = Vec::with_capacity(schema.fields().len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());
    let mut changed = false;

    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        let Some(dtype) = contract.dtype_of(field.name()) else {
            // Only reachable in non-strict mode: carried through untouched.
            fields.push(field.clone());
            columns.push(column.clone());
            continue;
        };
        let actual = field.data_type();
        match arrow_type_for(dtype) {
            Some(expected) if actual != &expected => {
                let cast = safe_cast(table, field.name(), column, &expected)?;
                fields.push(Arc::new(field.as_ref().clone().with_data_type(expected)));
                columns.push(cast);
                changed = true;
            }
            Some(_) => {
                fields.push(field.clone());
                columns.push(column.clone());
            }
            None => {
                let ok = match dtype {
                    DType::Struct => is_struct_like(actual),
                    _ => is_list_like(actual),
                };
                if !ok {
                    let shape = if dtype == DType::Struct { "struct-like" } else { "list-like" };
                    return Err(IoError::schema(
                        table,
                        format!("column '{}' expected {shape} dtype; got {actual}", field.name()),
                    ));
                }
                fields.push(field.clone());
                columns.push(column.clone());
            }
        }
    }

    if !changed {
        return Ok(batch.clone());
    }
    let schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    RecordBatch::try_new(schema, columns)
        .map_err(|e| IoError::schema(table, "failed to rebuild frame after casting").with_source(e))
}

fn safe_cast(table: &str, column: &str, array: &ArrayRef, to: &DataType) -> Result<ArrayRef> {
    if !can_cast_types(array.data_type(), to) {
        return Err(IoError::schema(
            table,
            format!("column '{column}' of type {} cannot be cast to {to}", array.data_type()),
        ));
    }
    let opts = CastOptions {
        safe: false,
        ..Default::default()
    };
    cast_with_options(array, to, &opts).map_err(|e| {
        IoError::schema(table, format!("failed to cast column '{column}' to {to}")).with_source(e)
    })
}
