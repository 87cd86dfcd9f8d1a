use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use crate::access::array::RecordArray;
use crate::catalog::r#type::ScalarValue;
use crate::error::Result;
use crate::internal_err;
use crate::value_err;
use crate::sql::plan::schema::LogicalSchema;
use crate::sql::plan::schema::SchemaRef;

/// A fixed schema, fixed row count set of columns moving between operators.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    schema: SchemaRef,
    columns: Vec<RecordArray>,
    num_rows: usize,
}

impl RecordBatch {
    /// Every column must have the same length and there must be one column
    /// per schema field.
    pub fn try_new(schema: SchemaRef, columns: Vec<RecordArray>) -> Result<Self> {
        let num_rows = columns.first().map(|c| c.len()).unwrap_or(0);
        Self::try_new_with_rows(schema, columns, num_rows)
    }

    /// Like [`RecordBatch::try_new`] but allows rows without columns, e.g.
    /// the single row of `SELECT 1` before projection.
    pub fn try_new_with_rows(
        schema: SchemaRef,
        columns: Vec<RecordArray>,
        num_rows: usize,
    ) -> Result<Self> {
        if schema.len() != columns.len() {
            return Err(internal_err!(
                "Batch has {} columns but the schema {} has {} fields",
                columns.len(),
                schema,
                schema.len()
            ));
        }
        if let Some((i, c)) = columns.iter().enumerate().find(|(_, c)| c.len() != num_rows) {
            return Err(internal_err!(
                "Column {} has {} rows, expect {}",
                schema.column(i),
                c.len(),
                num_rows
            ));
        }
        Ok(Self { schema, columns, num_rows })
    }

    pub fn new_empty(schema: SchemaRef) -> Self {
        let columns = schema.fields().iter().map(|f| RecordArray::new(&f.datatype)).collect();
        Self { schema, columns, num_rows: 0 }
    }

    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    pub fn columns(&self) -> &[RecordArray] {
        &self.columns
    }

    pub fn column(&self, i: usize) -> &RecordArray {
        &self.columns[i]
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// The values of row `i`, one per column.
    pub fn row(&self, i: usize) -> Vec<ScalarValue> {
        self.columns.iter().map(|c| c.value(i)).collect()
    }

    /// The `len` rows starting at `offset`. Slicing past the last row is a
    /// value error.
    pub fn slice(&self, offset: usize, len: usize) -> Result<Self> {
        if offset.checked_add(len).map_or(true, |end| end > self.num_rows) {
            return Err(value_err!(
                "Slice of {} rows at offset {} out of range for {} rows",
                len,
                offset,
                self.num_rows
            ));
        }
        let columns = self.columns.iter().map(|c| c.slice(offset, len)).collect::<Result<Vec<_>>>()?;
        Ok(Self { schema: self.schema(), columns, num_rows: len })
    }

    pub fn filter(&self, mask: &[bool]) -> Result<Self> {
        let columns = self.columns.iter().map(|c| c.filter(mask)).collect::<Result<Vec<_>>>()?;
        let num_rows = mask.iter().filter(|m| **m).count();
        Self::try_new_with_rows(self.schema(), columns, num_rows)
    }

    pub fn take(&self, indices: &[Option<usize>]) -> Result<Self> {
        let columns = self.columns.iter().map(|c| c.take(indices)).collect::<Result<Vec<_>>>()?;
        Self::try_new_with_rows(self.schema(), columns, indices.len())
    }

    /// Keep the columns at `indices`.
    pub fn project(&self, indices: &[usize]) -> Result<Self> {
        let schema = Arc::new(self.schema.project(indices)?);
        let columns = indices.iter().map(|i| self.columns[*i].clone()).collect();
        Self::try_new_with_rows(schema, columns, self.num_rows)
    }

    /// The same data under another schema with the same shape.
    pub fn with_schema(self, schema: SchemaRef) -> Result<Self> {
        Self::try_new_with_rows(schema, self.columns, self.num_rows)
    }

    /// Concatenate batches sharing `schema` into a single one.
    pub fn concat(schema: SchemaRef, batches: &[RecordBatch]) -> Result<Self> {
        let mut columns = schema.fields().iter().map(|f| RecordArray::new(&f.datatype)).collect::<Vec<_>>();
        let mut num_rows = 0;
        for batch in batches {
            if batch.num_columns() != columns.len() {
                return Err(internal_err!(
                    "Can't concat a batch of {} columns into {} columns",
                    batch.num_columns(),
                    columns.len()
                ));
            }
            for (out, c) in columns.iter_mut().zip(batch.columns()) {
                out.append(c)?;
            }
            num_rows += batch.num_rows();
        }
        Self::try_new_with_rows(schema, columns, num_rows)
    }

    /// Build a batch from rows of values.
    pub fn from_rows(schema: SchemaRef, rows: &[Vec<ScalarValue>]) -> Result<Self> {
        let mut columns = schema.fields().iter().map(|f| RecordArray::new(&f.datatype)).collect::<Vec<_>>();
        for row in rows {
            if row.len() != columns.len() {
                return Err(internal_err!("Row has {} values, expect {}", row.len(), columns.len()));
            }
            for (c, v) in columns.iter_mut().zip(row) {
                c.push(v.clone())?;
            }
        }
        Self::try_new_with_rows(schema, columns, rows.len())
    }
}

impl Display for RecordBatch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.schema)?;
        for i in 0..self.num_rows {
            let row = self.row(i).iter().map(|v| v.to_string()).collect::<Vec<_>>();
            writeln!(f, "{}", row.join(", "))?;
        }
        Ok(())
    }
}

/// A schema without any columns, e.g. for `SELECT 1`.
pub fn empty_schema() -> SchemaRef {
    Arc::new(LogicalSchema::empty())
}
