use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use crate::access::batch::RecordBatch;
use crate::catalog::r#type::ScalarValue;
use crate::error::Result;
use crate::sql::execution::compiler::ExecutionPlan;
use crate::sql::plan::schema::LogicalSchema;
use crate::sql::plan::visitor::TreeNode;
use crate::sql::plan::visitor::TreeNodeVisitor;
use crate::sql::plan::visitor::VisitRecursion;

/// Wraps an `ExecutionPlan` for formatting, one operator per line with the
/// inputs indented by two spaces.
pub struct DisplayableExecutionPlan<'a> {
    inner: &'a Arc<dyn ExecutionPlan>,
}

impl<'a> DisplayableExecutionPlan<'a> {
    pub fn new(inner: &'a Arc<dyn ExecutionPlan>) -> Self {
        Self { inner }
    }

    pub fn lines(&self) -> Vec<String> {
        self.to_string().lines().map(|l| l.to_string()).collect()
    }
}

impl<'a> Display for DisplayableExecutionPlan<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut visitor = IndentVisitor::new(f);
        match self.inner.visit(&mut visitor) {
            Ok(_) => Ok(()),
            Err(_) => Err(std::fmt::Error),
        }
    }
}

struct IndentVisitor<'a, 'b> {
    f: &'a mut Formatter<'b>,
    /// The current indent
    indent: usize,
}

impl<'a, 'b> IndentVisitor<'a, 'b> {
    pub fn new(f: &'a mut Formatter<'b>) -> Self {
        Self { f, indent: 0 }
    }
}

impl<'a, 'b, 'n> TreeNodeVisitor<'n> for IndentVisitor<'a, 'b> {
    type Node = Arc<dyn ExecutionPlan>;

    fn f_down(&mut self, node: &'n Self::Node) -> Result<VisitRecursion> {
        if self.indent > 0 {
            writeln!(self.f)?;
        }
        write!(self.f, "{:indent$}", "", indent = self.indent * 2)?;
        write!(self.f, "{}", node)?;

        self.indent += 1;
        Ok(VisitRecursion::Continue)
    }

    fn f_up(&mut self, _node: &'n Self::Node) -> Result<VisitRecursion> {
        self.indent -= 1;
        Ok(VisitRecursion::Continue)
    }
}

/// Renders result batches as a bordered text table.
pub struct TabularDisplay<'a, 'b> {
    schema: &'a LogicalSchema,
    batches: &'b [RecordBatch],
}

impl<'a, 'b> TabularDisplay<'a, 'b> {
    pub fn new(schema: &'a LogicalSchema, batches: &'b [RecordBatch]) -> Self {
        Self { schema, batches }
    }
}

/// Text cells are shown raw, one line per line of text.
fn cell_lines(value: &ScalarValue) -> Vec<String> {
    match value {
        ScalarValue::Utf8(s) if s.is_empty() => vec![String::new()],
        ScalarValue::Utf8(s) => s.lines().map(|line| line.to_string()).collect(),
        _ => vec![value.to_string()],
    }
}

impl<'a, 'b> Display for TabularDisplay<'a, 'b> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.batches.iter().all(|b| b.is_empty()) {
            return writeln!(f, "Empty result set");
        }
        let fields = self.schema.fields();

        let mut widths = fields.iter().map(|field| field.name.len()).collect::<Vec<_>>();
        let mut rows: Vec<Vec<Vec<String>>> = Vec::new();
        for batch in self.batches {
            for i in 0..batch.num_rows() {
                let row = batch.row(i).iter().map(cell_lines).collect::<Vec<_>>();
                for (c, lines) in row.iter().enumerate() {
                    let longest = lines.iter().map(|line| line.len()).max().unwrap_or(0);
                    if let Some(w) = widths.get_mut(c) {
                        *w = (*w).max(longest);
                    }
                }
                rows.push(row);
            }
        }

        let print_border = |f: &mut Formatter<'_>| -> std::fmt::Result {
            write!(f, "+")?;
            for width in &widths {
                write!(f, "{:-<width$}+", "", width = width + 2)?;
            }
            writeln!(f)
        };

        print_border(f)?;
        write!(f, "|")?;
        for (i, field) in fields.iter().enumerate() {
            write!(f, " {:width$} |", field.name, width = widths[i])?;
        }
        writeln!(f)?;
        print_border(f)?;

        for row in &rows {
            let height = row.iter().map(|lines| lines.len()).max().unwrap_or(1).max(1);
            for line_idx in 0..height {
                write!(f, "|")?;
                for (c, lines) in row.iter().enumerate() {
                    let line = lines.get(line_idx).map(|s| s.as_str()).unwrap_or("");
                    write!(f, " {:width$} |", line, width = widths[c])?;
                }
                writeln!(f)?;
            }
        }
        print_border(f)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::r#type::DataType;
    use crate::sql::plan::schema::Field;

    #[test]
    fn test_tabular_display() -> Result<()> {
        let schema = Arc::new(LogicalSchema::from_unqualified_fields(
            vec![Field::new("id", DataType::Integer, false), Field::new("name", DataType::Utf8, true)].into(),
        )?);
        let rows = vec![
            vec![ScalarValue::Int64(1), ScalarValue::from("Alice")],
            vec![ScalarValue::Int64(22), ScalarValue::Null],
        ];
        let batch = RecordBatch::from_rows(schema.clone(), &rows)?;

        let expected = "\
+----+-------+
| id | name  |
+----+-------+
| 1  | Alice |
| 22 | NULL  |
+----+-------+
";
        assert_eq!(expected, TabularDisplay::new(&schema, &[batch]).to_string());

        let empty = RecordBatch::new_empty(schema.clone());
        assert_eq!("Empty result set\n", TabularDisplay::new(&schema, &[empty]).to_string());
        assert_eq!("Empty result set\n", TabularDisplay::new(&schema, &[]).to_string());
        Ok(())
    }
}
