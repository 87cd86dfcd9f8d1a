use std::collections::BTreeSet;
use std::collections::HashSet;
use std::fmt::Formatter;
use std::ops::Deref;
use std::sync::Arc;

use crate::catalog::r#type::DataType;
use crate::error::Error;
use crate::error::Result;
use crate::parse_err;

/// A logical named reference to a qualified field in a schema.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Column {
    /// relation/table reference as qualifier to specify the source of the
    /// field/column.
    pub relation: Option<TableReference>,
    /// field/column name.
    pub name: String,
}

impl Column {
    pub fn new(relation: Option<TableReference>, name: impl Into<String>) -> Self {
        Self { relation, name: name.into() }
    }

    pub fn new_unqualified(name: impl Into<String>) -> Self {
        Self { relation: None, name: name.into() }
    }

    /// `relation.name` when qualified, otherwise `name`.
    pub fn flat_name(&self) -> String {
        match &self.relation {
            Some(r) => format!("{}.{}", r, self.name),
            None => self.name.clone(),
        }
    }

    /// Resolve this column against ordered levels of schemas. The first
    /// level with exactly one match wins and its index is returned with the
    /// qualified column. Several matches inside one level are ambiguous,
    /// unless they all belong to the same USING join group, in which case the
    /// leftmost one is taken.
    pub fn resolve(
        self,
        levels: &[Vec<&LogicalSchema>],
        using_columns: &[HashSet<Column>],
    ) -> Result<(usize, Column)> {
        if self.relation.is_some() {
            for (i, level) in levels.iter().enumerate() {
                if level.iter().any(|s| s.has_column(&self)) {
                    return Ok((i, self));
                }
            }
            return Err(parse_err!("Column {} not found", self));
        }

        for (i, level) in levels.iter().enumerate() {
            let matches = level
                .iter()
                .flat_map(|s| s.columns_with_unqualified_name(&self.name))
                .collect::<Vec<_>>();
            match matches.len() {
                0 => continue,
                1 => return Ok((i, matches.into_iter().next().unwrap_or(self))),
                _ => {
                    let grouped = using_columns
                        .iter()
                        .any(|group| matches.iter().all(|c| group.contains(c)));
                    if grouped {
                        return Ok((i, matches.into_iter().next().unwrap_or(self)));
                    }
                    return Err(parse_err!(
                        "Ambiguous reference to unqualified column {}",
                        self.name
                    ));
                }
            }
        }
        Err(parse_err!("Column {} not found", self))
    }

    pub fn normalize_with_schemas(
        self,
        levels: &[Vec<&LogicalSchema>],
        using_columns: &[HashSet<Column>],
    ) -> Result<Column> {
        self.resolve(levels, using_columns).map(|(_, c)| c)
    }
}

impl From<&str> for Column {
    fn from(s: &str) -> Self {
        match s.split_once('.') {
            Some((relation, name)) => Column::new(Some(relation.into()), name),
            None => Column::new_unqualified(s),
        }
    }
}

impl std::fmt::Display for Column {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.flat_name())
    }
}

/// A name or alias used as a reference to a table.
#[derive(Clone, Debug, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct TableReference(Arc<str>);

impl TableReference {
    pub fn new(table: &str) -> TableReference {
        TableReference(Arc::from(table))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TableReference {
    fn from(s: &str) -> Self {
        TableReference::new(s)
    }
}

impl From<String> for TableReference {
    fn from(s: String) -> Self {
        TableReference(Arc::from(s))
    }
}

impl std::fmt::Display for TableReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference counted [`Field`]
pub type FieldRef = Arc<Field>;

/// Describes a single column in a [`LogicalSchema`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    pub datatype: DataType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, datatype: DataType, nullable: bool) -> Self {
        Self { name: name.into(), datatype, nullable }
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Fields(Arc<[FieldRef]>);

impl Fields {
    /// Returns a new empty [`Fields`]
    pub fn empty() -> Self {
        Self(Arc::new([]))
    }

    pub fn find(&self, name: &str) -> Option<(usize, &FieldRef)> {
        self.0.iter().enumerate().find(|(_, c)| c.name == name)
    }
}

impl FromIterator<Field> for Fields {
    fn from_iter<T: IntoIterator<Item = Field>>(iter: T) -> Self {
        iter.into_iter().map(Arc::new).collect()
    }
}

impl FromIterator<FieldRef> for Fields {
    fn from_iter<T: IntoIterator<Item = FieldRef>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<Field>> for Fields {
    fn from(value: Vec<Field>) -> Self {
        value.into_iter().collect()
    }
}

impl From<Vec<FieldRef>> for Fields {
    fn from(value: Vec<FieldRef>) -> Self {
        value.into_iter().collect()
    }
}

impl Deref for Fields {
    type Target = [FieldRef];

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

pub type SchemaRef = Arc<LogicalSchema>;

/// Logical schema at planner where each field have an optional table reference,
/// typically the table name or table alias, to tracks which table/relation each
/// field belongs to.
///
/// Physical operators address columns by position, so the field order of a
/// schema is significant and combining two schemas is a concatenation.
#[derive(Clone, Debug, PartialEq)]
pub struct LogicalSchema {
    /// A sequence of fields that describe the schema.
    fields: Fields,
    /// Optional qualifiers for each column in this schema to specify the source
    /// of each column. In the same order as the `fields`
    qualifiers: Vec<Option<TableReference>>,
}

impl LogicalSchema {
    pub fn empty() -> Self {
        Self { fields: Fields::empty(), qualifiers: vec![] }
    }

    pub fn new(fields: Fields, qualifiers: Vec<Option<TableReference>>) -> Result<Self> {
        if fields.len() != qualifiers.len() {
            return Err(Error::internal("Invalid fields and qualifiers size"));
        }
        let schema = LogicalSchema { fields, qualifiers };
        schema.check_names()?;
        Ok(schema)
    }

    pub fn from_unqualified_fields(fields: Fields) -> Result<Self> {
        let sz = fields.len();
        let schema = LogicalSchema { fields, qualifiers: vec![None; sz] };
        schema.check_names()?;
        Ok(schema)
    }

    /// All the fields qualified by the same relation, e.g. a table scan.
    pub fn try_from_qualified(relation: &TableReference, fields: Fields) -> Result<Self> {
        let sz = fields.len();
        let schema = LogicalSchema { fields, qualifiers: vec![Some(relation.clone()); sz] };
        schema.check_names()?;
        Ok(schema)
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn field(&self, index: usize) -> &FieldRef {
        &self.fields[index]
    }

    pub fn qualifier(&self, index: usize) -> Option<&TableReference> {
        self.qualifiers[index].as_ref()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Option<&TableReference>, &FieldRef)> {
        self.fields.iter().zip(self.qualifiers.iter()).map(|(f, q)| (q.as_ref(), f))
    }

    pub fn column(&self, index: usize) -> Column {
        Column::new(self.qualifiers[index].clone(), self.fields[index].name.clone())
    }

    pub fn columns(&self) -> Vec<Column> {
        (0..self.len()).map(|i| self.column(i)).collect()
    }

    pub fn datatypes(&self) -> Vec<DataType> {
        self.fields.iter().map(|f| f.datatype.clone()).collect()
    }

    /// Every column named `name` regardless of its qualifier.
    pub fn columns_with_unqualified_name(&self, name: &str) -> Vec<Column> {
        self.iter()
            .filter(|(_, f)| f.name == name)
            .map(|(q, f)| Column::new(q.cloned(), f.name.clone()))
            .collect()
    }

    /// Position of the column. A qualified column must match both the
    /// qualifier and the name, an unqualified one must match exactly one
    /// field by name.
    pub fn maybe_index_of_column(&self, column: &Column) -> Option<usize> {
        let mut matches = self
            .iter()
            .enumerate()
            .filter(|(_, (q, f))| {
                match (&column.relation, q) {
                    // The given qualifier and current checking column qualifier are both qualified,
                    // compare both qualifier and the column name.
                    (Some(q), Some(t)) => q.eq(*t) && f.name == column.name,
                    // The given qualifier is qualified but the current checking column qualifier
                    // is not qualified, consider it as a false.
                    (Some(_), None) => false,
                    // The given qualifier is not qualified, compare the column name only.
                    (None, Some(_)) | (None, None) => f.name == column.name,
                }
            })
            .map(|(idx, _)| idx);
        let first = matches.next();
        match matches.next() {
            Some(_) => None,
            None => first,
        }
    }

    pub fn index_of_column(&self, column: &Column) -> Result<usize> {
        if let Some(idx) = self.maybe_index_of_column(column) {
            return Ok(idx);
        }
        if column.relation.is_none() && self.columns_with_unqualified_name(&column.name).len() > 1 {
            return Err(parse_err!("Ambiguous reference to unqualified column {}", column.name));
        }
        Err(parse_err!("Column {} not found in {}", column, self))
    }

    pub fn has_column(&self, column: &Column) -> bool {
        self.maybe_index_of_column(column).is_some()
    }

    pub fn field_with_column(&self, column: &Column) -> Result<&FieldRef> {
        let idx = self.index_of_column(column)?;
        Ok(&self.fields[idx])
    }

    /// Modify this schema by appending the fields from the supplied schema, ignoring any
    /// duplicate fields.
    pub fn merge(&mut self, other: &LogicalSchema) {
        if other.fields.is_empty() {
            return;
        }

        let mut new_fields = Vec::new();
        let mut new_qualifiers = Vec::new();

        let self_fields: HashSet<(Option<&TableReference>, &FieldRef)> = self.iter().collect();
        let self_field_names =
            self.fields.iter().map(|it| it.name.as_str()).collect::<HashSet<_>>();
        for (q, f) in other.iter() {
            let dup = match q {
                None => self_field_names.contains(f.name.as_str()),
                Some(q) => self_fields.contains(&(Some(q), f)),
            };
            if dup {
                continue;
            }
            new_fields.push(Arc::clone(f));
            new_qualifiers.push(q.cloned());
        }

        let mut fields = self.fields.to_vec();
        fields.extend(new_fields);
        self.fields = fields.into();
        self.qualifiers.extend(new_qualifiers)
    }

    /// Create a new schema that contains the fields from this schema followed by the fields
    /// from the supplied schema. Duplicates are kept, the result is positional.
    pub fn join(&self, other: &LogicalSchema) -> Self {
        let mut fields = Vec::with_capacity(self.len() + other.len());
        let mut qualifiers = Vec::with_capacity(self.len() + other.len());

        fields.extend_from_slice(self.fields.as_ref());
        qualifiers.extend_from_slice(&self.qualifiers);

        fields.extend_from_slice(other.fields.as_ref());
        qualifiers.extend_from_slice(&other.qualifiers);

        Self { fields: fields.into(), qualifiers }
    }

    /// Keep only the fields at `indices`, in that order.
    pub fn project(&self, indices: &[usize]) -> Result<Self> {
        let mut fields = Vec::with_capacity(indices.len());
        let mut qualifiers = Vec::with_capacity(indices.len());
        for &i in indices {
            if i >= self.len() {
                return Err(Error::internal(format!(
                    "Projection index {} out of range for {} fields",
                    i,
                    self.len()
                )));
            }
            fields.push(Arc::clone(&self.fields[i]));
            qualifiers.push(self.qualifiers[i].clone());
        }
        Ok(Self { fields: fields.into(), qualifiers })
    }

    /// The same schema with every field nullable, used for the outer side
    /// of outer joins.
    pub fn to_nullable(&self) -> Self {
        let fields = self
            .fields
            .iter()
            .map(|f| Field::clone(f).with_nullable(true))
            .collect::<Fields>();
        Self { fields, qualifiers: self.qualifiers.clone() }
    }

    /// Re-qualify all the fields with `relation`.
    pub fn replace_qualifier(&self, relation: &TableReference) -> Result<Self> {
        Self::try_from_qualified(relation, self.fields.clone())
    }

    pub fn strip_qualifiers(&self) -> Result<Self> {
        Self::from_unqualified_fields(self.fields.clone())
    }

    fn check_names(&self) -> Result<()> {
        let mut qualified_names = BTreeSet::new();
        let mut unqualified_names = BTreeSet::new();
        for (c, q) in self.fields.iter().zip(&self.qualifiers) {
            if let Some(q) = q {
                if !qualified_names.insert((q, &c.name)) {
                    return Err(Error::parse(format!(
                        "Invalid schema, duplicate qualified column {}.{}",
                        q, &c.name
                    )));
                }
                continue;
            }
            if !unqualified_names.insert(&c.name) {
                return Err(Error::parse(format!(
                    "Invalid schema, duplicate unqualified column {}",
                    &c.name
                )));
            }
        }
        for (q, name) in qualified_names {
            if unqualified_names.contains(name) {
                return Err(Error::parse(format!(
                    "Invalid schema, ambiguous reference {}.{}",
                    q, name
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for LogicalSchema {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let fields = self
            .iter()
            .map(|(q, field)| {
                let nullable = if field.nullable { ";N" } else { "" };
                match q {
                    Some(q) => format!("{}.{}:{:?}{}", q, field.name, field.datatype, nullable),
                    None => format!("{}:{:?}{}", field.name, field.datatype, nullable),
                }
            })
            .collect::<Vec<_>>();
        write!(f, "[{}]", fields.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(relation: &str, names: &[&str]) -> LogicalSchema {
        let fields = names
            .iter()
            .map(|n| Field::new(*n, DataType::Integer, true))
            .collect::<Fields>();
        LogicalSchema::try_from_qualified(&relation.into(), fields).unwrap()
    }

    #[test]
    fn test_join_is_concatenation() {
        let a = schema("a", &["id", "name"]);
        let b = schema("b", &["id", "age", "city"]);
        let joined = a.join(&b);
        assert_eq!(a.len() + b.len(), joined.len());
        assert_eq!(Column::from("b.id"), joined.column(2));

        // joining a schema with itself keeps every field
        assert_eq!(4, a.join(&a).len());
    }

    #[test]
    fn test_index_of_column() -> Result<()> {
        let joined = schema("a", &["id", "name"]).join(&schema("b", &["id", "age"]));
        assert_eq!(3, joined.index_of_column(&Column::from("age"))?);
        assert_eq!(2, joined.index_of_column(&Column::from("b.id"))?);
        assert!(matches!(joined.index_of_column(&Column::from("id")), Err(Error::Parse(_))));
        assert!(joined.index_of_column(&Column::from("c.id")).is_err());
        Ok(())
    }

    #[test]
    fn test_duplicate_names() {
        let fields: Fields = vec![
            Field::new("x", DataType::Integer, true),
            Field::new("x", DataType::Utf8, true),
        ]
        .into();
        assert!(LogicalSchema::from_unqualified_fields(fields.clone()).is_err());
        let qualifiers = vec![Some("t1".into()), Some("t2".into())];
        assert!(LogicalSchema::new(fields, qualifiers).is_ok());
    }

    #[test]
    fn test_resolve_levels() -> Result<()> {
        let inner = schema("e2", &["salary", "department_id"]);
        let outer = schema("e1", &["employee_id", "department_id"]);
        let levels = vec![vec![&inner], vec![&outer]];

        let (level, col) = Column::from("employee_id").resolve(&levels, &[])?;
        assert_eq!(1, level);
        assert_eq!(Column::from("e1.employee_id"), col);

        // the nearest level wins over the outer one
        let (level, col) = Column::from("department_id").resolve(&levels, &[])?;
        assert_eq!(0, level);
        assert_eq!(Column::from("e2.department_id"), col);

        assert!(Column::from("missing").resolve(&levels, &[]).is_err());
        Ok(())
    }

    #[test]
    fn test_resolve_using_group() -> Result<()> {
        let t1 = schema("t1", &["name", "a"]);
        let t2 = schema("t2", &["name", "b"]);
        let levels = vec![vec![&t1, &t2]];
        assert!(Column::from("name").resolve(&levels, &[]).is_err());

        let group = HashSet::from([Column::from("t1.name"), Column::from("t2.name")]);
        let col = Column::from("name").normalize_with_schemas(&levels, &[group])?;
        assert_eq!(Column::from("t1.name"), col);
        Ok(())
    }
}
