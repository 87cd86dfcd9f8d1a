use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::RwLock;

use crate::catalog::table::TableProvider;
use crate::error::Error;
use crate::error::Result;
use crate::parse_err;

/// The catalog keeps the tables a session can query. Table names are case
/// insensitive.
pub trait Catalog: Send + Sync {
    /// Register a table under its own name, returning the table it
    /// replaced, if any.
    fn register_table(&self, table: Arc<dyn TableProvider>) -> Result<Option<Arc<dyn TableProvider>>>;

    /// Remove a table, returning it if it was registered.
    fn deregister_table(&self, name: &str) -> Result<Option<Arc<dyn TableProvider>>>;

    /// Gets a table, if it exists
    fn get_table(&self, name: &str) -> Result<Option<Arc<dyn TableProvider>>>;

    /// Gets a table, and errors if it does not exist
    fn must_get_table(&self, name: &str) -> Result<Arc<dyn TableProvider>> {
        self.get_table(name)?.ok_or_else(|| parse_err!("Table {} does not exist", name))
    }

    /// The names of all registered tables, sorted.
    fn table_names(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    tables: RwLock<BTreeMap<String, Arc<dyn TableProvider>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::internal("Catalog lock poisoned")
}

impl Catalog for MemoryCatalog {
    fn register_table(&self, table: Arc<dyn TableProvider>) -> Result<Option<Arc<dyn TableProvider>>> {
        let name = table.name().to_lowercase();
        if name.is_empty() {
            return Err(parse_err!("Table name can't be empty"));
        }
        let mut tables = self.tables.write().map_err(poisoned)?;
        Ok(tables.insert(name, table))
    }

    fn deregister_table(&self, name: &str) -> Result<Option<Arc<dyn TableProvider>>> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        Ok(tables.remove(&name.to_lowercase()))
    }

    fn get_table(&self, name: &str) -> Result<Option<Arc<dyn TableProvider>>> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.get(&name.to_lowercase()).cloned())
    }

    fn table_names(&self) -> Result<Vec<String>> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::r#type::DataType;
    use crate::catalog::table::MemTable;
    use crate::sql::plan::schema::Field;
    use crate::sql::plan::schema::LogicalSchema;

    fn table(name: &str) -> Result<Arc<dyn TableProvider>> {
        let schema = Arc::new(LogicalSchema::from_unqualified_fields(
            vec![Field::new("a", DataType::Integer, false)].into(),
        )?);
        Ok(Arc::new(MemTable::try_new(name, schema, vec![])?))
    }

    #[test]
    fn test_register_lookup() -> Result<()> {
        let catalog = MemoryCatalog::new();
        assert!(catalog.register_table(table("Jobs")?)?.is_none());
        assert!(catalog.register_table(table("jobs")?)?.is_some());
        catalog.register_table(table("employees")?)?;

        assert!(catalog.get_table("JOBS")?.is_some());
        assert_eq!(vec!["employees".to_string(), "jobs".to_string()], catalog.table_names()?);
        assert!(matches!(catalog.must_get_table("nope"), Err(Error::Parse(_))));

        assert!(catalog.deregister_table("Jobs")?.is_some());
        assert!(catalog.get_table("jobs")?.is_none());
        Ok(())
    }
}
