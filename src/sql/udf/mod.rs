use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;

use crate::sql::udf::aggregate::builtin_aggregates;
use crate::sql::udf::aggregate::AggregateUDF;
use crate::sql::udf::scalar::abs;
use crate::sql::udf::scalar::coalesce;
use crate::sql::udf::scalar::length;
use crate::sql::udf::scalar::lower;
use crate::sql::udf::scalar::upper;
use crate::sql::udf::scalar::ScalarUDF;

pub mod aggregate;
pub mod scalar;
pub mod signature;

/// User defined functions registry
pub trait FuncRegistry: Send + Sync {
    /// Get scalar udf with the given name.
    fn udf(&self, name: &str) -> Option<Arc<dyn ScalarUDF>>;

    /// Get aggregate udf with the given name.
    fn udaf(&self, name: &str) -> Option<Arc<dyn AggregateUDF>>;
}

pub fn new_func_registry() -> Arc<dyn FuncRegistry> {
    static INSTANCE: LazyLock<Arc<dyn FuncRegistry>> =
        LazyLock::new(|| Arc::new(BuiltinFuncRegistry::new()));
    Arc::clone(&INSTANCE)
}

/// Functions are looked up case-insensitively.
struct BuiltinFuncRegistry {
    scalar_functions: HashMap<String, Arc<dyn ScalarUDF>>,
    aggregate_functions: HashMap<String, Arc<dyn AggregateUDF>>,
}

impl BuiltinFuncRegistry {
    fn new() -> Self {
        let scalar_functions = vec![upper(), lower(), length(), abs(), coalesce()];
        let scalar_map = scalar_functions
            .into_iter()
            .map(|it| (it.name().to_string(), it))
            .collect::<HashMap<String, Arc<dyn ScalarUDF>>>();
        let aggregate_map = builtin_aggregates()
            .into_iter()
            .map(|(name, it)| (name.to_string(), it))
            .collect::<HashMap<String, Arc<dyn AggregateUDF>>>();
        Self { scalar_functions: scalar_map, aggregate_functions: aggregate_map }
    }
}

impl FuncRegistry for BuiltinFuncRegistry {
    fn udf(&self, name: &str) -> Option<Arc<dyn ScalarUDF>> {
        self.scalar_functions.get(&name.to_lowercase()).cloned()
    }

    fn udaf(&self, name: &str) -> Option<Arc<dyn AggregateUDF>> {
        self.aggregate_functions.get(&name.to_lowercase()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let registry = new_func_registry();
        assert_eq!(Some("upper"), registry.udf("UPPER").as_ref().map(|f| f.name()));
        assert_eq!(Some("stddev"), registry.udaf("stddev_samp").as_ref().map(|f| f.name()));
        assert!(registry.udaf("upper").is_none());
        assert!(registry.udf("nope").is_none());
    }
}
