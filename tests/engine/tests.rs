use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use sboxql::catalog::catalog::Catalog;
use sboxql::catalog::r#type::ScalarValue;
use sboxql::error::Error;
use sboxql::error::Result;
use sboxql::sql::execution::compiler::ExecutionPlan;
use sboxql::sql::execution::display::TabularDisplay;
use sboxql::sql::execution::join::HashJoinExec;
use sboxql::sql::plan::visitor::Transformed;
use sboxql::sql::plan::visitor::TreeNode;
use tokio_util::sync::CancellationToken;

use crate::fixtures::employees;
use crate::fixtures::JOB_IDS;
use crate::fixtures::NUM_EMPLOYEES;
use crate::num_rows;
use crate::query;
use crate::query_with;
use crate::rows;
use crate::sorted_rows;

#[tokio::test]
async fn test_select_without_from() -> Result<()> {
    setup!(session);
    let batches = query(&session, "SELECT 1 AS a, 2 AS b").await?;
    assert_eq!(vec![vec![ScalarValue::Int64(1), ScalarValue::Int64(2)]], rows(&batches));
    let schema = batches[0].schema();
    let names = schema.fields().iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
    assert_eq!(vec!["a", "b"], names);
    Ok(())
}

#[tokio::test]
async fn test_distinct_and_group_by() -> Result<()> {
    setup!(session);
    let distinct = query(&session, "SELECT distinct department_id FROM employees").await?;
    assert_eq!(12, num_rows(&distinct));

    let groups = query(&session, "SELECT avg(salary) FROM employees GROUP BY department_id").await?;
    assert_eq!(12, num_rows(&groups));

    let sql = "SELECT department_id AS dept, count(*) AS n FROM employees GROUP BY dept ORDER BY dept";
    let rows = rows(&query(&session, sql).await?);
    assert_eq!(12, rows.len());
    assert_eq!(ScalarValue::Int64(10), rows[0][0]);
    // NULL sorts last in ascending order.
    assert_eq!(vec![ScalarValue::Null, ScalarValue::Int64(1)], rows[11]);
    let total = rows
        .iter()
        .map(|r| match r[1] {
            ScalarValue::Int64(n) => n,
            _ => 0,
        })
        .sum::<i64>();
    assert_eq!(NUM_EMPLOYEES as i64, total);
    Ok(())
}

#[tokio::test]
async fn test_aggregates() -> Result<()> {
    setup!(session);
    let count = query(&session, "SELECT count(employee_id) FROM employees").await?;
    assert_eq!(vec![vec![ScalarValue::Int64(NUM_EMPLOYEES as i64)]], rows(&count));

    let sql = "SELECT department_id, max(salary) AS top FROM employees \
               GROUP BY department_id HAVING top > 20000 ORDER BY top DESC";
    let rows = rows(&query(&session, sql).await?);
    let mut expected = HashMap::<Option<i64>, f64>::new();
    for e in employees() {
        let top = expected.entry(e.department_id).or_insert(e.salary);
        *top = top.max(e.salary);
    }
    let mut expected = expected.into_values().filter(|top| *top > 20000.0).collect::<Vec<_>>();
    expected.sort_by(|a, b| b.total_cmp(a));
    let actual = rows
        .iter()
        .map(|r| match r[1] {
            ScalarValue::Double(v) => v,
            _ => f64::NAN,
        })
        .collect::<Vec<_>>();
    assert_eq!(expected, actual);
    Ok(())
}

#[tokio::test]
async fn test_left_join_empty_table() -> Result<()> {
    setup!(session);
    let sql = "SELECT * FROM employees e LEFT JOIN empty_table empty ON e.department_id = empty.empty_id";
    let rows = rows(&query(&session, sql).await?);
    assert_eq!(NUM_EMPLOYEES, rows.len());
    assert!(rows.iter().all(|r| r.len() == 8 && r[6] == ScalarValue::Null && r[7] == ScalarValue::Null));
    Ok(())
}

#[tokio::test]
async fn test_joins() -> Result<()> {
    setup!(session);
    let using = "SELECT count(*) FROM employees JOIN departments USING (department_id)";
    assert_eq!(vec![vec![ScalarValue::Int64(106)]], rows(&query(&session, using).await?));

    let natural = "SELECT department_id, department_name FROM employees NATURAL JOIN departments \
                   WHERE employee_id = 101";
    let rows = rows(&query(&session, natural).await?);
    assert_eq!(vec![vec![ScalarValue::Int64(20), ScalarValue::from("Marketing")]], rows);

    let right = "SELECT d.department_name FROM employees e RIGHT JOIN departments d \
                 ON e.department_id = d.department_id WHERE e.employee_id IS NULL";
    // 27 departments, 11 of them staffed.
    assert_eq!(16, num_rows(&query(&session, right).await?));
    Ok(())
}

/// Swaps every hash join of the physical plan for a nested loop join.
fn nested_loop_hook(swapped: Arc<AtomicUsize>) -> impl Fn(Arc<dyn ExecutionPlan>) -> Result<Arc<dyn ExecutionPlan>> {
    move |plan: Arc<dyn ExecutionPlan>| {
        let t = plan.transform_up(|node| match node.as_any().downcast_ref::<HashJoinExec>() {
            Some(join) => {
                swapped.fetch_add(1, Ordering::Relaxed);
                let nested: Arc<dyn ExecutionPlan> = Arc::new(join.to_nested_loop()?);
                Ok(Transformed::yes(nested))
            }
            None => Ok(Transformed::no(node)),
        })?;
        Ok(t.data)
    }
}

#[tokio::test]
async fn test_hash_join_matches_nested_loop_join() -> Result<()> {
    setup!(session);
    let queries = [
        "SELECT e.name, d.department_name FROM employees e JOIN departments d \
         ON e.department_id = d.department_id",
        "SELECT e.name, d.department_name FROM employees e LEFT JOIN departments d \
         ON e.department_id = d.department_id AND d.location_id > 1100",
        "SELECT e.name, d.department_name FROM employees e FULL JOIN departments d \
         ON e.department_id = d.department_id",
        "SELECT d.department_name FROM departments d WHERE d.department_id IN (10, 20, 30) \
         INTERSECT SELECT d.department_name FROM departments d JOIN employees e \
         ON e.department_id = d.department_id",
        "SELECT job_id FROM jobs EXCEPT SELECT job_id FROM employees WHERE salary > 10000",
    ];
    for sql in queries {
        let hashed = sorted_rows(&query(&session, sql).await?);

        let swapped = Arc::new(AtomicUsize::new(0));
        let ctx = session.new_query_context().with_physical_plan_hook(nested_loop_hook(swapped.clone()));
        let nested = sorted_rows(&query_with(&session, sql, ctx).await?);

        assert!(swapped.load(Ordering::Relaxed) > 0, "{sql}");
        assert_eq!(hashed, nested, "{sql}");
    }
    Ok(())
}

#[tokio::test]
async fn test_set_operations() -> Result<()> {
    setup!(session);
    let all = query(&session, "SELECT job_id FROM jobs UNION ALL SELECT job_id FROM jobs").await?;
    assert_eq!(2 * JOB_IDS.len(), num_rows(&all));
    let distinct = query(&session, "SELECT job_id FROM jobs UNION SELECT job_id FROM jobs").await?;
    assert_eq!(JOB_IDS.len(), num_rows(&distinct));

    // NULL matches NULL in set operations.
    let sql = "SELECT department_id FROM employees INTERSECT SELECT department_id FROM employees";
    assert_eq!(12, num_rows(&query(&session, sql).await?));
    let sql = "SELECT department_id FROM employees EXCEPT SELECT department_id FROM departments";
    assert_eq!(vec![vec![ScalarValue::Null]], rows(&query(&session, sql).await?));

    // Jobs with a minimum salary below 4000 are the first four.
    let cheap = &JOB_IDS[..4];
    let cheap_employees = employees().iter().filter(|e| cheap.contains(&e.job_id.as_str())).count();
    let cases = [
        ("SELECT job_id FROM jobs INTERSECT SELECT job_id FROM employees", JOB_IDS.len()),
        ("SELECT job_id FROM employees INTERSECT SELECT job_id FROM jobs WHERE min_salary < 4000", 4),
        (
            "SELECT job_id FROM employees INTERSECT ALL SELECT job_id FROM jobs WHERE min_salary < 4000",
            cheap_employees,
        ),
        ("SELECT job_id FROM jobs EXCEPT SELECT job_id FROM employees WHERE employee_id < 110", 9),
        (
            "SELECT job_id FROM employees EXCEPT ALL SELECT job_id FROM jobs WHERE min_salary < 4000",
            NUM_EMPLOYEES - cheap_employees,
        ),
        ("SELECT job_id FROM employees EXCEPT ALL SELECT job_id FROM jobs", 0),
    ];
    for (sql, expected) in cases {
        assert_eq!(expected, num_rows(&query(&session, sql).await?), "{sql}");
    }

    let coerced = query(&session, "SELECT employee_id FROM employees UNION ALL SELECT 1.5").await?;
    assert_eq!(NUM_EMPLOYEES + 1, num_rows(&coerced));
    assert!(rows(&coerced).iter().all(|r| matches!(r[0], ScalarValue::Double(_))));
    Ok(())
}

#[tokio::test]
async fn test_limit() -> Result<()> {
    setup!(session);
    let none = query(&session, "SELECT * FROM employees LIMIT 0").await?;
    assert!(none.is_empty());

    let all = query(&session, "SELECT * FROM employees LIMIT 9223372036854775807 OFFSET 0").await?;
    assert_eq!(NUM_EMPLOYEES, num_rows(&all));

    let sql = "SELECT name FROM employees ORDER BY salary DESC LIMIT 3 OFFSET 1";
    let actual = rows(&query(&session, sql).await?);
    let mut expected = employees();
    expected.sort_by(|a, b| b.salary.total_cmp(&a.salary));
    let expected =
        expected.into_iter().skip(1).take(3).map(|e| vec![ScalarValue::Utf8(e.name)]).collect::<Vec<_>>();
    assert_eq!(expected, actual);

    let ctx = session.new_query_context().with_max_results(5).with_batch_size(2);
    let capped = query_with(&session, "SELECT name FROM employees", ctx).await?;
    assert_eq!(5, num_rows(&capped));
    assert!(capped.iter().all(|b| b.num_rows() <= 2));
    Ok(())
}

#[tokio::test]
async fn test_correlated_scalar_subquery() -> Result<()> {
    setup!(session);
    let sql = "SELECT e.employee_id FROM employees e WHERE e.salary > \
               (SELECT avg(salary) FROM employees WHERE department_id = e.department_id)";
    let actual = sorted_rows(&query(&session, sql).await?);

    let mut sums = HashMap::<i64, (f64, usize)>::new();
    for e in employees() {
        if let Some(d) = e.department_id {
            let entry = sums.entry(d).or_insert((0.0, 0));
            entry.0 += e.salary;
            entry.1 += 1;
        }
    }
    let mut expected = employees()
        .into_iter()
        .filter(|e| match e.department_id.and_then(|d| sums.get(&d)) {
            Some((sum, n)) => e.salary > sum / *n as f64,
            None => false,
        })
        .map(|e| e.employee_id.to_string())
        .collect::<Vec<_>>();
    expected.sort();
    assert_eq!(expected, actual);

    // Only equalities pin the grouped inner rows to one outer row.
    let unsupported = [
        "SELECT e.employee_id FROM employees e WHERE e.salary >= \
         (SELECT max(i.salary) FROM employees i WHERE i.salary <= e.salary)",
        "SELECT e.employee_id FROM employees e WHERE e.salary >= \
         (SELECT max(i.salary) FROM employees i WHERE i.department_id = e.department_id \
         AND i.employee_id < e.employee_id)",
    ];
    for sql in unsupported {
        let result = session.execute_query(sql, session.new_query_context());
        assert!(matches!(result, Err(Error::Unimplemented(_))), "{sql}");
    }
    Ok(())
}

#[tokio::test]
async fn test_expressions_and_variables() -> Result<()> {
    setup!(session);
    let sql = "SELECT upper(name), length(name), -employee_id, CAST(employee_id AS DOUBLE) / 4 \
               FROM employees WHERE employee_id = 100";
    let rows = rows(&query(&session, sql).await?);
    assert_eq!(
        vec![vec![
            ScalarValue::from("EMPLOYEE_000"),
            ScalarValue::Int64(12),
            ScalarValue::Int64(-100),
            ScalarValue::Double(25.0),
        ]],
        rows
    );

    let sql = "SELECT count(*) FROM employees WHERE salary > @min AND name LIKE 'employee_0%'";
    let ctx = session.new_query_context().with_variable("@min", ScalarValue::Double(15000.0));
    let expected =
        employees().iter().filter(|e| e.salary > 15000.0 && e.name.starts_with("employee_0")).count();
    let rows = crate::rows(&query_with(&session, sql, ctx).await?);
    assert_eq!(vec![vec![ScalarValue::Int64(expected as i64)]], rows);

    let sql = "WITH rich(id, pay) AS (SELECT employee_id, salary FROM employees WHERE salary > 15000) \
               SELECT count(*) FROM rich WHERE pay BETWEEN 15000 AND 30000";
    let expected = employees().iter().filter(|e| e.salary > 15000.0).count();
    let rows = crate::rows(&query(&session, sql).await?);
    assert_eq!(vec![vec![ScalarValue::Int64(expected as i64)]], rows);
    Ok(())
}

#[tokio::test]
async fn test_explain() -> Result<()> {
    setup!(session);
    let sql = "EXPLAIN SELECT e.name FROM employees e JOIN departments d ON e.department_id = d.department_id";
    let rows = rows(&query(&session, sql).await?);
    assert_eq!(ScalarValue::from("logical"), rows[0][0]);
    assert_eq!(Some(&ScalarValue::from("physical")), rows.last().map(|r| &r[0]));
    let physical = rows
        .iter()
        .filter(|r| r[0] == ScalarValue::from("physical"))
        .map(|r| r[1].to_string())
        .collect::<Vec<_>>();
    assert!(physical.iter().any(|line| line.contains("HashJoinExec")), "{physical:?}");

    assert!(matches!(
        session.execute_query("EXPLAIN EXPLAIN SELECT 1", session.new_query_context()),
        Err(Error::Parse(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_errors() -> Result<()> {
    setup!(session);
    let planning = [
        "SELECT nope FROM employees",
        "SELECT department_id FROM employees, departments",
        "SELECT 1; SELECT 2",
        "SELECT job_id FROM jobs UNION SELECT job_id, min_salary FROM jobs",
        "SELECT * FROM departments AS d(a, b)",
    ];
    for sql in planning {
        let result = session.execute_query(sql, session.new_query_context());
        assert!(matches!(result, Err(Error::Parse(_))), "{sql}");
    }
    let result = session.execute_query("SELECT name FROM employees GROUP BY ALL", session.new_query_context());
    assert!(matches!(result, Err(Error::Unimplemented(_))));

    // Runtime errors end the stream.
    let stream = session.execute_query("SELECT employee_id / 0 FROM employees", session.new_query_context())?;
    assert!(matches!(sboxql::sql::execution::stream::collect(stream).await, Err(Error::Value(_))));

    let token = CancellationToken::new();
    let ctx = session.new_query_context().with_cancellation_token(token.clone());
    let stream = session.execute_query("SELECT name FROM employees", ctx)?;
    token.cancel();
    assert!(matches!(sboxql::sql::execution::stream::collect(stream).await, Err(Error::Cancelled)));
    Ok(())
}

#[tokio::test]
async fn test_tabular_display() -> Result<()> {
    setup!(session);
    let batches = query(&session, "SELECT 1 AS a, 'x' AS b").await?;
    let expected = "\
+---+---+
| a | b |
+---+---+
| 1 | x |
+---+---+
";
    assert_eq!(expected, TabularDisplay::new(&batches[0].schema(), &batches).to_string());

    let empty = query(&session, "SELECT * FROM empty_table").await?;
    let schema = session.catalog().must_get_table("empty_table")?.schema();
    assert_eq!("Empty result set\n", TabularDisplay::new(&schema, &empty).to_string());
    Ok(())
}
