use std::sync::Arc;

use sboxql::access::batch::RecordBatch;
use sboxql::catalog::r#type::DataType;
use sboxql::catalog::r#type::ScalarValue;
use sboxql::catalog::table::MemTable;
use sboxql::config::Config;
use sboxql::error::Result;
use sboxql::session::Session;
use sboxql::sql::plan::schema::Field;
use sboxql::sql::plan::schema::LogicalSchema;
use sboxql::sql::plan::schema::SchemaRef;

pub const NUM_EMPLOYEES: usize = 107;

/// Employees are spread round robin over the 11 staffed departments, one of
/// them has no department at all.
pub const NO_DEPARTMENT_EMPLOYEE: usize = 77;

pub const JOB_IDS: [&str; 19] = [
    "AD_PRES", "AD_VP", "AD_ASST", "FI_MGR", "FI_ACCOUNT", "AC_MGR", "AC_ACCOUNT", "SA_MAN", "SA_REP",
    "PU_MAN", "PU_CLERK", "ST_MAN", "ST_CLERK", "SH_CLERK", "IT_PROG", "MK_MAN", "MK_REP", "HR_REP",
    "PR_REP",
];

const DEPARTMENT_NAMES: [&str; 27] = [
    "Administration", "Marketing", "Purchasing", "Human Resources", "Shipping", "IT",
    "Public Relations", "Sales", "Executive", "Finance", "Accounting", "Treasury", "Corporate Tax",
    "Control And Credit", "Shareholder Services", "Benefits", "Manufacturing", "Construction",
    "Contracting", "Operations", "IT Support", "NOC", "IT Helpdesk", "Government Sales",
    "Retail Sales", "Recruiting", "Payroll",
];

/// One employee row of the fixture.
#[derive(Clone, Debug)]
pub struct Employee {
    pub employee_id: i64,
    pub name: String,
    pub salary: f64,
    pub job_id: String,
    pub manager_id: Option<i64>,
    pub department_id: Option<i64>,
}

pub fn employees() -> Vec<Employee> {
    (0..NUM_EMPLOYEES)
        .map(|i| Employee {
            employee_id: 100 + i as i64,
            name: format!("employee_{i:03}"),
            salary: 2100.0 + ((i * 7919) % 21900) as f64,
            job_id: JOB_IDS[i % JOB_IDS.len()].to_string(),
            manager_id: if i == 0 { None } else { Some(100 + (i as i64 % 10)) },
            department_id: if i == NO_DEPARTMENT_EMPLOYEE {
                None
            } else {
                Some(((i % 11) as i64 + 1) * 10)
            },
        })
        .collect()
}

fn schema(fields: Vec<Field>) -> Result<SchemaRef> {
    Ok(Arc::new(LogicalSchema::from_unqualified_fields(fields.into())?))
}

fn opt_int(v: Option<i64>) -> ScalarValue {
    v.map(ScalarValue::Int64).unwrap_or(ScalarValue::Null)
}

fn employees_table() -> Result<MemTable> {
    let schema = schema(vec![
        Field::new("employee_id", DataType::Integer, false),
        Field::new("name", DataType::Utf8, false),
        Field::new("salary", DataType::Double, false),
        Field::new("job_id", DataType::Utf8, false),
        Field::new("manager_id", DataType::Integer, true),
        Field::new("department_id", DataType::Integer, true),
    ])?;
    let rows = employees()
        .into_iter()
        .map(|e| {
            vec![
                ScalarValue::Int64(e.employee_id),
                ScalarValue::Utf8(e.name),
                ScalarValue::Double(e.salary),
                ScalarValue::Utf8(e.job_id),
                opt_int(e.manager_id),
                opt_int(e.department_id),
            ]
        })
        .collect::<Vec<_>>();
    // Several batches so operators see batch boundaries.
    let batches = rows
        .chunks(25)
        .map(|chunk| RecordBatch::from_rows(schema.clone(), chunk))
        .collect::<Result<Vec<_>>>()?;
    MemTable::try_new("employees", schema, batches)
}

fn departments_table() -> Result<MemTable> {
    let schema = schema(vec![
        Field::new("department_id", DataType::Integer, false),
        Field::new("department_name", DataType::Utf8, false),
        Field::new("location_id", DataType::Integer, true),
    ])?;
    let rows = DEPARTMENT_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let location = if i % 4 == 3 { None } else { Some(1000 + (i as i64 % 5) * 100) };
            vec![ScalarValue::Int64((i as i64 + 1) * 10), ScalarValue::from(*name), opt_int(location)]
        })
        .collect::<Vec<_>>();
    let batch = RecordBatch::from_rows(schema.clone(), &rows)?;
    MemTable::try_new("departments", schema, vec![batch])
}

fn jobs_table() -> Result<MemTable> {
    let schema = schema(vec![
        Field::new("job_id", DataType::Utf8, false),
        Field::new("min_salary", DataType::Integer, false),
        Field::new("max_salary", DataType::Integer, false),
    ])?;
    let rows = JOB_IDS
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let min = 2000 + i as i64 * 500;
            vec![ScalarValue::from(*id), ScalarValue::Int64(min), ScalarValue::Int64(min * 2)]
        })
        .collect::<Vec<_>>();
    let batch = RecordBatch::from_rows(schema.clone(), &rows)?;
    MemTable::try_new("jobs", schema, vec![batch])
}

fn empty_table() -> Result<MemTable> {
    let schema = schema(vec![
        Field::new("empty_id", DataType::Integer, false),
        Field::new("label", DataType::Utf8, true),
    ])?;
    MemTable::try_new("empty_table", schema, vec![])
}

/// A session over the employees, departments, jobs and empty_table tables.
pub fn new_session() -> Result<Session> {
    let session = Session::new(Config::default());
    session.register_table(Arc::new(employees_table()?))?;
    session.register_table(Arc::new(departments_table()?))?;
    session.register_table(Arc::new(jobs_table()?))?;
    session.register_table(Arc::new(empty_table()?))?;
    Ok(session)
}
