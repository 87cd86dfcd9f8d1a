macro_rules! setup {
    ($session:ident) => {
        let _ = env_logger::builder().is_test(true).try_init();
        let $session = crate::fixtures::new_session()?;
    };
}

mod fixtures;
mod tests;

use sboxql::access::batch::RecordBatch;
use sboxql::catalog::r#type::ScalarValue;
use sboxql::error::Result;
use sboxql::session::Session;
use sboxql::sql::execution::context::QueryContext;
use sboxql::sql::execution::stream::collect;

/// Run `sql` to completion under `ctx`.
pub async fn query_with(session: &Session, sql: &str, ctx: QueryContext) -> Result<Vec<RecordBatch>> {
    collect(session.execute_query(sql, ctx)?).await
}

pub async fn query(session: &Session, sql: &str) -> Result<Vec<RecordBatch>> {
    query_with(session, sql, session.new_query_context()).await
}

pub fn rows(batches: &[RecordBatch]) -> Vec<Vec<ScalarValue>> {
    batches.iter().flat_map(|b| (0..b.num_rows()).map(|i| b.row(i))).collect()
}

pub fn num_rows(batches: &[RecordBatch]) -> usize {
    batches.iter().map(|b| b.num_rows()).sum()
}

/// Rows rendered as text and sorted, for order insensitive comparisons.
pub fn sorted_rows(batches: &[RecordBatch]) -> Vec<String> {
    let mut out = rows(batches)
        .into_iter()
        .map(|row| row.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("|"))
        .collect::<Vec<_>>();
    out.sort();
    out
}
