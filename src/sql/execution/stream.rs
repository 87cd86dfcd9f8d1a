use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use futures::Stream;
use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::access::batch::RecordBatch;
use crate::error::Result;
use crate::sql::plan::schema::SchemaRef;

/// A stream of [`RecordBatch`]es that also knows its output schema.
pub trait RecordBatchStream: Stream<Item = Result<RecordBatch>> + Send {
    /// Schema of every batch yielded by this stream.
    fn schema(&self) -> SchemaRef;
}

/// The stream every physical operator returns from `execute`.
pub type SendableRecordBatchStream = Pin<Box<dyn RecordBatchStream>>;

/// Attach a schema to any stream of batches.
pub struct StreamAdapter<S> {
    schema: SchemaRef,
    inner: S,
}

impl<S> StreamAdapter<S> {
    pub fn new(schema: SchemaRef, inner: S) -> Self {
        Self { schema, inner }
    }
}

impl<S> RecordBatchStream for StreamAdapter<S>
where
    S: Stream<Item = Result<RecordBatch>> + Send + Unpin + 'static,
{
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }
}

impl<S> Stream for StreamAdapter<S>
where
    S: Stream<Item = Result<RecordBatch>> + Unpin,
{
    type Item = Result<RecordBatch>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Box an arbitrary batch stream, typically built with `try_stream!`, into
/// a [`SendableRecordBatchStream`].
pub fn adapt<S>(schema: SchemaRef, inner: S) -> SendableRecordBatchStream
where
    S: Stream<Item = Result<RecordBatch>> + Send + 'static,
{
    Box::pin(StreamAdapter::new(schema, Box::pin(inner)))
}

pub fn empty_stream(schema: SchemaRef) -> SendableRecordBatchStream {
    let inner = futures::stream::empty::<Result<RecordBatch>>();
    Box::pin(StreamAdapter::new(schema, inner))
}

/// A stream over batches already in memory.
pub fn memory_stream(schema: SchemaRef, batches: Vec<RecordBatch>) -> SendableRecordBatchStream {
    let inner = futures::stream::iter(batches.into_iter().map(Ok));
    Box::pin(StreamAdapter::new(schema, inner))
}

/// Drain the stream, stopping at the first error.
pub async fn collect(mut stream: SendableRecordBatchStream) -> Result<Vec<RecordBatch>> {
    let mut out = vec![];
    while let Some(batch) = stream.next().await {
        out.push(batch?);
    }
    Ok(out)
}

/// Drain the stream into a single batch.
pub async fn collect_batch(stream: SendableRecordBatchStream) -> Result<RecordBatch> {
    let schema = stream.schema();
    let batches = collect(stream).await?;
    RecordBatch::concat(schema, &batches)
}

/// Aborts the spawned producer tasks once the consuming stream is dropped.
#[derive(Debug, Default)]
pub struct AbortOnDrop(Vec<JoinHandle<()>>);

impl AbortOnDrop {
    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.0.push(handle);
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::r#type::DataType;
    use crate::catalog::r#type::ScalarValue;
    use crate::sql::plan::schema::Field;
    use crate::sql::plan::schema::LogicalSchema;

    #[tokio::test]
    async fn test_adapt_and_collect() -> Result<()> {
        let schema: SchemaRef = Arc::new(LogicalSchema::from_unqualified_fields(
            vec![Field::new("a", DataType::Integer, false)].into(),
        )?);
        let rows = vec![vec![ScalarValue::Int64(1)], vec![ScalarValue::Int64(2)]];
        let batch = RecordBatch::from_rows(schema.clone(), &rows)?;

        let inner = schema.clone();
        let stream = adapt(
            schema.clone(),
            async_stream::try_stream! {
                yield batch.clone();
                yield RecordBatch::new_empty(inner);
            },
        );
        assert_eq!(schema, stream.schema());
        let out = collect_batch(stream).await?;
        assert_eq!(2, out.num_rows());

        assert!(collect(empty_stream(schema)).await?.is_empty());
        Ok(())
    }
}
