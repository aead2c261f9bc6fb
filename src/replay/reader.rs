//! Asynchronous operations-file reader
//!
//! Streams the processor's CSV over `csv-async`, converting rows to domain
//! operations in batches. Memory stays constant regardless of file size.
//! Rows that fail to parse or convert are logged and skipped; a broken row
//! in a million-line reconciliation file must not abort the rest.

use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;
use tracing::warn;

use super::csv_format::{convert_operation, Operation, OperationCsvRecord};

/// Streaming CSV reader yielding operation batches
pub struct AsyncOpsReader<R: AsyncRead + Unpin> {
    csv_reader: csv_async::AsyncDeserializer<R>,
}

impl<R: AsyncRead + Unpin + Send + 'static> AsyncOpsReader<R> {
    /// Wrap an async byte source in an operations reader
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);

        Self { csv_reader }
    }

    /// Read up to `batch_size` operations
    ///
    /// Returns an empty vector at end of file.
    pub async fn read_batch(&mut self, batch_size: usize) -> Vec<Operation> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut records = self.csv_reader.deserialize::<OperationCsvRecord>();

        while batch.len() < batch_size {
            match records.next().await {
                Some(Ok(record)) => match convert_operation(record) {
                    Ok(operation) => batch.push(operation),
                    Err(reason) => warn!(%reason, "skipping unconvertible row"),
                },
                Some(Err(error)) => warn!(%error, "skipping unparsable row"),
                None => break,
            }
        }

        batch
    }
}
