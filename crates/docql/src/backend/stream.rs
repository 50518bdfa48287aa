//! The row stream returned by `table_select`.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use serde_json::Value;
use tokio_postgres::RowStream;

use crate::backend::decode_pg_row;
use crate::error::{StoreError, StoreResult};
use crate::sql::RowShape;

/// A finite stream of decoded rows: whole documents, or JSON arrays for
/// projected queries.
///
/// The server-backed variant owns the pooled connection and the live cursor;
/// dropping the stream returns the connection to the pool, so partial
/// iteration never leaks it. The embedded variant is materialised before the
/// call returns.
#[must_use]
pub struct DocStream {
    inner: Inner,
}

impl std::fmt::Debug for DocStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocStream").finish_non_exhaustive()
    }
}

enum Inner {
    Materialized(std::vec::IntoIter<Value>),
    Postgres {
        // Held so the connection is not recycled while rows are in flight.
        _client: deadpool_postgres::Client,
        rows: Pin<Box<RowStream>>,
        shape: RowShape,
    },
}

impl DocStream {
    pub(crate) fn from_rows(rows: Vec<Value>) -> Self {
        Self {
            inner: Inner::Materialized(rows.into_iter()),
        }
    }

    pub(crate) fn postgres(
        client: deadpool_postgres::Client,
        rows: RowStream,
        shape: RowShape,
    ) -> Self {
        Self {
            inner: Inner::Postgres {
                _client: client,
                rows: Box::pin(rows),
                shape,
            },
        }
    }

    /// Drain the stream into a vector, failing on the first bad row.
    pub async fn try_collect(mut self) -> StoreResult<Vec<Value>> {
        let mut out = Vec::new();
        while let Some(item) =
            std::future::poll_fn(|cx| Pin::new(&mut self).poll_next(cx)).await
        {
            out.push(item?);
        }
        Ok(out)
    }
}

impl Stream for DocStream {
    type Item = StoreResult<Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().inner {
            Inner::Materialized(iter) => Poll::Ready(iter.next().map(Ok)),
            Inner::Postgres { rows, shape, .. } => match rows.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(row))) => Poll::Ready(Some(decode_pg_row(&row, *shape))),
                Poll::Ready(Some(Err(e))) => {
                    Poll::Ready(Some(Err(StoreError::from_pg_error(e))))
                }
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
