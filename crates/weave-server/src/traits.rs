use async_trait::async_trait;

use crate::error::ServerResult;
use crate::types::*;

/// The trace server interface the client core depends on.
///
/// Implementations must satisfy these invariants:
/// - Object versions, tables, rows and files are content-addressed: writing
///   identical content returns the digest already stored and creates no new
///   version.
/// - `obj_read` resolves `latest` and `v<N>` digests to a concrete version
///   and reports that version's content digest.
/// - Reading a deleted version fails with `ServerError::ObjectDeleted`,
///   never with a generic not-found error.
/// - Errors are returned unchanged; retry policy belongs to the transport.
#[async_trait]
pub trait TraceServer: Send + Sync {
    async fn obj_create(&self, req: ObjCreateReq) -> ServerResult<ObjCreateRes>;

    async fn obj_read(&self, req: ObjReadReq) -> ServerResult<ObjReadRes>;

    async fn obj_delete(&self, req: ObjDeleteReq) -> ServerResult<ObjDeleteRes>;

    /// Resolve full ref URIs, including extra paths, to JSON values.
    async fn refs_read_batch(&self, req: RefsReadBatchReq) -> ServerResult<RefsReadBatchRes>;

    async fn table_create(&self, req: TableCreateReq) -> ServerResult<TableCreateRes>;

    async fn table_query(&self, req: TableQueryReq) -> ServerResult<TableQueryRes>;

    async fn table_query_stats(&self, req: TableQueryStatsReq) -> ServerResult<TableQueryStatsRes>;

    async fn file_create(&self, req: FileCreateReq) -> ServerResult<FileCreateRes>;

    async fn file_content_read(&self, req: FileContentReadReq)
        -> ServerResult<FileContentReadRes>;

    async fn call_start(&self, req: CallStartReq) -> ServerResult<CallStartRes>;

    async fn call_end(&self, req: CallEndReq) -> ServerResult<CallEndRes>;

    async fn calls_query(&self, req: CallsQueryReq) -> ServerResult<CallsQueryRes>;

    /// Delete calls and all of their descendants.
    async fn calls_delete(&self, req: CallsDeleteReq) -> ServerResult<CallsDeleteRes>;

    async fn call_update(&self, req: CallUpdateReq) -> ServerResult<CallUpdateRes>;
}
