//! Record databases: save, delete, query, fetch.

use std::sync::Arc;

use serde_json::Value as Json;
use tracing::{debug, instrument};

use crate::error::{Error, ErrorCode, InvalidInputError, ServerError};
use crate::query::{Query, QueryResult};
use crate::record::Record;
use crate::transport::{
    BatchResponse, RECORD_DELETE, RECORD_FETCH, RECORD_QUERY, RECORD_SAVE, RecordDeleteRequest,
    RecordFetchRequest, RecordFetchResponse, RecordQueryRequest, RecordQueryResponse,
    RecordSaveRequest, Transport, from_payload, to_payload,
};
use crate::types::RecordId;

/// Which record store a database addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseScope {
    /// Records shared across users, subject to each record's ACL.
    Public,
    /// The authenticated user's own store.
    Private,
}

impl DatabaseScope {
    fn database_id(self) -> &'static str {
        match self {
            DatabaseScope::Public => "_public",
            DatabaseScope::Private => "_private",
        }
    }
}

/// Options for batch save and delete.
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveOptions {
    /// When set, one failure voids the whole batch: nothing is
    /// persisted and every index carries an error.
    pub atomic: bool,
}

/// The outcome of a batch save.
///
/// Both vectors are index-aligned with the input sequence: a failure at
/// index `i` leaves `saved[i]` as `None` and populates `errors[i]`;
/// other indices may still succeed unless the batch was atomic.
#[derive(Debug, Default)]
pub struct BatchSaveOutput {
    pub saved: Vec<Option<Record>>,
    pub errors: Vec<Option<ServerError>>,
}

impl BatchSaveOutput {
    /// True when every input was saved.
    pub fn is_complete(&self) -> bool {
        self.errors.iter().all(Option::is_none)
    }
}

/// Executes record operations against one named record store.
///
/// Obtained via [`Container::public_db`](crate::Container::public_db) or
/// [`Container::private_db`](crate::Container::private_db). Cheap to
/// clone. Ordering within a batch call matches input order; ordering
/// across independent concurrent calls is not guaranteed.
#[derive(Clone)]
pub struct Database {
    scope: DatabaseScope,
    transport: Arc<dyn Transport>,
}

impl Database {
    pub(crate) fn new(scope: DatabaseScope, transport: Arc<dyn Transport>) -> Self {
        Self { scope, transport }
    }

    /// Returns the store this database addresses.
    pub fn scope(&self) -> DatabaseScope {
        self.scope
    }

    // ========================================================================
    // Save
    // ========================================================================

    /// Save one record, returning it with server-assigned metadata.
    #[instrument(skip(self, record), fields(id = %record.record_id()))]
    pub async fn save(&self, record: &Record) -> Result<Record, Error> {
        let mut output = self
            .save_batch(std::slice::from_ref(record), &SaveOptions::default())
            .await?;

        if let Some(error) = output.errors[0].take() {
            return Err(error.into());
        }
        output.saved[0].take().ok_or_else(|| malformed("record:save response missing record"))
    }

    /// Save several records in one call.
    ///
    /// Without [`SaveOptions::atomic`], items fail independently; see
    /// [`BatchSaveOutput`] for the index alignment contract.
    #[instrument(skip(self, records, options), fields(count = records.len()))]
    pub async fn save_batch(
        &self,
        records: &[Record],
        options: &SaveOptions,
    ) -> Result<BatchSaveOutput, Error> {
        debug!(database = self.scope.database_id(), "Saving records");

        let request = RecordSaveRequest {
            database_id: self.scope.database_id(),
            records: records.iter().map(Record::to_json).collect(),
            atomic: options.atomic.then_some(true),
        };
        let response = self.transport.send(RECORD_SAVE, to_payload(&request)).await?;
        let response: BatchResponse = from_payload(response)?;

        if response.result.len() != records.len() {
            return Err(malformed("record:save response is not index-aligned"));
        }

        let mut output = BatchSaveOutput::default();
        for item in &response.result {
            match parse_batch_item(item) {
                BatchItem::Error(error) => {
                    output.saved.push(None);
                    output.errors.push(Some(error));
                }
                BatchItem::Payload(json) => match Record::from_json(json) {
                    Ok(record) => {
                        output.saved.push(Some(record));
                        output.errors.push(None);
                    }
                    Err(_) => {
                        output.saved.push(None);
                        output.errors.push(Some(ServerError::new(
                            ErrorCode::UnexpectedError,
                            "malformed record in record:save response",
                        )));
                    }
                },
            }
        }
        Ok(output)
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Delete one record by id.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn delete(&self, id: &RecordId) -> Result<(), Error> {
        let mut errors = self
            .delete_batch(std::slice::from_ref(id), &SaveOptions::default())
            .await?;
        match errors[0].take() {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    /// Delete several records in one call.
    ///
    /// Returns per-item errors, index-aligned with the input; `None`
    /// marks a successful deletion.
    #[instrument(skip(self, ids, options), fields(count = ids.len()))]
    pub async fn delete_batch(
        &self,
        ids: &[RecordId],
        options: &SaveOptions,
    ) -> Result<Vec<Option<ServerError>>, Error> {
        debug!(database = self.scope.database_id(), "Deleting records");

        let request = RecordDeleteRequest {
            database_id: self.scope.database_id(),
            ids: ids.iter().map(RecordId::to_string).collect(),
            atomic: options.atomic.then_some(true),
        };
        let response = self
            .transport
            .send(RECORD_DELETE, to_payload(&request))
            .await?;
        let response: BatchResponse = from_payload(response)?;

        if response.result.len() != ids.len() {
            return Err(malformed("record:delete response is not index-aligned"));
        }

        Ok(response
            .result
            .iter()
            .map(|item| match parse_batch_item(item) {
                BatchItem::Error(error) => Some(error),
                BatchItem::Payload(_) => None,
            })
            .collect())
    }

    // ========================================================================
    // Query and fetch
    // ========================================================================

    /// Execute a query, preserving server-returned record order.
    #[instrument(skip(self, query), fields(record_type = %query.record_type()))]
    pub async fn query(&self, query: &Query) -> Result<QueryResult, Error> {
        debug!(database = self.scope.database_id(), "Querying records");

        let request = RecordQueryRequest {
            database_id: self.scope.database_id(),
            query: query.to_json(),
        };
        let response = self.transport.send(RECORD_QUERY, to_payload(&request)).await?;
        let response: RecordQueryResponse = from_payload(response)?;

        let records = response
            .result
            .iter()
            .map(Record::from_json)
            .collect::<Result<Vec<_>, _>>()?;
        let overall_count = response.info.and_then(|info| info.count);

        Ok(QueryResult::new(records, overall_count))
    }

    /// Fetch one record by id.
    ///
    /// Fails with [`ErrorCode::ResourceNotFound`] if no record with that
    /// id exists in the caller's ACL-visible set; never resolves with a
    /// missing record.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn get_record(&self, id: &RecordId) -> Result<Record, Error> {
        debug!(database = self.scope.database_id(), "Fetching record");

        let request = RecordFetchRequest {
            database_id: self.scope.database_id(),
            id: &id.to_string(),
        };
        let response = self.transport.send(RECORD_FETCH, to_payload(&request)).await?;
        let response: RecordFetchResponse = from_payload(response)?;

        match response.result {
            Some(json) => Record::from_json(&json),
            None => Err(ServerError::new(
                ErrorCode::ResourceNotFound,
                format!("record '{}' not found", id),
            )
            .into()),
        }
    }
}

enum BatchItem<'a> {
    Payload(&'a Json),
    Error(ServerError),
}

/// Split a batch response item into its record payload or error halves.
///
/// Error items carry `{"$type":"error", "code", "message", "info"?}`.
fn parse_batch_item(item: &Json) -> BatchItem<'_> {
    let is_error = item
        .get("$type")
        .and_then(Json::as_str)
        .is_some_and(|t| t == "error");
    if !is_error {
        return BatchItem::Payload(item);
    }

    let code = item.get("code").and_then(Json::as_u64).unwrap_or(10000) as u32;
    let message = item
        .get("message")
        .and_then(Json::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let info = item.get("info").cloned();
    BatchItem::Error(ServerError::from_wire(code, message, info))
}

fn malformed(message: &str) -> Error {
    InvalidInputError::Other {
        message: message.to_string(),
    }
    .into()
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn batch_item_splits_errors_from_records() {
        let error = json!({"$type": "error", "code": 113, "message": "constraint violated"});
        match parse_batch_item(&error) {
            BatchItem::Error(err) => {
                assert_eq!(err.code, ErrorCode::ConstraintViolated);
                assert_eq!(err.message, "constraint violated");
            }
            BatchItem::Payload(_) => panic!("expected error item"),
        }

        let record = json!({"$type": "record", "$id": "note/n1"});
        assert!(matches!(parse_batch_item(&record), BatchItem::Payload(_)));
    }

    #[test]
    fn scope_maps_to_database_id() {
        assert_eq!(DatabaseScope::Public.database_id(), "_public");
        assert_eq!(DatabaseScope::Private.database_id(), "_private");
    }
}
