use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{coerce_text, Collection, ParticipantRecord, RawDocument};

pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub limit: usize,
    pub cursor_after: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentPage {
    pub documents: Vec<RawDocument>,
    pub total: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to read snapshot {path}: {source}")]
    SnapshotIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse snapshot {path}: {source}")]
    SnapshotParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("page size must be at least 1")]
    InvalidPageSize,
    #[error("failed to fetch page {page} of {collection} (cursor after {cursor:?})")]
    Page {
        collection: Collection,
        page: usize,
        cursor: Option<String>,
        #[source]
        source: StoreError,
    },
}

/// Cursor-paginated access to one logical collection, ordered by document id.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_documents(
        &self,
        collection: Collection,
        query: &PageQuery,
    ) -> Result<DocumentPage, StoreError>;
}

/// Pages through `collection` until a short page signals the end.
///
/// Each cursor is the id of the last document of the previous page. A failed
/// page aborts the whole fetch; nothing fetched so far is returned.
pub async fn fetch_all<S>(
    store: &S,
    collection: Collection,
    page_size: usize,
) -> Result<Vec<RawDocument>, FetchError>
where
    S: DocumentStore + ?Sized,
{
    if page_size == 0 {
        return Err(FetchError::InvalidPageSize);
    }

    let mut documents = Vec::new();
    let mut cursor: Option<String> = None;
    let mut page = 0usize;

    loop {
        page += 1;
        let query = PageQuery {
            limit: page_size,
            cursor_after: cursor.clone(),
        };
        let result = store
            .list_documents(collection, &query)
            .await
            .map_err(|source| FetchError::Page {
                collection,
                page,
                cursor: cursor.clone(),
                source,
            })?;

        let received = result.documents.len();
        debug!(%collection, page, received, total = result.total, "fetched page");

        if let Some(last) = result.documents.last() {
            cursor = Some(last.id.clone());
        }
        documents.extend(result.documents);

        if received < page_size {
            break;
        }
    }

    info!(%collection, pages = page, documents = documents.len(), "collection fetched");
    Ok(documents)
}

/// Fetches the given collections concurrently and concatenates them in the
/// order requested once every fetch has completed.
pub async fn fetch_population<S>(
    store: &S,
    collections: &[Collection],
    page_size: usize,
) -> Result<Vec<ParticipantRecord>, FetchError>
where
    S: DocumentStore + ?Sized,
{
    let fetches = collections
        .iter()
        .map(|collection| async move {
            let documents = fetch_all(store, *collection, page_size).await?;
            Ok::<_, FetchError>((*collection, documents))
        });
    let fetched = try_join_all(fetches).await?;

    let records = fetched
        .iter()
        .flat_map(|(collection, documents)| {
            documents
                .iter()
                .map(|document| ParticipantRecord::from_document(*collection, document))
        })
        .collect();
    Ok(records)
}

/// Collections held in memory, sorted by id. Also backs `--snapshot` files.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: BTreeMap<Collection, Vec<RawDocument>>,
    requests: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collection: Collection, document: RawDocument) {
        let documents = self.collections.entry(collection).or_default();
        match documents.binary_search_by(|existing| existing.id.cmp(&document.id)) {
            Ok(position) => documents[position] = document,
            Err(position) => documents.insert(position, document),
        }
    }

    #[cfg(test)]
    pub fn len(&self, collection: Collection) -> usize {
        self.collections.get(&collection).map_or(0, Vec::len)
    }

    #[cfg(test)]
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    /// Loads `{ "student": [...], "staffFaculty": [...], "community": [...] }`.
    /// Documents without an `id`/`$id` get a positional one.
    pub fn from_snapshot(path: &Path) -> Result<Self, StoreError> {
        let contents = std::fs::read_to_string(path).map_err(|source| StoreError::SnapshotIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_snapshot_str(&contents).map_err(|source| StoreError::SnapshotParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_snapshot_str(contents: &str) -> Result<Self, serde_json::Error> {
        let snapshot: BTreeMap<Collection, Vec<Map<String, Value>>> =
            serde_json::from_str(contents)?;
        let mut store = Self::new();
        for (collection, bodies) in snapshot {
            for (index, body) in bodies.into_iter().enumerate() {
                let id = ["$id", "id"]
                    .iter()
                    .find_map(|key| body.get(*key).and_then(coerce_text))
                    .unwrap_or_else(|| format!("{collection}-{index:06}"));
                store.insert(collection, RawDocument::new(id, body));
            }
        }
        Ok(store)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn list_documents(
        &self,
        collection: Collection,
        query: &PageQuery,
    ) -> Result<DocumentPage, StoreError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let Some(documents) = self.collections.get(&collection) else {
            return Ok(DocumentPage::default());
        };
        let start = match &query.cursor_after {
            Some(cursor) => documents.partition_point(|document| document.id.as_str() <= cursor.as_str()),
            None => 0,
        };
        Ok(DocumentPage {
            documents: documents.iter().skip(start).take(query.limit).cloned().collect(),
            total: documents.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn store_with(collection: Collection, count: usize) -> MemoryStore {
        let mut store = MemoryStore::new();
        // Inserted in reverse so ordering comes from the store, not the fixture.
        for index in (0..count).rev() {
            let mut body = Map::new();
            body.insert("age".to_string(), json!(20 + index % 30));
            store.insert(collection, RawDocument::new(format!("doc-{index:05}"), body));
        }
        store
    }

    struct FailingStore {
        inner: MemoryStore,
        fail_on_request: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DocumentStore for FailingStore {
        async fn list_documents(
            &self,
            collection: Collection,
            query: &PageQuery,
        ) -> Result<DocumentPage, StoreError> {
            let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
            if call == self.fail_on_request {
                return Err(StoreError::Unavailable("rate limited".to_string()));
            }
            self.inner.list_documents(collection, query).await
        }
    }

    #[tokio::test]
    async fn fetches_every_document_once_in_id_order() {
        for (count, expected_requests) in [(0, 1), (1, 1), (99, 1), (100, 2), (101, 2), (250, 3), (300, 4)] {
            let store = store_with(Collection::Student, count);
            let documents = fetch_all(&store, Collection::Student, 100).await.unwrap();

            assert_eq!(documents.len(), count, "count {count}");
            assert_eq!(store.requests(), expected_requests, "count {count}");
            let unique: HashSet<_> = documents.iter().map(|document| &document.id).collect();
            assert_eq!(unique.len(), count);
            assert!(documents.windows(2).all(|pair| pair[0].id < pair[1].id));
        }
    }

    #[tokio::test]
    async fn rejects_zero_page_size() {
        let store = store_with(Collection::Student, 3);
        let result = fetch_all(&store, Collection::Student, 0).await;
        assert!(matches!(result, Err(FetchError::InvalidPageSize)));
        assert_eq!(store.requests(), 0);
    }

    #[tokio::test]
    async fn failed_page_aborts_the_fetch() {
        let store = FailingStore {
            inner: store_with(Collection::Community, 250),
            fail_on_request: 2,
            calls: AtomicUsize::new(0),
        };
        let error = fetch_all(&store, Collection::Community, 100).await.unwrap_err();
        match error {
            FetchError::Page {
                collection,
                page,
                cursor,
                source,
            } => {
                assert_eq!(collection, Collection::Community);
                assert_eq!(page, 2);
                assert_eq!(cursor.as_deref(), Some("doc-00099"));
                assert!(matches!(source, StoreError::Unavailable(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn population_concatenates_in_requested_order() {
        let mut store = store_with(Collection::Student, 3);
        store.insert(Collection::Community, RawDocument::new("c-1", Map::new()));
        store.insert(Collection::StaffFaculty, RawDocument::new("s-1", Map::new()));

        let records = fetch_population(
            &store,
            &[Collection::Community, Collection::Student, Collection::StaffFaculty],
            2,
        )
        .await
        .unwrap();

        let origins: Vec<_> = records.iter().map(|record| record.collection).collect();
        assert_eq!(
            origins,
            vec![
                Collection::Community,
                Collection::Student,
                Collection::Student,
                Collection::Student,
                Collection::StaffFaculty,
            ]
        );
        assert_eq!(records[1].age.as_deref(), Some("20"));
    }

    #[tokio::test]
    async fn population_fails_when_any_collection_fails() {
        let store = FailingStore {
            inner: store_with(Collection::Student, 5),
            fail_on_request: 1,
            calls: AtomicUsize::new(0),
        };
        let result = fetch_population(&store, &Collection::ALL, 100).await;
        assert!(result.is_err());
    }

    #[test]
    fn snapshot_assigns_missing_ids() {
        let store = MemoryStore::from_snapshot_str(
            r#"{
                "student": [{ "$id": "b", "sex": "F" }, { "sex": "M" }],
                "community": [{ "id": 7 }]
            }"#,
        )
        .unwrap();
        assert_eq!(store.len(Collection::Student), 2);
        assert_eq!(store.len(Collection::Community), 1);
        assert_eq!(store.len(Collection::StaffFaculty), 0);
    }

    #[test]
    fn snapshot_reports_missing_file() {
        let path = std::env::temp_dir().join(format!("census-{}.json", uuid::Uuid::new_v4()));
        let error = MemoryStore::from_snapshot(&path).unwrap_err();
        assert!(matches!(error, StoreError::SnapshotIo { .. }));
    }
}
