//! In-memory remote catalog
//!
//! Implements [`RemoteCatalog`] over a `Vec` kept in creation order, with
//! switches to inject failures into each operation. Quota usage tracks the
//! objects added, deleted and created so a test observes the same
//! accounting a real store would do.

use super::{
    ByteStream, CatalogError, CreateRequest, CreatedObject, QuotaSnapshot, RemoteCatalog,
    RemoteObject,
};
use async_trait::async_trait;
use futures::TryStreamExt;
use parking_lot::Mutex;
use std::collections::HashSet;

#[derive(Debug, Default)]
struct State {
    limit: Option<u64>,
    used: u64,
    objects: Vec<RemoteObject>,
    uploads: Vec<StoredUpload>,
    deleted: Vec<String>,
    list_calls: usize,
    fail_quota: bool,
    fail_list: bool,
    fail_create: bool,
    fail_delete: HashSet<String>,
    page_size: Option<usize>,
    next_id: u64,
}

/// An upload received by [`MemoryCatalog::create`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    pub id: String,
    pub name: String,
    pub parent_id: String,
    pub shared_destination: bool,
    pub content: Vec<u8>,
}

/// In-memory catalog
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: Mutex<State>,
}

impl MemoryCatalog {
    /// Create an empty catalog with the given quota
    pub fn new(quota: QuotaSnapshot) -> Self {
        Self {
            state: Mutex::new(State {
                limit: quota.limit,
                used: quota.used,
                ..State::default()
            }),
        }
    }

    /// Append an object as the newest entry
    ///
    /// The object's size is assumed to be already counted in `used`.
    pub fn add_object(&self, id: &str, name: &str, size: u64) {
        self.state
            .lock()
            .objects
            .push(RemoteObject::new(id, name, size));
    }

    /// Limit every listing to `page_size` objects
    pub fn set_page_size(&self, page_size: usize) {
        self.state.lock().page_size = Some(page_size);
    }

    pub fn fail_quota(&self) {
        self.state.lock().fail_quota = true;
    }

    pub fn fail_list(&self) {
        self.state.lock().fail_list = true;
    }

    pub fn fail_create(&self) {
        self.state.lock().fail_create = true;
    }

    /// Make deletion of `id` fail with a permission error
    pub fn fail_delete(&self, id: &str) {
        self.state.lock().fail_delete.insert(id.to_string());
    }

    /// Ids deleted so far, in deletion order
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    /// Objects still present, oldest first
    pub fn objects(&self) -> Vec<RemoteObject> {
        self.state.lock().objects.clone()
    }

    /// Uploads received so far
    pub fn uploads(&self) -> Vec<StoredUpload> {
        self.state.lock().uploads.clone()
    }

    /// Number of `list_owned` calls served
    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    /// Current quota
    pub fn quota(&self) -> QuotaSnapshot {
        let state = self.state.lock();
        QuotaSnapshot::new(state.limit, state.used)
    }
}

#[async_trait]
impl RemoteCatalog for MemoryCatalog {
    async fn get_quota(&self) -> Result<QuotaSnapshot, CatalogError> {
        let state = self.state.lock();
        if state.fail_quota {
            return Err(CatalogError::Api {
                status: 500,
                message: "quota backend unavailable".into(),
            });
        }
        Ok(QuotaSnapshot::new(state.limit, state.used))
    }

    async fn list_owned(&self) -> Result<Vec<RemoteObject>, CatalogError> {
        let mut state = self.state.lock();
        state.list_calls += 1;
        if state.fail_list {
            return Err(CatalogError::Api {
                status: 500,
                message: "listing backend unavailable".into(),
            });
        }
        let take = state.page_size.unwrap_or(usize::MAX);
        Ok(state.objects.iter().take(take).cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<(), CatalogError> {
        let mut state = self.state.lock();
        if state.fail_delete.contains(id) {
            return Err(CatalogError::Api {
                status: 403,
                message: format!("insufficient permissions to delete {}", id),
            });
        }
        let position = state
            .objects
            .iter()
            .position(|object| object.id == id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))?;
        let object = state.objects.remove(position);
        state.used = state.used.saturating_sub(object.size);
        state.deleted.push(object.id);
        Ok(())
    }

    async fn create(
        &self,
        request: CreateRequest,
        content: ByteStream,
    ) -> Result<CreatedObject, CatalogError> {
        if self.state.lock().fail_create {
            return Err(CatalogError::Api {
                status: 500,
                message: "upload backend unavailable".into(),
            });
        }

        let chunks: Vec<bytes::Bytes> = content.try_collect().await?;
        let content: Vec<u8> = chunks.concat();

        let mut state = self.state.lock();
        let size = content.len() as u64;
        if let Some(limit) = state.limit {
            if state.used.saturating_add(size) > limit {
                return Err(CatalogError::QuotaExceeded);
            }
        }

        state.next_id += 1;
        let id = format!("mem-{}", state.next_id);
        state.used += size;
        state
            .objects
            .push(RemoteObject::new(id.clone(), request.name.clone(), size));
        state.uploads.push(StoredUpload {
            id: id.clone(),
            name: request.name.clone(),
            parent_id: request.parent_id,
            shared_destination: request.shared_destination,
            content,
        });

        Ok(CreatedObject {
            id,
            name: request.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;

    fn body(data: &'static [u8]) -> ByteStream {
        Box::pin(stream::iter(vec![Ok(Bytes::from_static(data))]))
    }

    fn request(name: &str) -> CreateRequest {
        CreateRequest {
            name: name.into(),
            parent_id: "folder".into(),
            size: 0,
            shared_destination: false,
        }
    }

    #[tokio::test]
    async fn test_delete_releases_quota() {
        let catalog = MemoryCatalog::new(QuotaSnapshot::new(Some(100), 90));
        catalog.add_object("a", "a.zip", 40);

        catalog.delete("a").await.unwrap();

        assert_eq!(catalog.quota().used, 50);
        assert_eq!(catalog.deleted(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_missing_object_is_not_found() {
        let catalog = MemoryCatalog::new(QuotaSnapshot::new(Some(100), 0));
        let err = catalog.delete("ghost").await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_create_rejects_over_quota() {
        let catalog = MemoryCatalog::new(QuotaSnapshot::new(Some(4), 0));
        let err = catalog
            .create(request("big.bin"), body(b"too large"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::QuotaExceeded));
        assert!(catalog.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_create_appends_newest_object() {
        let catalog = MemoryCatalog::new(QuotaSnapshot::new(None, 0));
        catalog.add_object("old", "old.zip", 1);

        let created = catalog.create(request("new.txt"), body(b"hi")).await.unwrap();

        let listed = catalog.list_owned().await.unwrap();
        assert_eq!(listed.last().unwrap().id, created.id);
        assert_eq!(catalog.uploads()[0].content, b"hi");
    }

    #[tokio::test]
    async fn test_page_size_limits_listing() {
        let catalog = MemoryCatalog::new(QuotaSnapshot::new(None, 0));
        catalog.add_object("1", "one", 1);
        catalog.add_object("2", "two", 1);
        catalog.set_page_size(1);

        let listed = catalog.list_owned().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "1");
    }
}
