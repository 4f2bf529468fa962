// src/catalog.rs
use std::sync::Arc;

use crate::access::Actor;
use crate::blob::{self, BlobStore};
use crate::errors::{AppError, AppResult};
use crate::models::{NewPaint, Paint, PaintPatch};
use crate::store::Store;

fn validate(title: &str, hiding_power: f64) -> AppResult<()> {
    if title.trim().is_empty() {
        return Err(AppError::validation("title must not be empty"));
    }
    if !(hiding_power > 0.0) || !hiding_power.is_finite() {
        return Err(AppError::validation(format!(
            "invalid hiding power {}, must be greater than zero",
            hiding_power
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct PaintCatalog {
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
}

impl PaintCatalog {
    pub fn new(store: Arc<dyn Store>, blobs: Arc<dyn BlobStore>) -> Self {
        PaintCatalog { store, blobs }
    }

    pub async fn list(&self, title: Option<&str>) -> AppResult<Vec<Paint>> {
        let title = title.map(str::trim).filter(|t| !t.is_empty());
        Ok(self.store.list_paints(title).await?)
    }

    pub async fn get(&self, id: i64) -> AppResult<Paint> {
        match self.store.get_paint(id).await? {
            Some(paint) if !paint.is_deleted => Ok(paint),
            _ => Err(AppError::not_found(format!("paint {}", id))),
        }
    }

    pub async fn create(&self, actor: &Actor, paint: NewPaint) -> AppResult<Paint> {
        validate(&paint.title, paint.hiding_power)?;
        let created = self.store.create_paint(&paint).await?;
        tracing::info!(paint_id = created.id, user_id = %actor.user_id, "Paint created");
        Ok(created)
    }

    pub async fn update(&self, actor: &Actor, id: i64, patch: PaintPatch) -> AppResult<Paint> {
        let mut paint = self.get(id).await?;
        if let Some(title) = patch.title {
            paint.title = title;
        }
        if let Some(description) = patch.description {
            paint.description = description;
        }
        if let Some(hiding_power) = patch.hiding_power {
            paint.hiding_power = hiding_power;
        }
        validate(&paint.title, paint.hiding_power)?;

        let updated = self
            .store
            .update_paint(&paint)
            .await?
            .ok_or_else(|| AppError::not_found(format!("paint {}", id)))?;
        tracing::info!(paint_id = id, user_id = %actor.user_id, "Paint updated");
        Ok(updated)
    }

    /// Soft delete. The image goes first; if the blob store refuses, the
    /// paint stays visible and the error is returned. Once the image is gone
    /// the photo reference is cleared, so a retry after a failed flag write
    /// does not point at a missing object.
    pub async fn delete(&self, actor: &Actor, id: i64) -> AppResult<()> {
        let paint = self.get(id).await?;
        if let Some(photo) = &paint.photo {
            self.blobs.delete(photo).await?;
            self.store.set_paint_photo(id, None).await?;
        }
        if !self.store.soft_delete_paint(id).await? {
            return Err(AppError::not_found(format!("paint {}", id)));
        }
        tracing::info!(paint_id = id, user_id = %actor.user_id, "Paint deleted");
        Ok(())
    }

    pub async fn attach_image(
        &self,
        actor: &Actor,
        id: i64,
        bytes: Vec<u8>,
        content_type: &str,
        file_name: Option<&str>,
    ) -> AppResult<Paint> {
        if bytes.is_empty() {
            return Err(AppError::validation("image body is empty"));
        }
        let paint = self.get(id).await?;
        let key = blob::paint_image_key(id, file_name, content_type);

        self.blobs.put(&key, bytes, content_type).await?;
        let updated = self
            .store
            .set_paint_photo(id, Some(&key))
            .await?
            .ok_or_else(|| AppError::not_found(format!("paint {}", id)))?;

        if let Some(old) = paint.photo.filter(|old| *old != key) {
            if let Err(e) = self.blobs.delete(&old).await {
                tracing::warn!("Failed to remove replaced image {}: {}", old, e);
            }
        }
        tracing::info!(paint_id = id, user_id = %actor.user_id, "Paint image stored as {}", key);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BlobError, MemoryBlobStore};
    use crate::memory::MemoryStore;
    use crate::errors::StoreError;
    use crate::models::{PaintRequest, RequestLine, RequestStatus, User};
    use crate::store::{RequestQuery, StoreResult, Transition};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    struct RefusingBlobs;

    #[async_trait]
    impl BlobStore for RefusingBlobs {
        async fn put(&self, _key: &str, _bytes: Vec<u8>, _ct: &str) -> Result<(), BlobError> {
            Ok(())
        }

        async fn delete(&self, _key: &str) -> Result<(), BlobError> {
            Err(BlobError::Poisoned)
        }
    }

    /// Deletes succeed once per key; a second delete of the same key fails
    /// the way a gateway answering 404 would without special handling.
    #[derive(Default)]
    struct StrictBlobs {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BlobStore for StrictBlobs {
        async fn put(&self, _key: &str, _bytes: Vec<u8>, _ct: &str) -> Result<(), BlobError> {
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), BlobError> {
            let mut deleted = self.deleted.lock().map_err(|_| BlobError::Poisoned)?;
            if deleted.iter().any(|k| k == key) {
                return Err(BlobError::Poisoned);
            }
            deleted.push(key.to_string());
            Ok(())
        }
    }

    /// Memory store whose first soft delete fails.
    struct FlakyDelete {
        inner: MemoryStore,
        failed: AtomicBool,
    }

    #[async_trait]
    impl Store for FlakyDelete {
        async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
            self.inner.get_user(id).await
        }
        async fn get_user_by_login(&self, login: &str) -> StoreResult<Option<User>> {
            self.inner.get_user_by_login(login).await
        }
        async fn create_user(&self, user: &User) -> StoreResult<()> {
            self.inner.create_user(user).await
        }
        async fn update_user(&self, user: &User) -> StoreResult<()> {
            self.inner.update_user(user).await
        }
        async fn list_paints(&self, title: Option<&str>) -> StoreResult<Vec<Paint>> {
            self.inner.list_paints(title).await
        }
        async fn get_paint(&self, id: i64) -> StoreResult<Option<Paint>> {
            self.inner.get_paint(id).await
        }
        async fn get_paints(&self, ids: &[i64]) -> StoreResult<Vec<Paint>> {
            self.inner.get_paints(ids).await
        }
        async fn create_paint(&self, paint: &NewPaint) -> StoreResult<Paint> {
            self.inner.create_paint(paint).await
        }
        async fn update_paint(&self, paint: &Paint) -> StoreResult<Option<Paint>> {
            self.inner.update_paint(paint).await
        }
        async fn set_paint_photo(&self, id: i64, photo: Option<&str>) -> StoreResult<Option<Paint>> {
            self.inner.set_paint_photo(id, photo).await
        }
        async fn soft_delete_paint(&self, id: i64) -> StoreResult<bool> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(StoreError::Poisoned);
            }
            self.inner.soft_delete_paint(id).await
        }
        async fn find_draft(&self, creator_id: Uuid) -> StoreResult<Option<PaintRequest>> {
            self.inner.find_draft(creator_id).await
        }
        async fn insert_draft(&self, creator_id: Uuid, now: DateTime<Utc>) -> StoreResult<PaintRequest> {
            self.inner.insert_draft(creator_id, now).await
        }
        async fn get_request(&self, id: i64) -> StoreResult<Option<PaintRequest>> {
            self.inner.get_request(id).await
        }
        async fn list_requests(&self, query: &RequestQuery) -> StoreResult<Vec<PaintRequest>> {
            self.inner.list_requests(query).await
        }
        async fn set_min_layers(
            &self,
            id: i64,
            min_layers: i32,
            expected: RequestStatus,
        ) -> StoreResult<Option<PaintRequest>> {
            self.inner.set_min_layers(id, min_layers, expected).await
        }
        async fn transition(&self, transition: &Transition) -> StoreResult<Option<PaintRequest>> {
            self.inner.transition(transition).await
        }
        async fn list_lines(&self, request_id: i64) -> StoreResult<Vec<RequestLine>> {
            self.inner.list_lines(request_id).await
        }
        async fn count_lines(&self, request_id: i64) -> StoreResult<i64> {
            self.inner.count_lines(request_id).await
        }
        async fn insert_line(&self, line: &RequestLine, open: &[RequestStatus]) -> StoreResult<bool> {
            self.inner.insert_line(line, open).await
        }
        async fn update_line(
            &self,
            line: &RequestLine,
            open: &[RequestStatus],
        ) -> StoreResult<Option<RequestLine>> {
            self.inner.update_line(line, open).await
        }
        async fn delete_line(
            &self,
            request_id: i64,
            paint_id: i64,
            open: &[RequestStatus],
        ) -> StoreResult<bool> {
            self.inner.delete_line(request_id, paint_id, open).await
        }
    }

    fn actor() -> Actor {
        Actor::new(Uuid::new_v4(), false)
    }

    fn latex() -> NewPaint {
        NewPaint {
            title: "Latex White".into(),
            description: "Matte interior".into(),
            hiding_power: 1.5,
        }
    }

    fn catalog() -> (PaintCatalog, Arc<MemoryBlobStore>) {
        let blobs = Arc::new(MemoryBlobStore::new());
        let catalog = PaintCatalog::new(Arc::new(MemoryStore::new()), blobs.clone());
        (catalog, blobs)
    }

    #[tokio::test]
    async fn create_validates_title_and_hiding_power() {
        let (catalog, _) = catalog();
        let mut bad = latex();
        bad.title = "  ".into();
        assert!(matches!(catalog.create(&actor(), bad).await, Err(AppError::Validation(_))));

        let mut bad = latex();
        bad.hiding_power = 0.0;
        assert!(matches!(catalog.create(&actor(), bad).await, Err(AppError::Validation(_))));

        let created = catalog.create(&actor(), latex()).await.unwrap();
        assert_eq!(catalog.get(created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn update_merges_and_revalidates() {
        let (catalog, _) = catalog();
        let paint = catalog.create(&actor(), latex()).await.unwrap();

        let patch = PaintPatch {
            description: Some("Washable".into()),
            ..Default::default()
        };
        let updated = catalog.update(&actor(), paint.id, patch).await.unwrap();
        assert_eq!(updated.title, "Latex White");
        assert_eq!(updated.description, "Washable");

        let patch = PaintPatch {
            hiding_power: Some(-1.0),
            ..Default::default()
        };
        assert!(matches!(
            catalog.update(&actor(), paint.id, patch).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            catalog.update(&actor(), 999, PaintPatch::default()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_is_soft_and_removes_image() {
        let (catalog, blobs) = catalog();
        let paint = catalog.create(&actor(), latex()).await.unwrap();
        catalog
            .attach_image(&actor(), paint.id, vec![0xFF, 0xD8], "image/jpeg", None)
            .await
            .unwrap();
        assert_eq!(blobs.len(), 1);

        catalog.delete(&actor(), paint.id).await.unwrap();
        assert!(blobs.is_empty());
        assert!(matches!(catalog.get(paint.id).await, Err(AppError::NotFound(_))));
        assert!(catalog.list(None).await.unwrap().is_empty());
        assert!(matches!(
            catalog.delete(&actor(), paint.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn blob_failure_keeps_paint_visible() {
        let catalog = PaintCatalog::new(Arc::new(MemoryStore::new()), Arc::new(RefusingBlobs));
        let paint = catalog.create(&actor(), latex()).await.unwrap();
        catalog
            .attach_image(&actor(), paint.id, vec![1], "image/png", Some("a.png"))
            .await
            .unwrap();

        assert!(matches!(
            catalog.delete(&actor(), paint.id).await,
            Err(AppError::Internal(_))
        ));
        assert!(catalog.get(paint.id).await.is_ok());
    }

    #[tokio::test]
    async fn delete_retry_after_flag_failure_skips_the_gone_image() {
        let store = Arc::new(FlakyDelete {
            inner: MemoryStore::new(),
            failed: AtomicBool::new(false),
        });
        let blobs = Arc::new(StrictBlobs::default());
        let catalog = PaintCatalog::new(store, blobs.clone());
        let paint = catalog.create(&actor(), latex()).await.unwrap();
        catalog
            .attach_image(&actor(), paint.id, vec![1], "image/png", None)
            .await
            .unwrap();

        assert!(matches!(
            catalog.delete(&actor(), paint.id).await,
            Err(AppError::Internal(_))
        ));
        let survivor = catalog.get(paint.id).await.unwrap();
        assert_eq!(survivor.photo, None);

        catalog.delete(&actor(), paint.id).await.unwrap();
        assert!(matches!(catalog.get(paint.id).await, Err(AppError::NotFound(_))));
        assert_eq!(*blobs.deleted.lock().unwrap(), vec!["paint_1.png".to_string()]);
    }

    #[tokio::test]
    async fn replacing_an_image_drops_the_old_object() {
        let (catalog, blobs) = catalog();
        let paint = catalog.create(&actor(), latex()).await.unwrap();
        let first = catalog
            .attach_image(&actor(), paint.id, vec![1], "image/png", None)
            .await
            .unwrap();
        assert_eq!(first.photo.as_deref(), Some("paint_1.png"));

        let second = catalog
            .attach_image(&actor(), paint.id, vec![2], "image/jpeg", Some("wall.jpg"))
            .await
            .unwrap();
        assert_eq!(second.photo.as_deref(), Some("paint_1.jpg"));
        assert!(blobs.get("paint_1.png").is_none());
        assert_eq!(blobs.get("paint_1.jpg").unwrap().0, vec![2]);

        assert!(matches!(
            catalog
                .attach_image(&actor(), paint.id, Vec::new(), "image/png", None)
                .await,
            Err(AppError::Validation(_))
        ));
    }
}
