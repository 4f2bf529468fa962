// src/store.rs
//! Persistence seam. `db::PgStore` is the production implementation,
//! `memory::MemoryStore` keeps everything in process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{NewPaint, Paint, PaintRequest, RequestLine, RequestStatus, User};

pub type StoreResult<T> = Result<T, StoreError>;

/// Filter for client-facing request listings. Drafts and deleted requests
/// are never returned.
#[derive(Clone, Debug, Default)]
pub struct RequestQuery {
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub created_before: Option<DateTime<Utc>>,
    pub status: Option<RequestStatus>,
    pub creator_id: Option<Uuid>,
}

impl RequestQuery {
    pub fn matches(&self, request: &PaintRequest) -> bool {
        if matches!(request.status, RequestStatus::Draft | RequestStatus::Deleted) {
            return false;
        }
        if self.created_from.is_some_and(|from| request.date_create < from) {
            return false;
        }
        if self.created_before.is_some_and(|to| request.date_create >= to) {
            return false;
        }
        if self.status.is_some_and(|status| request.status != status) {
            return false;
        }
        if self.creator_id.is_some_and(|creator| request.creator_id != creator) {
            return false;
        }
        true
    }
}

/// A conditional status write: applied only while the request is still in
/// `from`. Line quantities, if any, are written in the same unit of work.
#[derive(Clone, Debug)]
pub struct Transition {
    pub request_id: i64,
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub date_form: Option<DateTime<Utc>>,
    pub date_finish: Option<DateTime<Utc>>,
    pub moderator_id: Option<Uuid>,
    pub quantities: Vec<(i64, f64)>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // users
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn get_user_by_login(&self, login: &str) -> StoreResult<Option<User>>;
    /// Fails with `StoreError::Conflict` when the login is taken.
    async fn create_user(&self, user: &User) -> StoreResult<()>;
    /// Fails with `StoreError::Conflict` when the login is taken.
    async fn update_user(&self, user: &User) -> StoreResult<()>;

    // paints
    async fn list_paints(&self, title: Option<&str>) -> StoreResult<Vec<Paint>>;
    /// Returns soft-deleted paints too.
    async fn get_paint(&self, id: i64) -> StoreResult<Option<Paint>>;
    async fn get_paints(&self, ids: &[i64]) -> StoreResult<Vec<Paint>>;
    async fn create_paint(&self, paint: &NewPaint) -> StoreResult<Paint>;
    /// Overwrites title, description and hiding power of a live paint.
    async fn update_paint(&self, paint: &Paint) -> StoreResult<Option<Paint>>;
    async fn set_paint_photo(&self, id: i64, photo: Option<&str>) -> StoreResult<Option<Paint>>;
    /// Returns false when the paint is missing or already deleted.
    async fn soft_delete_paint(&self, id: i64) -> StoreResult<bool>;

    // requests
    async fn find_draft(&self, creator_id: Uuid) -> StoreResult<Option<PaintRequest>>;
    /// Fails with `StoreError::Conflict` when the creator already has a draft.
    async fn insert_draft(&self, creator_id: Uuid, now: DateTime<Utc>) -> StoreResult<PaintRequest>;
    async fn get_request(&self, id: i64) -> StoreResult<Option<PaintRequest>>;
    async fn list_requests(&self, query: &RequestQuery) -> StoreResult<Vec<PaintRequest>>;
    async fn set_min_layers(
        &self,
        id: i64,
        min_layers: i32,
        expected: RequestStatus,
    ) -> StoreResult<Option<PaintRequest>>;
    /// `None` when the request is no longer in `transition.from`.
    async fn transition(&self, transition: &Transition) -> StoreResult<Option<PaintRequest>>;

    // lines; writes apply only while the parent request is in one of `open`
    async fn list_lines(&self, request_id: i64) -> StoreResult<Vec<RequestLine>>;
    async fn count_lines(&self, request_id: i64) -> StoreResult<i64>;
    /// Fails with `StoreError::Conflict` when the pair already exists.
    async fn insert_line(&self, line: &RequestLine, open: &[RequestStatus]) -> StoreResult<bool>;
    async fn update_line(
        &self,
        line: &RequestLine,
        open: &[RequestStatus],
    ) -> StoreResult<Option<RequestLine>>;
    async fn delete_line(
        &self,
        request_id: i64,
        paint_id: i64,
        open: &[RequestStatus],
    ) -> StoreResult<bool>;
}
