// src/db.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{NewPaint, Paint, PaintRequest, RequestLine, RequestStatus, User};
use crate::store::{RequestQuery, Store, StoreResult, Transition};

const PAINT_COLUMNS: &str = "id, title, description, hiding_power, photo, is_deleted";
const REQUEST_COLUMNS: &str =
    "id, status, date_create, date_form, date_finish, creator_id, moderator_id, min_layers";
const LINE_COLUMNS: &str = "request_id, paint_id, area, layers, quantity";

/// Substring pattern for `ILIKE ... ESCAPE '\'` that matches `title` literally.
fn contains_pattern(title: &str) -> String {
    let mut pattern = String::with_capacity(title.len() + 2);
    pattern.push('%');
    for c in title.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn status_names(statuses: &[RequestStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, login, password_hash, is_moderator FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user_by_login(&self, login: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, login, password_hash, is_moderator FROM users WHERE login = $1",
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn create_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO users (id, login, password_hash, is_moderator) VALUES ($1, $2, $3, $4)",
        )
        .bind(user.id)
        .bind(&user.login)
        .bind(&user.password_hash)
        .bind(user.is_moderator)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_insert(e, &format!("user {}", user.login)))?;
        Ok(())
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            "UPDATE users SET login = $2, password_hash = $3, is_moderator = $4 WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.login)
        .bind(&user.password_hash)
        .bind(user.is_moderator)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_insert(e, &format!("user {}", user.login)))?;
        Ok(())
    }

    async fn list_paints(&self, title: Option<&str>) -> StoreResult<Vec<Paint>> {
        let paints = match title {
            Some(title) => {
                sqlx::query_as::<_, Paint>(&format!(
                    "SELECT {PAINT_COLUMNS} FROM paints \
                     WHERE is_deleted = false AND title ILIKE $1 ESCAPE '\\' ORDER BY id"
                ))
                .bind(contains_pattern(title))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Paint>(&format!(
                    "SELECT {PAINT_COLUMNS} FROM paints WHERE is_deleted = false ORDER BY id"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(paints)
    }

    async fn get_paint(&self, id: i64) -> StoreResult<Option<Paint>> {
        let paint =
            sqlx::query_as::<_, Paint>(&format!("SELECT {PAINT_COLUMNS} FROM paints WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(paint)
    }

    async fn get_paints(&self, ids: &[i64]) -> StoreResult<Vec<Paint>> {
        let paints = sqlx::query_as::<_, Paint>(&format!(
            "SELECT {PAINT_COLUMNS} FROM paints WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(paints)
    }

    async fn create_paint(&self, paint: &NewPaint) -> StoreResult<Paint> {
        let created = sqlx::query_as::<_, Paint>(&format!(
            "INSERT INTO paints (title, description, hiding_power) VALUES ($1, $2, $3) \
             RETURNING {PAINT_COLUMNS}"
        ))
        .bind(&paint.title)
        .bind(&paint.description)
        .bind(paint.hiding_power)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn update_paint(&self, paint: &Paint) -> StoreResult<Option<Paint>> {
        let updated = sqlx::query_as::<_, Paint>(&format!(
            "UPDATE paints SET title = $2, description = $3, hiding_power = $4 \
             WHERE id = $1 AND is_deleted = false RETURNING {PAINT_COLUMNS}"
        ))
        .bind(paint.id)
        .bind(&paint.title)
        .bind(&paint.description)
        .bind(paint.hiding_power)
        .fetch_optional(&self.pool)
        .await?;
        Ok(updated)
    }

    async fn set_paint_photo(&self, id: i64, photo: Option<&str>) -> StoreResult<Option<Paint>> {
        let updated = sqlx::query_as::<_, Paint>(&format!(
            "UPDATE paints SET photo = $2 WHERE id = $1 AND is_deleted = false \
             RETURNING {PAINT_COLUMNS}"
        ))
        .bind(id)
        .bind(photo)
        .fetch_optional(&self.pool)
        .await?;
        Ok(updated)
    }

    async fn soft_delete_paint(&self, id: i64) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE paints SET is_deleted = true WHERE id = $1 AND is_deleted = false")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_draft(&self, creator_id: Uuid) -> StoreResult<Option<PaintRequest>> {
        let request = sqlx::query_as::<_, PaintRequest>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM paint_requests \
             WHERE creator_id = $1 AND status = 'draft' LIMIT 1"
        ))
        .bind(creator_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(request)
    }

    async fn insert_draft(&self, creator_id: Uuid, now: DateTime<Utc>) -> StoreResult<PaintRequest> {
        // paint_requests_one_draft_per_creator turns a concurrent second draft
        // into a unique violation.
        let request = sqlx::query_as::<_, PaintRequest>(&format!(
            "INSERT INTO paint_requests (status, date_create, creator_id) \
             VALUES ('draft', $1, $2) RETURNING {REQUEST_COLUMNS}"
        ))
        .bind(now)
        .bind(creator_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::from_insert(e, &format!("draft for {}", creator_id)))?;
        Ok(request)
    }

    async fn get_request(&self, id: i64) -> StoreResult<Option<PaintRequest>> {
        let request = sqlx::query_as::<_, PaintRequest>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM paint_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(request)
    }

    async fn list_requests(&self, query: &RequestQuery) -> StoreResult<Vec<PaintRequest>> {
        let requests = sqlx::query_as::<_, PaintRequest>(&format!(
            "SELECT {REQUEST_COLUMNS} FROM paint_requests \
             WHERE status NOT IN ('draft', 'deleted') \
               AND ($1::timestamptz IS NULL OR date_create >= $1) \
               AND ($2::timestamptz IS NULL OR date_create < $2) \
               AND ($3::text IS NULL OR status = $3) \
               AND ($4::uuid IS NULL OR creator_id = $4) \
             ORDER BY id"
        ))
        .bind(query.created_from)
        .bind(query.created_before)
        .bind(query.status.map(RequestStatus::as_str))
        .bind(query.creator_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(requests)
    }

    async fn set_min_layers(
        &self,
        id: i64,
        min_layers: i32,
        expected: RequestStatus,
    ) -> StoreResult<Option<PaintRequest>> {
        let updated = sqlx::query_as::<_, PaintRequest>(&format!(
            "UPDATE paint_requests SET min_layers = $2 WHERE id = $1 AND status = $3 \
             RETURNING {REQUEST_COLUMNS}"
        ))
        .bind(id)
        .bind(min_layers)
        .bind(expected.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(updated)
    }

    async fn transition(&self, transition: &Transition) -> StoreResult<Option<PaintRequest>> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, PaintRequest>(&format!(
            "UPDATE paint_requests SET status = $3, \
                 date_form = COALESCE($4, date_form), \
                 date_finish = COALESCE($5, date_finish), \
                 moderator_id = COALESCE($6, moderator_id) \
             WHERE id = $1 AND status = $2 \
             RETURNING {REQUEST_COLUMNS}"
        ))
        .bind(transition.request_id)
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(transition.date_form)
        .bind(transition.date_finish)
        .bind(transition.moderator_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(updated) = updated else {
            tx.rollback().await?;
            return Ok(None);
        };

        for &(paint_id, quantity) in &transition.quantities {
            sqlx::query(
                "UPDATE request_paints SET quantity = $3 WHERE request_id = $1 AND paint_id = $2",
            )
            .bind(transition.request_id)
            .bind(paint_id)
            .bind(quantity)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn list_lines(&self, request_id: i64) -> StoreResult<Vec<RequestLine>> {
        let lines = sqlx::query_as::<_, RequestLine>(&format!(
            "SELECT {LINE_COLUMNS} FROM request_paints WHERE request_id = $1 ORDER BY paint_id"
        ))
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(lines)
    }

    async fn count_lines(&self, request_id: i64) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM request_paints WHERE request_id = $1")
            .bind(request_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn insert_line(&self, line: &RequestLine, open: &[RequestStatus]) -> StoreResult<bool> {
        // The primary key on (request_id, paint_id) is the duplicate check.
        let result = sqlx::query(
            "INSERT INTO request_paints (request_id, paint_id, area, layers, quantity) \
             SELECT $1, $2, $3, $4, $5 \
             WHERE EXISTS (SELECT 1 FROM paint_requests WHERE id = $1 AND status = ANY($6))",
        )
        .bind(line.request_id)
        .bind(line.paint_id)
        .bind(line.area)
        .bind(line.layers)
        .bind(line.quantity)
        .bind(status_names(open))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            StoreError::from_insert(
                e,
                &format!("paint {} in request {}", line.paint_id, line.request_id),
            )
        })?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_line(
        &self,
        line: &RequestLine,
        open: &[RequestStatus],
    ) -> StoreResult<Option<RequestLine>> {
        let updated = sqlx::query_as::<_, RequestLine>(&format!(
            "UPDATE request_paints SET area = $3, layers = $4, quantity = $5 \
             WHERE request_id = $1 AND paint_id = $2 \
               AND EXISTS (SELECT 1 FROM paint_requests WHERE id = $1 AND status = ANY($6)) \
             RETURNING {LINE_COLUMNS}"
        ))
        .bind(line.request_id)
        .bind(line.paint_id)
        .bind(line.area)
        .bind(line.layers)
        .bind(line.quantity)
        .bind(status_names(open))
        .fetch_optional(&self.pool)
        .await?;
        Ok(updated)
    }

    async fn delete_line(
        &self,
        request_id: i64,
        paint_id: i64,
        open: &[RequestStatus],
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "DELETE FROM request_paints WHERE request_id = $1 AND paint_id = $2 \
               AND EXISTS (SELECT 1 FROM paint_requests WHERE id = $1 AND status = ANY($3))",
        )
        .bind(request_id)
        .bind(paint_id)
        .bind(status_names(open))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_filter_matches_wildcards_literally() {
        assert_eq!(contains_pattern("latex"), "%latex%");
        assert_eq!(contains_pattern("100%"), "%100\\%%");
        assert_eq!(contains_pattern("a_b"), "%a\\_b%");
        assert_eq!(contains_pattern("c:\\paint"), "%c:\\\\paint%");
        assert_eq!(contains_pattern(""), "%%");
    }
}
