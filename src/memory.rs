// src/memory.rs
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{NewPaint, Paint, PaintRequest, RequestLine, RequestStatus, User};
use crate::store::{RequestQuery, Store, StoreResult, Transition};

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    paints: BTreeMap<i64, Paint>,
    requests: BTreeMap<i64, PaintRequest>,
    lines: BTreeMap<(i64, i64), RequestLine>,
    next_paint_id: i64,
    next_request_id: i64,
}

impl State {
    fn login_taken(&self, login: &str, except: Option<Uuid>) -> bool {
        self.users
            .values()
            .any(|u| u.login == login && Some(u.id) != except)
    }

    fn request_open(&self, request_id: i64, open: &[RequestStatus]) -> bool {
        self.requests
            .get(&request_id)
            .is_some_and(|r| open.contains(&r.status))
    }
}

/// Store kept entirely in process memory, with the same uniqueness and
/// conditional-write rules as the Postgres schema.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn get_user_by_login(&self, login: &str) -> StoreResult<Option<User>> {
        Ok(self.lock()?.users.values().find(|u| u.login == login).cloned())
    }

    async fn create_user(&self, user: &User) -> StoreResult<()> {
        let mut state = self.lock()?;
        if state.login_taken(&user.login, None) || state.users.contains_key(&user.id) {
            return Err(StoreError::Conflict(format!("user {}", user.login)));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut state = self.lock()?;
        if state.login_taken(&user.login, Some(user.id)) {
            return Err(StoreError::Conflict(format!("user {}", user.login)));
        }
        if let Some(existing) = state.users.get_mut(&user.id) {
            *existing = user.clone();
        }
        Ok(())
    }

    async fn list_paints(&self, title: Option<&str>) -> StoreResult<Vec<Paint>> {
        let needle = title.map(str::to_lowercase);
        let state = self.lock()?;
        Ok(state
            .paints
            .values()
            .filter(|p| !p.is_deleted)
            .filter(|p| match &needle {
                Some(needle) => p.title.to_lowercase().contains(needle.as_str()),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn get_paint(&self, id: i64) -> StoreResult<Option<Paint>> {
        Ok(self.lock()?.paints.get(&id).cloned())
    }

    async fn get_paints(&self, ids: &[i64]) -> StoreResult<Vec<Paint>> {
        let state = self.lock()?;
        Ok(state
            .paints
            .values()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn create_paint(&self, paint: &NewPaint) -> StoreResult<Paint> {
        let mut state = self.lock()?;
        state.next_paint_id += 1;
        let created = Paint {
            id: state.next_paint_id,
            title: paint.title.clone(),
            description: paint.description.clone(),
            hiding_power: paint.hiding_power,
            photo: None,
            is_deleted: false,
        };
        state.paints.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_paint(&self, paint: &Paint) -> StoreResult<Option<Paint>> {
        let mut state = self.lock()?;
        Ok(match state.paints.get_mut(&paint.id) {
            Some(existing) if !existing.is_deleted => {
                existing.title = paint.title.clone();
                existing.description = paint.description.clone();
                existing.hiding_power = paint.hiding_power;
                Some(existing.clone())
            }
            _ => None,
        })
    }

    async fn set_paint_photo(&self, id: i64, photo: Option<&str>) -> StoreResult<Option<Paint>> {
        let mut state = self.lock()?;
        Ok(match state.paints.get_mut(&id) {
            Some(existing) if !existing.is_deleted => {
                existing.photo = photo.map(str::to_string);
                Some(existing.clone())
            }
            _ => None,
        })
    }

    async fn soft_delete_paint(&self, id: i64) -> StoreResult<bool> {
        let mut state = self.lock()?;
        Ok(match state.paints.get_mut(&id) {
            Some(existing) if !existing.is_deleted => {
                existing.is_deleted = true;
                true
            }
            _ => false,
        })
    }

    async fn find_draft(&self, creator_id: Uuid) -> StoreResult<Option<PaintRequest>> {
        let state = self.lock()?;
        Ok(state
            .requests
            .values()
            .find(|r| r.creator_id == creator_id && r.status == RequestStatus::Draft)
            .cloned())
    }

    async fn insert_draft(&self, creator_id: Uuid, now: DateTime<Utc>) -> StoreResult<PaintRequest> {
        let mut state = self.lock()?;
        let exists = state
            .requests
            .values()
            .any(|r| r.creator_id == creator_id && r.status == RequestStatus::Draft);
        if exists {
            return Err(StoreError::Conflict(format!("draft for {}", creator_id)));
        }
        state.next_request_id += 1;
        let request = PaintRequest {
            id: state.next_request_id,
            status: RequestStatus::Draft,
            date_create: now,
            date_form: None,
            date_finish: None,
            creator_id,
            moderator_id: None,
            min_layers: 1,
        };
        state.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get_request(&self, id: i64) -> StoreResult<Option<PaintRequest>> {
        Ok(self.lock()?.requests.get(&id).cloned())
    }

    async fn list_requests(&self, query: &RequestQuery) -> StoreResult<Vec<PaintRequest>> {
        let state = self.lock()?;
        Ok(state
            .requests
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect())
    }

    async fn set_min_layers(
        &self,
        id: i64,
        min_layers: i32,
        expected: RequestStatus,
    ) -> StoreResult<Option<PaintRequest>> {
        let mut state = self.lock()?;
        Ok(match state.requests.get_mut(&id) {
            Some(request) if request.status == expected => {
                request.min_layers = min_layers;
                Some(request.clone())
            }
            _ => None,
        })
    }

    async fn transition(&self, transition: &Transition) -> StoreResult<Option<PaintRequest>> {
        let mut state = self.lock()?;
        let updated = match state.requests.get_mut(&transition.request_id) {
            Some(request) if request.status == transition.from => {
                request.status = transition.to;
                if transition.date_form.is_some() {
                    request.date_form = transition.date_form;
                }
                if transition.date_finish.is_some() {
                    request.date_finish = transition.date_finish;
                }
                if transition.moderator_id.is_some() {
                    request.moderator_id = transition.moderator_id;
                }
                request.clone()
            }
            _ => return Ok(None),
        };
        for (paint_id, quantity) in &transition.quantities {
            if let Some(line) = state.lines.get_mut(&(transition.request_id, *paint_id)) {
                line.quantity = *quantity;
            }
        }
        Ok(Some(updated))
    }

    async fn list_lines(&self, request_id: i64) -> StoreResult<Vec<RequestLine>> {
        let state = self.lock()?;
        Ok(state
            .lines
            .range((request_id, i64::MIN)..=(request_id, i64::MAX))
            .map(|(_, line)| line.clone())
            .collect())
    }

    async fn count_lines(&self, request_id: i64) -> StoreResult<i64> {
        let state = self.lock()?;
        let count = state
            .lines
            .range((request_id, i64::MIN)..=(request_id, i64::MAX))
            .count();
        Ok(count as i64)
    }

    async fn insert_line(&self, line: &RequestLine, open: &[RequestStatus]) -> StoreResult<bool> {
        let mut state = self.lock()?;
        let key = (line.request_id, line.paint_id);
        if state.lines.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "paint {} in request {}",
                line.paint_id, line.request_id
            )));
        }
        if !state.request_open(line.request_id, open) {
            return Ok(false);
        }
        state.lines.insert(key, line.clone());
        Ok(true)
    }

    async fn update_line(
        &self,
        line: &RequestLine,
        open: &[RequestStatus],
    ) -> StoreResult<Option<RequestLine>> {
        let mut state = self.lock()?;
        if !state.request_open(line.request_id, open) {
            return Ok(None);
        }
        Ok(match state.lines.get_mut(&(line.request_id, line.paint_id)) {
            Some(existing) => {
                *existing = line.clone();
                Some(existing.clone())
            }
            None => None,
        })
    }

    async fn delete_line(
        &self,
        request_id: i64,
        paint_id: i64,
        open: &[RequestStatus],
    ) -> StoreResult<bool> {
        let mut state = self.lock()?;
        if !state.request_open(request_id, open) {
            return Ok(false);
        }
        Ok(state.lines.remove(&(request_id, paint_id)).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(login: &str) -> User {
        User {
            id: Uuid::new_v4(),
            login: login.to_string(),
            password_hash: "hash".to_string(),
            is_moderator: false,
        }
    }

    #[tokio::test]
    async fn second_draft_for_creator_conflicts() {
        let store = MemoryStore::new();
        let creator = Uuid::new_v4();
        let first = store.insert_draft(creator, Utc::now()).await.unwrap();
        let err = store.insert_draft(creator, Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.find_draft(creator).await.unwrap().unwrap().id, first.id);

        let other = store.insert_draft(Uuid::new_v4(), Utc::now()).await.unwrap();
        assert_ne!(other.id, first.id);
    }

    #[tokio::test]
    async fn duplicate_logins_conflict() {
        let store = MemoryStore::new();
        store.create_user(&user("anna")).await.unwrap();
        assert!(matches!(
            store.create_user(&user("anna")).await,
            Err(StoreError::Conflict(_))
        ));

        let mut bob = user("bob");
        store.create_user(&bob).await.unwrap();
        bob.login = "anna".into();
        assert!(matches!(store.update_user(&bob).await, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn transition_is_compare_and_swap() {
        let store = MemoryStore::new();
        let request = store.insert_draft(Uuid::new_v4(), Utc::now()).await.unwrap();
        let form = Transition {
            request_id: request.id,
            from: RequestStatus::Draft,
            to: RequestStatus::Formed,
            date_form: Some(Utc::now()),
            date_finish: None,
            moderator_id: None,
            quantities: Vec::new(),
        };
        let formed = store.transition(&form).await.unwrap().unwrap();
        assert_eq!(formed.status, RequestStatus::Formed);
        assert!(formed.date_form.is_some());
        assert!(store.transition(&form).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn line_writes_respect_open_states() {
        let store = MemoryStore::new();
        let paint = store
            .create_paint(&NewPaint {
                title: "Latex White".into(),
                description: String::new(),
                hiding_power: 1.5,
            })
            .await
            .unwrap();
        let request = store.insert_draft(Uuid::new_v4(), Utc::now()).await.unwrap();
        let line = RequestLine {
            request_id: request.id,
            paint_id: paint.id,
            area: 10.0,
            layers: 2,
            quantity: 0.0,
        };
        assert!(store.insert_line(&line, &[RequestStatus::Draft]).await.unwrap());
        assert!(matches!(
            store.insert_line(&line, &[RequestStatus::Draft]).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(store.update_line(&line, &[RequestStatus::Formed]).await.unwrap().is_none());
        assert!(!store.delete_line(request.id, paint.id, &[RequestStatus::Formed]).await.unwrap());
        assert_eq!(store.count_lines(request.id).await.unwrap(), 1);
        assert!(store.delete_line(request.id, paint.id, &[RequestStatus::Draft]).await.unwrap());
        assert_eq!(store.count_lines(request.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn title_filter_is_case_insensitive_and_skips_deleted() {
        let store = MemoryStore::new();
        for title in ["Latex White", "Oil Black", "latex grey"] {
            store
                .create_paint(&NewPaint {
                    title: title.into(),
                    description: String::new(),
                    hiding_power: 1.0,
                })
                .await
                .unwrap();
        }
        assert_eq!(store.list_paints(Some("LATEX")).await.unwrap().len(), 2);
        assert!(store.soft_delete_paint(1).await.unwrap());
        assert!(!store.soft_delete_paint(1).await.unwrap());
        let left = store.list_paints(Some("latex")).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].title, "latex grey");
        assert_eq!(store.list_paints(None).await.unwrap().len(), 2);
    }
}
