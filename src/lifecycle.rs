// src/lifecycle.rs
//! Paint request state machine and its lines.
//!
//! ```text
//! draft --form--> formed --moderate--> completed | rejected
//!   \--delete--> deleted
//! ```
//!
//! Every status write is conditional on the status it was validated
//! against, so two racing callers cannot both move the same request.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Days, NaiveTime, Utc};
use uuid::Uuid;

use crate::access::{self, Actor};
use crate::config::LineEditPolicy;
use crate::errors::{AppError, AppResult, StoreError};
use crate::models::{
    AddLineRequest, CartSummary, LinePatch, Paint, PaintRequest, QuantityUpdate, RequestDetails,
    RequestFilter, RequestLine, RequestStatus, RequestView,
};
use crate::quantity;
use crate::store::{RequestQuery, Store, Transition};

const NON_DELETED: &[RequestStatus] = &[
    RequestStatus::Draft,
    RequestStatus::Formed,
    RequestStatus::Completed,
    RequestStatus::Rejected,
];

const ALL_STATES: [RequestStatus; 5] = [
    RequestStatus::Draft,
    RequestStatus::Formed,
    RequestStatus::Completed,
    RequestStatus::Rejected,
    RequestStatus::Deleted,
];

impl LineEditPolicy {
    /// States in which the creator may still add, change or remove lines.
    pub fn editable_states(self) -> Vec<RequestStatus> {
        match self {
            LineEditPolicy::DraftOnly => vec![RequestStatus::Draft],
            LineEditPolicy::DraftAndFormed => vec![RequestStatus::Draft, RequestStatus::Formed],
            LineEditPolicy::AnyOpen => ALL_STATES
                .into_iter()
                .filter(|s| !s.is_terminal())
                .collect(),
        }
    }
}

fn check_transition(request: &PaintRequest, target: RequestStatus) -> AppResult<()> {
    if !request.status.can_transition_to(target) {
        return Err(AppError::not_allowed(format!(
            "request {} is {} and cannot become {}",
            request.id, request.status, target
        )));
    }
    Ok(())
}

fn lost_race(request_id: i64) -> AppError {
    AppError::not_allowed(format!("request {} was changed concurrently", request_id))
}

fn validate_area(area: f64) -> AppResult<()> {
    if !(area >= 0.0) || !area.is_finite() {
        return Err(AppError::validation(format!("invalid area {}", area)));
    }
    Ok(())
}

fn validate_layers(layers: i32) -> AppResult<()> {
    if layers < 1 {
        return Err(AppError::validation(format!("invalid layer count {}", layers)));
    }
    Ok(())
}

fn validate_quantity(quantity: f64) -> AppResult<()> {
    if !(quantity >= 0.0) || !quantity.is_finite() {
        return Err(AppError::validation(format!("invalid quantity {}", quantity)));
    }
    Ok(())
}

/// Checks that a draft is complete enough to be submitted.
fn validate_for_forming(request: &PaintRequest, lines: &[RequestLine]) -> AppResult<()> {
    if request.min_layers <= 0 {
        return Err(AppError::validation("minimum layer count not specified"));
    }
    if lines.is_empty() {
        return Err(AppError::validation("request has no paints"));
    }
    for line in lines {
        validate_formed_line(request, line)?;
    }
    Ok(())
}

/// Line rules that hold from forming onwards.
fn validate_formed_line(request: &PaintRequest, line: &RequestLine) -> AppResult<()> {
    if line.area == 0.0 {
        return Err(AppError::validation(format!(
            "area not specified for paint {}",
            line.paint_id
        )));
    }
    if line.layers < request.min_layers {
        return Err(AppError::validation(format!(
            "paint {} needs at least {} layers",
            line.paint_id, request.min_layers
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct RequestLifecycle {
    store: Arc<dyn Store>,
    policy: LineEditPolicy,
}

impl RequestLifecycle {
    pub fn new(store: Arc<dyn Store>, policy: LineEditPolicy) -> Self {
        RequestLifecycle { store, policy }
    }

    /// Loads a request that has not been deleted.
    async fn live_request(&self, id: i64) -> AppResult<PaintRequest> {
        match self.store.get_request(id).await? {
            Some(request) if request.status != RequestStatus::Deleted => Ok(request),
            _ => Err(AppError::not_found(format!("request {}", id))),
        }
    }

    /// Loads a request the actor owns and whose lines may still change.
    async fn editable_request(&self, actor: &Actor, id: i64) -> AppResult<PaintRequest> {
        let request = self.live_request(id).await?;
        access::require_creator(actor, &request)?;
        if !self.policy.editable_states().contains(&request.status) {
            return Err(AppError::not_allowed(format!(
                "lines of a {} request cannot be changed",
                request.status
            )));
        }
        Ok(request)
    }

    async fn find_line(&self, request_id: i64, paint_id: i64) -> AppResult<RequestLine> {
        self.store
            .list_lines(request_id)
            .await?
            .into_iter()
            .find(|line| line.paint_id == paint_id)
            .ok_or_else(|| {
                AppError::not_found(format!("paint {} in request {}", paint_id, request_id))
            })
    }

    async fn view(
        &self,
        request: PaintRequest,
        logins: &mut HashMap<Uuid, String>,
    ) -> AppResult<RequestView> {
        let creator_login = self.login_of(request.creator_id, logins).await?;
        let moderator_login = match request.moderator_id {
            Some(id) => Some(self.login_of(id, logins).await?),
            None => None,
        };
        Ok(RequestView {
            request,
            creator_login,
            moderator_login,
        })
    }

    async fn login_of(&self, id: Uuid, logins: &mut HashMap<Uuid, String>) -> AppResult<String> {
        if let Some(login) = logins.get(&id) {
            return Ok(login.clone());
        }
        let user = self
            .store
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::internal(format!("request references missing user {}", id)))?;
        logins.insert(id, user.login.clone());
        Ok(user.login)
    }

    /// Returns the actor's draft, creating it if needed. A concurrent creator
    /// losing the insert race re-reads the winner's draft.
    pub async fn get_or_create_draft(&self, actor: &Actor) -> AppResult<PaintRequest> {
        if let Some(draft) = self.store.find_draft(actor.user_id).await? {
            return Ok(draft);
        }
        match self.store.insert_draft(actor.user_id, Utc::now()).await {
            Ok(draft) => {
                tracing::info!(request_id = draft.id, user_id = %actor.user_id, "Draft created");
                Ok(draft)
            }
            Err(StoreError::Conflict(_)) => self
                .store
                .find_draft(actor.user_id)
                .await?
                .ok_or_else(|| AppError::internal("draft conflict but no draft found")),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn current_draft(&self, actor: &Actor) -> AppResult<PaintRequest> {
        self.store
            .find_draft(actor.user_id)
            .await?
            .ok_or(AppError::NoDraft)
    }

    pub async fn cart_summary(&self, actor: Option<&Actor>) -> AppResult<CartSummary> {
        let Some(actor) = actor else {
            return Ok(CartSummary::no_draft());
        };
        let draft = match self.current_draft(actor).await {
            Ok(draft) => draft,
            Err(AppError::NoDraft) => return Ok(CartSummary::no_draft()),
            Err(e) => return Err(e),
        };
        let paints_count = self.store.count_lines(draft.id).await?;
        if paints_count == 0 {
            return Ok(CartSummary::no_draft());
        }
        Ok(CartSummary {
            status: "draft",
            id: Some(draft.id),
            paints_count,
        })
    }

    pub async fn add_paint(
        &self,
        actor: &Actor,
        paint_id: i64,
        body: AddLineRequest,
    ) -> AppResult<RequestLine> {
        validate_area(body.area)?;
        validate_layers(body.layers)?;

        let paint = match self.store.get_paint(paint_id).await? {
            Some(paint) if !paint.is_deleted => paint,
            _ => return Err(AppError::not_found(format!("paint {}", paint_id))),
        };
        let draft = self.get_or_create_draft(actor).await?;

        let line = RequestLine {
            request_id: draft.id,
            paint_id,
            area: body.area,
            layers: body.layers,
            quantity: quantity::provisional(paint.hiding_power, body.area, body.layers),
        };
        if !self
            .store
            .insert_line(&line, &self.policy.editable_states())
            .await?
        {
            return Err(lost_race(draft.id));
        }
        tracing::info!(request_id = draft.id, paint_id, "Paint added to request");
        Ok(line)
    }

    pub async fn change_line(
        &self,
        actor: &Actor,
        request_id: i64,
        paint_id: i64,
        patch: LinePatch,
    ) -> AppResult<RequestLine> {
        let request = self.editable_request(actor, request_id).await?;
        let mut line = self.find_line(request_id, paint_id).await?;

        if let Some(area) = patch.area {
            validate_area(area)?;
            line.area = area;
        }
        if let Some(layers) = patch.layers {
            validate_layers(layers)?;
            line.layers = layers;
        }
        match patch.quantity {
            Some(quantity) => {
                validate_quantity(quantity)?;
                line.quantity = quantity;
            }
            None => {
                if let Some(paint) = self.store.get_paint(paint_id).await? {
                    line.quantity = quantity::provisional(paint.hiding_power, line.area, line.layers);
                }
            }
        }
        if request.status == RequestStatus::Formed {
            validate_formed_line(&request, &line)?;
        }

        self.store
            .update_line(&line, &self.policy.editable_states())
            .await?
            .ok_or_else(|| lost_race(request_id))
    }

    pub async fn remove_line(
        &self,
        actor: &Actor,
        request_id: i64,
        paint_id: i64,
    ) -> AppResult<PaintRequest> {
        let request = self.editable_request(actor, request_id).await?;
        self.find_line(request_id, paint_id).await?;
        if !self
            .store
            .delete_line(request_id, paint_id, &self.policy.editable_states())
            .await?
        {
            return Err(lost_race(request_id));
        }
        tracing::info!(request_id, paint_id, "Paint removed from request");
        Ok(request)
    }

    pub async fn change_request(
        &self,
        actor: &Actor,
        id: i64,
        min_layers: i32,
    ) -> AppResult<PaintRequest> {
        if min_layers <= 0 {
            return Err(AppError::validation(format!(
                "invalid minimum layer count {}",
                min_layers
            )));
        }
        let request = self.live_request(id).await?;
        access::require_creator(actor, &request)?;
        if request.status != RequestStatus::Draft {
            return Err(AppError::not_allowed(format!(
                "request {} is {} and can no longer be edited",
                id, request.status
            )));
        }
        self.store
            .set_min_layers(id, min_layers, RequestStatus::Draft)
            .await?
            .ok_or_else(|| lost_race(id))
    }

    pub async fn form(&self, actor: &Actor, id: i64) -> AppResult<PaintRequest> {
        let request = self.live_request(id).await?;
        check_transition(&request, RequestStatus::Formed)?;
        access::require_creator(actor, &request)?;

        let lines = self.store.list_lines(id).await?;
        validate_for_forming(&request, &lines)?;

        let formed = self
            .store
            .transition(&Transition {
                request_id: id,
                from: RequestStatus::Draft,
                to: RequestStatus::Formed,
                date_form: Some(Utc::now()),
                date_finish: None,
                moderator_id: None,
                quantities: Vec::new(),
            })
            .await?
            .ok_or_else(|| lost_race(id))?;
        tracing::info!(request_id = id, user_id = %actor.user_id, "Request formed");
        Ok(formed)
    }

    /// Abandons a draft. Unlike forming, the lines are not validated.
    pub async fn delete(&self, actor: &Actor, id: i64) -> AppResult<PaintRequest> {
        let request = self.live_request(id).await?;
        check_transition(&request, RequestStatus::Deleted)?;
        access::require_creator(actor, &request)?;

        let deleted = self
            .store
            .transition(&Transition {
                request_id: id,
                from: RequestStatus::Draft,
                to: RequestStatus::Deleted,
                date_form: None,
                date_finish: Some(Utc::now()),
                moderator_id: None,
                quantities: Vec::new(),
            })
            .await?
            .ok_or_else(|| lost_race(id))?;
        tracing::info!(request_id = id, user_id = %actor.user_id, "Request deleted");
        Ok(deleted)
    }

    /// Completes or rejects a formed request. Completion recomputes every
    /// line's quantity; status and quantities are written together.
    pub async fn moderate(
        &self,
        actor: &Actor,
        id: i64,
        target: RequestStatus,
    ) -> AppResult<PaintRequest> {
        if !matches!(target, RequestStatus::Completed | RequestStatus::Rejected) {
            return Err(AppError::validation(format!(
                "moderation status must be completed or rejected, got {}",
                target
            )));
        }
        let request = self.live_request(id).await?;
        check_transition(&request, target)?;
        let moderator = access::require_moderator(self.store.as_ref(), actor).await?;

        let mut quantities = Vec::new();
        if target == RequestStatus::Completed {
            let lines = self.store.list_lines(id).await?;
            let ids: Vec<i64> = lines.iter().map(|l| l.paint_id).collect();
            let paints: HashMap<i64, Paint> = self
                .store
                .get_paints(&ids)
                .await?
                .into_iter()
                .map(|p| (p.id, p))
                .collect();
            for line in &lines {
                let paint = paints.get(&line.paint_id).ok_or_else(|| {
                    AppError::internal(format!("line references missing paint {}", line.paint_id))
                })?;
                let quantity = quantity::calculate(paint.hiding_power, line.area, line.layers)?;
                quantities.push((line.paint_id, quantity));
            }
        }

        let moderated = self
            .store
            .transition(&Transition {
                request_id: id,
                from: RequestStatus::Formed,
                to: target,
                date_form: None,
                date_finish: Some(Utc::now()),
                moderator_id: Some(moderator.id),
                quantities,
            })
            .await?
            .ok_or_else(|| lost_race(id))?;
        tracing::info!(request_id = id, moderator_id = %moderator.id, status = %target, "Request moderated");
        Ok(moderated)
    }

    /// Quantity written by the maintenance integration. Callers must have
    /// checked the maintenance credential.
    pub async fn set_line_quantity(
        &self,
        request_id: i64,
        update: QuantityUpdate,
    ) -> AppResult<RequestLine> {
        validate_quantity(update.quantity)?;
        self.live_request(request_id).await?;
        let mut line = self.find_line(request_id, update.paint_id).await?;
        line.quantity = update.quantity;
        let updated = self
            .store
            .update_line(&line, NON_DELETED)
            .await?
            .ok_or_else(|| lost_race(request_id))?;
        tracing::info!(request_id, paint_id = update.paint_id, "Line quantity set by maintenance");
        Ok(updated)
    }

    pub async fn list(&self, actor: &Actor, filter: RequestFilter) -> AppResult<Vec<RequestView>> {
        let user = access::current_user(self.store.as_ref(), actor).await?;

        if let (Some(from), Some(to)) = (filter.from_date, filter.to_date) {
            if from > to {
                return Err(AppError::validation("from-date is after to-date"));
            }
        }
        let query = RequestQuery {
            created_from: filter
                .from_date
                .map(|d| d.and_time(NaiveTime::MIN).and_utc()),
            created_before: match filter.to_date {
                Some(d) => Some(
                    d.checked_add_days(Days::new(1))
                        .ok_or_else(|| AppError::validation("to-date out of range"))?
                        .and_time(NaiveTime::MIN)
                        .and_utc(),
                ),
                None => None,
            },
            status: filter.status,
            creator_id: (!user.is_moderator).then_some(user.id),
        };

        let requests = self.store.list_requests(&query).await?;
        let mut logins = HashMap::new();
        let mut views = Vec::with_capacity(requests.len());
        for request in requests {
            views.push(self.view(request, &mut logins).await?);
        }
        Ok(views)
    }

    pub async fn details(&self, actor: &Actor, id: i64) -> AppResult<RequestDetails> {
        let user = access::current_user(self.store.as_ref(), actor).await?;
        let request = self.live_request(id).await?;
        if !access::can_view(&user, &request) {
            return Err(AppError::not_allowed(format!(
                "request {} belongs to another user",
                id
            )));
        }

        let lines = self.store.list_lines(id).await?;
        let ids: Vec<i64> = lines.iter().map(|l| l.paint_id).collect();
        let paints = self.store.get_paints(&ids).await?;
        let mut logins = HashMap::new();
        Ok(RequestDetails {
            request: self.view(request, &mut logins).await?,
            paints,
            lines,
        })
    }
}
