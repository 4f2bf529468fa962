// src/requests.rs
use actix_web::{HttpResponse, delete, get, put, web};
use serde_json::json;

use crate::AppState;
use crate::auth::{AuthUser, MaintenanceKey, MaybeUser, ModeratorUser};
use crate::errors::{AppError, AppResult};
use crate::models::{
    ChangeRequestBody, LinePatch, ModerateBody, QuantityUpdate, RequestFilter, RequestStatus,
};

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    // literal segment before the `{id}` pattern
    cfg.service(cart);
    cfg.service(list_requests);
    cfg.service(get_request);
    cfg.service(change_request);
    cfg.service(form_request);
    cfg.service(delete_request);
    cfg.service(moderate_request);
    cfg.service(set_paint_quantity);
    cfg.service(change_line);
    cfg.service(delete_line);
}

#[get("/requests/cart")]
pub async fn cart(state: web::Data<AppState>, user: MaybeUser) -> AppResult<HttpResponse> {
    let summary = state
        .requests
        .cart_summary(user.0.as_ref().map(|auth| &auth.actor))
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[get("/requests")]
pub async fn list_requests(
    state: web::Data<AppState>,
    auth: AuthUser,
    filter: web::Query<RequestFilter>,
) -> AppResult<HttpResponse> {
    let views = state
        .requests
        .list(&auth.actor, filter.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(views))
}

#[get("/requests/{id}")]
pub async fn get_request(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let details = state
        .requests
        .details(&auth.actor, path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(details))
}

#[put("/requests/{id}")]
pub async fn change_request(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<i64>,
    body: web::Json<ChangeRequestBody>,
) -> AppResult<HttpResponse> {
    let request = state
        .requests
        .change_request(&auth.actor, path.into_inner(), body.min_layers)
        .await?;
    Ok(HttpResponse::Ok().json(request))
}

#[put("/requests/{id}/form")]
pub async fn form_request(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let request = state.requests.form(&auth.actor, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(request))
}

#[delete("/requests/{id}")]
pub async fn delete_request(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let request = state.requests.delete(&auth.actor, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(request))
}

#[put("/requests/{id}/moderate")]
pub async fn moderate_request(
    state: web::Data<AppState>,
    moderator: ModeratorUser,
    path: web::Path<i64>,
    body: web::Json<ModerateBody>,
) -> AppResult<HttpResponse> {
    let target: RequestStatus = body
        .status
        .parse()
        .map_err(|e: crate::models::UnknownStatus| AppError::validation(e.to_string()))?;
    let request = state
        .requests
        .moderate(&moderator.0.actor, path.into_inner(), target)
        .await?;
    Ok(HttpResponse::Ok().json(request))
}

#[put("/requests/{id}/paint_quantity")]
pub async fn set_paint_quantity(
    state: web::Data<AppState>,
    _key: MaintenanceKey,
    path: web::Path<i64>,
    body: web::Json<QuantityUpdate>,
) -> AppResult<HttpResponse> {
    let line = state
        .requests
        .set_line_quantity(path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(line))
}

#[put("/request-paints/{request_id}/{paint_id}")]
pub async fn change_line(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<(i64, i64)>,
    body: web::Json<LinePatch>,
) -> AppResult<HttpResponse> {
    let (request_id, paint_id) = path.into_inner();
    let line = state
        .requests
        .change_line(&auth.actor, request_id, paint_id, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(line))
}

#[delete("/request-paints/{request_id}/{paint_id}")]
pub async fn delete_line(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<(i64, i64)>,
) -> AppResult<HttpResponse> {
    let (request_id, paint_id) = path.into_inner();
    let request = state
        .requests
        .remove_line(&auth.actor, request_id, paint_id)
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "removed",
        "request_id": request.id,
        "paint_id": paint_id,
    })))
}
