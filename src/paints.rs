// src/paints.rs
use actix_web::http::header::CONTENT_TYPE;
use actix_web::{HttpRequest, HttpResponse, delete, get, post, put, web};
use serde::Deserialize;
use serde_json::json;

use crate::AppState;
use crate::auth::AuthUser;
use crate::errors::{AppError, AppResult};
use crate::models::{AddLineRequest, NewPaint, PaintPatch};

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(list_paints);
    cfg.service(get_paint);
    cfg.service(create_paint);
    cfg.service(update_paint);
    cfg.service(delete_paint);
    cfg.service(upload_image);
    cfg.service(add_to_request);
}

#[derive(Deserialize)]
pub struct TitleQuery {
    pub title: Option<String>,
}

#[derive(Deserialize)]
pub struct ImageQuery {
    pub filename: Option<String>,
}

#[get("/paints")]
pub async fn list_paints(
    state: web::Data<AppState>,
    query: web::Query<TitleQuery>,
) -> AppResult<HttpResponse> {
    let paints = state.catalog.list(query.title.as_deref()).await?;
    Ok(HttpResponse::Ok().json(paints))
}

#[get("/paints/{id}")]
pub async fn get_paint(state: web::Data<AppState>, path: web::Path<i64>) -> AppResult<HttpResponse> {
    let paint = state.catalog.get(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(paint))
}

#[post("/paints")]
pub async fn create_paint(
    state: web::Data<AppState>,
    auth: AuthUser,
    body: web::Json<NewPaint>,
) -> AppResult<HttpResponse> {
    let paint = state.catalog.create(&auth.actor, body.into_inner()).await?;
    Ok(HttpResponse::Created().json(paint))
}

#[put("/paints/{id}")]
pub async fn update_paint(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<i64>,
    body: web::Json<PaintPatch>,
) -> AppResult<HttpResponse> {
    let paint = state
        .catalog
        .update(&auth.actor, path.into_inner(), body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(paint))
}

#[delete("/paints/{id}")]
pub async fn delete_paint(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    state.catalog.delete(&auth.actor, id).await?;
    Ok(HttpResponse::Ok().json(json!({"status": "deleted", "id": id})))
}

/// Raw image body; the object extension comes from `?filename=` or the
/// `Content-Type` header.
#[post("/paints/{id}/image")]
pub async fn upload_image(
    state: web::Data<AppState>,
    auth: AuthUser,
    req: HttpRequest,
    path: web::Path<i64>,
    query: web::Query<ImageQuery>,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    if !content_type.starts_with("image/") {
        return Err(AppError::validation(format!(
            "expected an image, got {}",
            content_type
        )));
    }

    let paint = state
        .catalog
        .attach_image(
            &auth.actor,
            path.into_inner(),
            body.to_vec(),
            &content_type,
            query.filename.as_deref(),
        )
        .await?;
    Ok(HttpResponse::Ok().json(paint))
}

#[post("/paints/{id}/add-to")]
pub async fn add_to_request(
    state: web::Data<AppState>,
    auth: AuthUser,
    path: web::Path<i64>,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    // an empty body adds the paint with no area yet
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        AddLineRequest {
            area: 0.0,
            layers: 1,
        }
    } else {
        serde_json::from_slice::<AddLineRequest>(&body)
            .map_err(|e| AppError::validation(format!("invalid line body: {}", e)))?
    };
    let line = state
        .requests
        .add_paint(&auth.actor, path.into_inner(), body)
        .await?;
    Ok(HttpResponse::Created().json(line))
}
