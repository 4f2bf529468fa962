// src/lib.rs
use std::sync::Arc;
use std::time::Duration as StdDuration;

use actix_web::web;

pub mod access;
pub mod auth;
pub mod blob;
pub mod catalog;
pub mod config;
pub mod db;
pub mod errors;
pub mod lifecycle;
pub mod memory;
pub mod models;
pub mod paints;
pub mod quantity;
pub mod requests;
pub mod revocation;
pub mod store;

use crate::auth::{TokenIssuer, UserService};
use crate::blob::BlobStore;
use crate::catalog::PaintCatalog;
use crate::config::Config;
use crate::errors::AppError;
use crate::lifecycle::RequestLifecycle;
use crate::revocation::TokenBlacklist;
use crate::store::Store;

pub const API_PREFIX: &str = "/api/v1";
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Services shared by every worker.
pub struct AppState {
    pub catalog: PaintCatalog,
    pub requests: RequestLifecycle,
    pub users: UserService,
    pub maintenance_key: String,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        blobs: Arc<dyn BlobStore>,
        blacklist: Arc<dyn TokenBlacklist>,
    ) -> Self {
        let issuer = TokenIssuer::new(
            &config.jwt_secret,
            chrono::Duration::minutes(config.jwt_ttl_minutes),
        );
        AppState {
            catalog: PaintCatalog::new(store.clone(), blobs),
            requests: RequestLifecycle::new(store.clone(), config.line_edit_policy),
            users: UserService::new(
                store,
                issuer,
                blacklist,
                StdDuration::from_millis(config.revocation_timeout_ms),
                config.bcrypt_cost,
            ),
            maintenance_key: config.maintenance_key.clone(),
        }
    }
}

/// Mounts every route under `/api/v1`, with extractor failures rendered as
/// the usual error body.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| AppError::validation(err.to_string()).into()),
    );
    cfg.app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| AppError::validation(err.to_string()).into()),
    );
    cfg.app_data(
        web::PathConfig::default()
            .error_handler(|err, _req| AppError::validation(err.to_string()).into()),
    );
    cfg.app_data(web::PayloadConfig::new(MAX_IMAGE_BYTES));
    cfg.service(
        web::scope(API_PREFIX)
            .configure(paints::init_routes)
            .configure(requests::init_routes)
            .configure(auth::init_routes),
    );
}
