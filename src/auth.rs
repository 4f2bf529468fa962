// src/auth.rs
use std::sync::Arc;
use std::time::Duration as StdDuration;

use actix_web::dev::Payload;
use actix_web::{FromRequest, HttpRequest, HttpResponse, get, post, put, web};
use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use futures::future::LocalBoxFuture;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde_json::json;
use uuid::Uuid;

use crate::AppState;
use crate::access::{self, Actor};
use crate::errors::{AppError, AppResult};
use crate::models::{Claims, LoginRequest, ProfileUpdate, RegisterRequest, SignInResponse, User};
use crate::revocation::{self, TokenBlacklist};
use crate::store::Store;

pub const MAINTENANCE_HEADER: &str = "X-Maintenance-Key";
const MAX_LOGIN_LEN: usize = 50;

pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(register);
    cfg.service(sign_in);
    cfg.service(sign_out);
    cfg.service(get_profile);
    cfg.service(update_profile);
}

/// Signs and checks HS256 session tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        TokenIssuer {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, user: &User) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            is_moderator: user.is_moderator,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(|e| {
            tracing::error!("Token generation error: {}", e);
            AppError::internal("token generation failed")
        })
    }

    /// Checks signature and expiry. Revocation is checked separately.
    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Rejected token: {}", e);
                AppError::Unauthorized
            })
    }
}

fn validate_login(login: &str) -> AppResult<()> {
    if login.trim().is_empty() {
        return Err(AppError::validation("login must not be empty"));
    }
    if login.chars().count() > MAX_LOGIN_LEN {
        return Err(AppError::validation(format!(
            "login must be at most {} characters",
            MAX_LOGIN_LEN
        )));
    }
    Ok(())
}

fn validate_password(password: &str) -> AppResult<()> {
    if password.is_empty() {
        return Err(AppError::validation("password must not be empty"));
    }
    Ok(())
}

/// A request authenticated by a valid, unrevoked bearer token.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub actor: Actor,
    pub token: String,
    pub claims: Claims,
}

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn Store>,
    issuer: TokenIssuer,
    blacklist: Arc<dyn TokenBlacklist>,
    revocation_timeout: StdDuration,
    bcrypt_cost: u32,
}

impl UserService {
    pub fn new(
        store: Arc<dyn Store>,
        issuer: TokenIssuer,
        blacklist: Arc<dyn TokenBlacklist>,
        revocation_timeout: StdDuration,
        bcrypt_cost: u32,
    ) -> Self {
        UserService {
            store,
            issuer,
            blacklist,
            revocation_timeout,
            bcrypt_cost,
        }
    }

    fn hash_password(&self, password: &str) -> AppResult<String> {
        hash(password, self.bcrypt_cost).map_err(|e| {
            tracing::error!("Password hashing error: {}", e);
            AppError::internal("password hashing failed")
        })
    }

    pub async fn register(&self, body: RegisterRequest) -> AppResult<User> {
        validate_login(&body.login)?;
        validate_password(&body.password)?;

        let user = User {
            id: Uuid::new_v4(),
            login: body.login,
            password_hash: self.hash_password(&body.password)?,
            is_moderator: false,
        };
        self.store.create_user(&user).await?;
        tracing::info!(user_id = %user.id, "User registered as {}", user.login);
        Ok(user)
    }

    pub async fn sign_in(&self, body: LoginRequest) -> AppResult<SignInResponse> {
        let user = self
            .store
            .get_user_by_login(&body.login)
            .await?
            .ok_or(AppError::Unauthorized)?;
        match verify(&body.password, &user.password_hash) {
            Ok(true) => {}
            Ok(false) => return Err(AppError::Unauthorized),
            Err(e) => {
                tracing::warn!("Stored hash for {} could not be checked: {}", user.id, e);
                return Err(AppError::Unauthorized);
            }
        }
        let token = self.issuer.issue(&user)?;
        tracing::info!(user_id = %user.id, "User signed in");
        Ok(SignInResponse { token, user })
    }

    /// Blacklists the token for the rest of its lifetime.
    pub async fn sign_out(&self, auth: &AuthUser) -> AppResult<()> {
        let ttl = Duration::seconds(auth.claims.exp - Utc::now().timestamp());
        self.blacklist
            .add(&revocation::token_key(&auth.token), ttl)
            .await?;
        tracing::info!(user_id = %auth.actor.user_id, "User signed out");
        Ok(())
    }

    pub async fn authenticate(&self, token: &str) -> AppResult<AuthUser> {
        let claims = self.issuer.verify(token)?;
        if revocation::is_revoked_fail_closed(self.blacklist.as_ref(), token, self.revocation_timeout)
            .await
        {
            return Err(AppError::Unauthorized);
        }
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthorized)?;
        Ok(AuthUser {
            actor: Actor::new(user_id, claims.is_moderator),
            token: token.to_string(),
            claims,
        })
    }

    pub async fn profile(&self, actor: &Actor) -> AppResult<User> {
        access::current_user(self.store.as_ref(), actor).await
    }

    pub async fn update_profile(&self, actor: &Actor, update: ProfileUpdate) -> AppResult<User> {
        let mut user = access::current_user(self.store.as_ref(), actor).await?;
        if let Some(login) = update.login {
            validate_login(&login)?;
            user.login = login;
        }
        if let Some(password) = update.password {
            validate_password(&password)?;
            user.password_hash = self.hash_password(&password)?;
        }
        user.is_moderator = access::resolve_role_change(&user, update.is_moderator);

        self.store.update_user(&user).await?;
        tracing::info!(user_id = %user.id, "Profile updated");
        Ok(user)
    }
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn app_state(req: &HttpRequest) -> AppResult<web::Data<AppState>> {
    req.app_data::<web::Data<AppState>>()
        .cloned()
        .ok_or_else(|| AppError::internal("application state not configured"))
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let state = app_state(req);
        let token = bearer_token(req);
        Box::pin(async move {
            let state = state?;
            let token = token.ok_or(AppError::Unauthorized)?;
            state.users.authenticate(&token).await
        })
    }
}

/// Authenticated caller, or `None` for anonymous or unusable tokens.
pub struct MaybeUser(pub Option<AuthUser>);

impl FromRequest for MaybeUser {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let state = app_state(req);
        let token = bearer_token(req);
        Box::pin(async move {
            let state = state?;
            let Some(token) = token else {
                return Ok(MaybeUser(None));
            };
            Ok(MaybeUser(state.users.authenticate(&token).await.ok()))
        })
    }
}

/// Coarse gate on the token's role claim. Handlers behind it still check
/// the persisted role before doing anything privileged.
pub struct ModeratorUser(pub AuthUser);

impl FromRequest for ModeratorUser {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, payload: &mut Payload) -> Self::Future {
        let auth = AuthUser::from_request(req, payload);
        Box::pin(async move {
            let auth = auth.await?;
            if !auth.actor.claims_moderator {
                return Err(AppError::not_allowed("moderator role required"));
            }
            Ok(ModeratorUser(auth))
        })
    }
}

/// Caller holding the shared maintenance key.
pub struct MaintenanceKey;

impl FromRequest for MaintenanceKey {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let state = app_state(req);
        let presented = req
            .headers()
            .get(MAINTENANCE_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);
        Box::pin(async move {
            let state = state?;
            match presented {
                Some(key) if !state.maintenance_key.is_empty() && key == state.maintenance_key => {
                    Ok(MaintenanceKey)
                }
                _ => {
                    tracing::warn!("Rejected maintenance call without a valid key");
                    Err(AppError::Unauthorized)
                }
            }
        })
    }
}

#[post("/users/register")]
pub async fn register(
    state: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> AppResult<HttpResponse> {
    let user = state.users.register(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(user))
}

#[post("/users/signin")]
pub async fn sign_in(
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> AppResult<HttpResponse> {
    let response = state.users.sign_in(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

#[post("/users/signout")]
pub async fn sign_out(state: web::Data<AppState>, auth: AuthUser) -> AppResult<HttpResponse> {
    state.users.sign_out(&auth).await?;
    Ok(HttpResponse::Ok().json(json!({"status": "signed_out"})))
}

#[get("/users/profile")]
pub async fn get_profile(state: web::Data<AppState>, auth: AuthUser) -> AppResult<HttpResponse> {
    let user = state.users.profile(&auth.actor).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[put("/users/profile")]
pub async fn update_profile(
    state: web::Data<AppState>,
    auth: AuthUser,
    body: web::Json<ProfileUpdate>,
) -> AppResult<HttpResponse> {
    let user = state
        .users
        .update_profile(&auth.actor, body.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(user))
}
