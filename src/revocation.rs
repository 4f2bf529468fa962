// src/revocation.rs
//! Blacklist of signed-out tokens. Entries live exactly as long as the token
//! they revoke would have stayed valid.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RevocationError {
    #[error("revocation store did not answer within {0:?}")]
    Timeout(Duration),
    #[error("revocation store unavailable: {0}")]
    Unavailable(String),
}

/// Key under which a token is blacklisted. The raw token is never stored.
pub fn token_key(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("blacklist:{}", hex::encode(digest))
}

#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    /// Remembers `key` for `ttl`. A non-positive ttl means the token is
    /// already expired and there is nothing to revoke.
    async fn add(&self, key: &str, ttl: chrono::Duration) -> Result<(), RevocationError>;

    async fn is_revoked(&self, key: &str) -> Result<bool, RevocationError>;
}

struct PerEntryTtl;

impl Expiry<String, Duration> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        ttl: &Duration,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(*ttl)
    }
}

/// In-process blacklist backed by a moka cache with per-entry expiry.
/// The cache has no size bound: an entry leaves only when the token it
/// revokes would have expired.
#[derive(Clone)]
pub struct MokaBlacklist {
    cache: Cache<String, Duration>,
}

impl MokaBlacklist {
    pub fn new() -> Self {
        let cache = Cache::builder()
            .expire_after(PerEntryTtl)
            .build();
        MokaBlacklist { cache }
    }
}

impl Default for MokaBlacklist {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenBlacklist for MokaBlacklist {
    async fn add(&self, key: &str, ttl: chrono::Duration) -> Result<(), RevocationError> {
        let ttl = match ttl.to_std() {
            Ok(ttl) if !ttl.is_zero() => ttl,
            _ => return Ok(()),
        };
        self.cache.insert(key.to_string(), ttl).await;
        Ok(())
    }

    async fn is_revoked(&self, key: &str) -> Result<bool, RevocationError> {
        Ok(self.cache.get(key).await.is_some())
    }
}

/// Asks the blacklist with a deadline. Any failure counts as revoked.
pub async fn is_revoked_fail_closed(
    blacklist: &dyn TokenBlacklist,
    token: &str,
    timeout: Duration,
) -> bool {
    let key = token_key(token);
    match tokio::time::timeout(timeout, blacklist.is_revoked(&key)).await {
        Ok(Ok(revoked)) => revoked,
        Ok(Err(e)) => {
            tracing::warn!("Revocation check failed, rejecting token: {}", e);
            true
        }
        Err(_) => {
            tracing::warn!(
                "Revocation check failed, rejecting token: {}",
                RevocationError::Timeout(timeout)
            );
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    #[async_trait]
    impl TokenBlacklist for Broken {
        async fn add(&self, _key: &str, _ttl: chrono::Duration) -> Result<(), RevocationError> {
            Err(RevocationError::Unavailable("down".into()))
        }

        async fn is_revoked(&self, _key: &str) -> Result<bool, RevocationError> {
            Err(RevocationError::Unavailable("down".into()))
        }
    }

    struct Slow;

    #[async_trait]
    impl TokenBlacklist for Slow {
        async fn add(&self, _key: &str, _ttl: chrono::Duration) -> Result<(), RevocationError> {
            Ok(())
        }

        async fn is_revoked(&self, _key: &str) -> Result<bool, RevocationError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(false)
        }
    }

    #[test]
    fn key_is_a_hash_not_the_token() {
        let key = token_key("header.payload.signature");
        assert!(key.starts_with("blacklist:"));
        assert!(!key.contains("payload"));
        assert_eq!(key.len(), "blacklist:".len() + 64);
        assert_eq!(key, token_key("header.payload.signature"));
        assert_ne!(key, token_key("header.payload.signaturf"));
    }

    #[tokio::test]
    async fn added_keys_are_revoked() {
        let blacklist = MokaBlacklist::new();
        assert!(!blacklist.is_revoked("k").await.unwrap());
        blacklist.add("k", chrono::Duration::minutes(5)).await.unwrap();
        assert!(blacklist.is_revoked("k").await.unwrap());
    }

    #[tokio::test]
    async fn non_positive_ttl_is_a_no_op() {
        let blacklist = MokaBlacklist::new();
        blacklist.add("zero", chrono::Duration::zero()).await.unwrap();
        blacklist.add("neg", chrono::Duration::seconds(-30)).await.unwrap();
        assert!(!blacklist.is_revoked("zero").await.unwrap());
        assert!(!blacklist.is_revoked("neg").await.unwrap());
    }

    #[tokio::test]
    async fn entries_expire_with_their_ttl() {
        let blacklist = MokaBlacklist::new();
        blacklist
            .add("short", chrono::Duration::milliseconds(50))
            .await
            .unwrap();
        blacklist.add("long", chrono::Duration::minutes(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!blacklist.is_revoked("short").await.unwrap());
        assert!(blacklist.is_revoked("long").await.unwrap());
    }

    #[tokio::test]
    async fn many_revocations_are_all_remembered() {
        let blacklist = MokaBlacklist::new();
        let keys: Vec<String> = (0..5_000).map(|i| token_key(&format!("token-{}", i))).collect();
        for key in &keys {
            blacklist.add(key, chrono::Duration::minutes(30)).await.unwrap();
        }
        blacklist.cache.run_pending_tasks().await;

        for key in &keys {
            assert!(blacklist.is_revoked(key).await.unwrap(), "{} was forgotten", key);
        }
    }

    #[tokio::test]
    async fn failures_and_timeouts_fail_closed() {
        assert!(is_revoked_fail_closed(&Broken, "t", Duration::from_millis(100)).await);
        assert!(is_revoked_fail_closed(&Slow, "t", Duration::from_millis(20)).await);
        let healthy = MokaBlacklist::new();
        assert!(!is_revoked_fail_closed(&healthy, "t", Duration::from_millis(100)).await);
    }
}
