use std::future::Future;

use rand::Rng;
use redis::{aio::MultiplexedConnection, AsyncCommands};

use crate::error::AppError;

/// Minimal key/value cache with expiry, as needed by the code store.
pub trait CodeCache {
    fn put(&self, key: &str, value: &str, ttl_secs: u64) -> impl Future<Output = anyhow::Result<()>> + Send;
    fn fetch(&self, key: &str) -> impl Future<Output = anyhow::Result<Option<String>>> + Send;
}

impl CodeCache for MultiplexedConnection {
    async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> anyhow::Result<()> {
        let mut conn = self.clone();
        AsyncCommands::set_ex::<_, _, ()>(&mut conn, key, value, ttl_secs).await?;
        Ok(())
    }

    async fn fetch(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.clone();
        Ok(AsyncCommands::get::<_, Option<String>>(&mut conn, key).await?)
    }
}

/// What a verification code is for. Each purpose has its own key space
/// and lifetime so parallel flows for one address never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodePurpose {
    Register,
    UpdatePassword,
    UpdateUser,
}

impl CodePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodePurpose::Register => "register",
            CodePurpose::UpdatePassword => "update-password",
            CodePurpose::UpdateUser => "update-user",
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        match self {
            CodePurpose::Register => 5 * 60,
            CodePurpose::UpdatePassword | CodePurpose::UpdateUser => 10 * 60,
        }
    }

    pub fn key(&self, recipient: &str) -> String {
        format!("captcha:{}:{}", self.as_str(), normalize_recipient(recipient))
    }
}

pub fn normalize_recipient(recipient: &str) -> String {
    recipient.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCheck {
    Valid,
    /// Never issued, or its TTL has lapsed.
    Absent,
    Mismatch,
}

impl CodeCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, CodeCheck::Valid)
    }
}

/// Six decimal digits, zero padded. Not meant to resist a local attacker
/// who can observe the RNG; it only proves mailbox access.
pub fn generate_code() -> String {
    let code: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{code:06}")
}

/// Generate a code, store it for the purpose's TTL and return it for delivery.
pub async fn issue<C: CodeCache>(cache: &C, purpose: CodePurpose, recipient: &str) -> anyhow::Result<String> {
    let code = generate_code();
    cache.put(&purpose.key(recipient), &code, purpose.ttl_secs()).await?;
    tracing::info!(purpose = purpose.as_str(), "verification code issued");
    Ok(code)
}

/// Compare `submitted` with the stored code. The stored code is left in
/// place; it stays usable until it expires.
pub async fn check<C: CodeCache>(
    cache: &C,
    purpose: CodePurpose,
    recipient: &str,
    submitted: &str,
) -> anyhow::Result<CodeCheck> {
    let stored = cache.fetch(&purpose.key(recipient)).await?;
    Ok(match stored {
        None => CodeCheck::Absent,
        Some(code) if code == submitted.trim() => CodeCheck::Valid,
        Some(_) => CodeCheck::Mismatch,
    })
}

pub async fn require<C: CodeCache>(
    cache: &C,
    purpose: CodePurpose,
    recipient: &str,
    submitted: &str,
) -> Result<(), AppError> {
    match check(cache, purpose, recipient, submitted).await? {
        CodeCheck::Valid => Ok(()),
        CodeCheck::Absent => Err(AppError::VerificationCodeExpired),
        CodeCheck::Mismatch => Err(AppError::VerificationCodeMismatch),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;

    /// In-memory cache honouring expiry against the tokio clock.
    #[derive(Default)]
    pub(crate) struct MemoryCache {
        entries: Mutex<HashMap<String, (String, Instant)>>,
    }

    impl MemoryCache {
        pub(crate) fn raw(&self, key: &str) -> Option<String> {
            self.entries.lock().unwrap().get(key).map(|(v, _)| v.clone())
        }
    }

    impl CodeCache for MemoryCache {
        async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> anyhow::Result<()> {
            let expires = Instant::now() + Duration::from_secs(ttl_secs);
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), (value.to_string(), expires));
            Ok(())
        }

        async fn fetch(&self, key: &str) -> anyhow::Result<Option<String>> {
            let mut entries = self.entries.lock().unwrap();
            match entries.get(key) {
                Some((_, expires)) if *expires <= Instant::now() => {
                    entries.remove(key);
                    Ok(None)
                }
                Some((value, _)) => Ok(Some(value.clone())),
                None => Ok(None),
            }
        }
    }

    #[test]
    fn test_generated_codes_are_six_digits() {
        for _ in 0..200 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_keys_are_scoped_by_purpose_and_recipient() {
        assert_eq!(CodePurpose::Register.key(" Foo@Example.com "), "captcha:register:foo@example.com");
        assert_ne!(CodePurpose::Register.key("a@x.io"), CodePurpose::UpdateUser.key("a@x.io"));
        assert_ne!(CodePurpose::Register.key("a@x.io"), CodePurpose::Register.key("b@x.io"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_issue_then_check() {
        let cache = MemoryCache::default();
        let code = issue(&cache, CodePurpose::Register, "a@x.io").await.unwrap();

        let result = check(&cache, CodePurpose::Register, "a@x.io", &code).await.unwrap();
        assert!(result.is_valid());
        // Not consumed by a successful check.
        let again = check(&cache, CodePurpose::Register, "a@x.io", &code).await.unwrap();
        assert_eq!(again, CodeCheck::Valid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_expires_after_ttl() {
        let cache = MemoryCache::default();
        let code = issue(&cache, CodePurpose::Register, "a@x.io").await.unwrap();

        tokio::time::advance(Duration::from_secs(CodePurpose::Register.ttl_secs() - 1)).await;
        assert_eq!(check(&cache, CodePurpose::Register, "a@x.io", &code).await.unwrap(), CodeCheck::Valid);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(check(&cache, CodePurpose::Register, "a@x.io", &code).await.unwrap(), CodeCheck::Absent);
    }

    #[tokio::test]
    async fn test_wrong_code_leaves_stored_value_untouched() {
        let cache = MemoryCache::default();
        cache.put(&CodePurpose::UpdateUser.key("a@x.io"), "123456", 600).await.unwrap();

        let result = check(&cache, CodePurpose::UpdateUser, "a@x.io", "654321").await.unwrap();
        assert_eq!(result, CodeCheck::Mismatch);
        assert_eq!(cache.raw(&CodePurpose::UpdateUser.key("a@x.io")).as_deref(), Some("123456"));
    }

    #[tokio::test]
    async fn test_require_maps_to_distinct_errors() {
        let cache = MemoryCache::default();
        let absent = require(&cache, CodePurpose::UpdatePassword, "a@x.io", "000000").await;
        assert!(matches!(absent, Err(AppError::VerificationCodeExpired)));

        let code = issue(&cache, CodePurpose::UpdatePassword, "a@x.io").await.unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };
        let mismatch = require(&cache, CodePurpose::UpdatePassword, "a@x.io", wrong).await;
        assert!(matches!(mismatch, Err(AppError::VerificationCodeMismatch)));

        assert!(require(&cache, CodePurpose::UpdatePassword, "a@x.io", &code).await.is_ok());
        // A code for one purpose does not satisfy another.
        let other = require(&cache, CodePurpose::Register, "a@x.io", &code).await;
        assert!(matches!(other, Err(AppError::VerificationCodeExpired)));
    }

    /// Exercises the Redis-backed cache when `REDIS_URL` points at a server.
    #[tokio::test]
    async fn test_redis_cache_stores_with_expiry() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return;
        };
        let client = redis::Client::open(url).unwrap();
        let conn = client.get_multiplexed_async_connection().await.unwrap();

        let key = format!("captcha:cache-test:{}", generate_code());
        conn.put(&key, "123456", 30).await.unwrap();
        assert_eq!(conn.fetch(&key).await.unwrap().as_deref(), Some("123456"));

        let ttl: i64 = redis::cmd("TTL").arg(&key).query_async(&mut conn.clone()).await.unwrap();
        assert!(ttl > 0 && ttl <= 30);

        assert_eq!(conn.fetch("captcha:cache-test:never-set").await.unwrap(), None);
    }
}
