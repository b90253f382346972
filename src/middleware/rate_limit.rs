use redis::aio::MultiplexedConnection;

use crate::error::AppError;

/// Fixed-window attempt counter kept in Redis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_attempts: u64,
    pub window_secs: u64,
}

impl RateLimit {
    /// 5 login attempts per 15 min per username.
    pub const LOGIN: RateLimit = RateLimit { max_attempts: 5, window_secs: 900 };
    /// 3 verification mails per 10 min per address and purpose.
    pub const CAPTCHA: RateLimit = RateLimit { max_attempts: 3, window_secs: 600 };

    /// INCR the counter for `scope`/`subject`; the first hit of a window
    /// sets its TTL so later attempts never extend it.
    pub async fn check(
        &self,
        redis: &mut MultiplexedConnection,
        scope: &str,
        subject: &str,
    ) -> Result<(), AppError> {
        let key = rate_key(scope, subject);
        let count: u64 = redis::cmd("INCR").arg(&key).query_async(redis).await?;

        if count == 1 {
            let _: () = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(self.window_secs)
                .query_async(redis)
                .await?;
        }

        if count > self.max_attempts {
            tracing::warn!(%key, "rate limit exceeded");
            return Err(AppError::RateLimited);
        }
        Ok(())
    }

    /// Forget the attempts counted for `scope`/`subject`.
    pub async fn reset(
        redis: &mut MultiplexedConnection,
        scope: &str,
        subject: &str,
    ) -> Result<(), AppError> {
        let _: () = redis::cmd("DEL")
            .arg(rate_key(scope, subject))
            .query_async(redis)
            .await?;
        Ok(())
    }
}

fn rate_key(scope: &str, subject: &str) -> String {
    format!("rate:{scope}:{}", subject.trim().to_lowercase())
}
