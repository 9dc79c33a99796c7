//! Redis lease based leader election.

use async_trait::async_trait;
use nada_application::LeaderElector;
use nada_core::{AppError, AppResult};
use redis::{AsyncCommands, Script};
use tracing::info;

const RELEASE_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

const RENEW_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('EXPIRE', KEYS[1], ARGV[2])
else
  return 0
end
"#;

/// Leader elector holding a renewable lease on one Redis key.
///
/// Each call either renews the lease this replica holds or tries to take a
/// free one, so leadership moves once the holder stops polling for longer
/// than `lease_seconds`.
#[derive(Clone)]
pub struct RedisLeaderElector {
    client: redis::Client,
    key: String,
    token: String,
    lease_seconds: u32,
}

impl RedisLeaderElector {
    /// Creates an elector competing for `key` as `holder_id`.
    pub fn new(
        client: redis::Client,
        key: impl Into<String>,
        holder_id: &str,
        lease_seconds: u32,
    ) -> AppResult<Self> {
        if holder_id.trim().is_empty() {
            return Err(AppError::InvalidRequest(
                "leader lease holder_id must not be empty".to_owned(),
            ));
        }

        if lease_seconds == 0 {
            return Err(AppError::InvalidRequest(
                "leader lease_seconds must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            client,
            key: key.into(),
            token: format!("{holder_id}:{}", uuid::Uuid::new_v4()),
            lease_seconds,
        })
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Internal(format!("failed to connect to redis: {error}")))
    }

    /// Gives the lease up, letting another replica take over immediately.
    pub async fn release(&self) -> AppResult<()> {
        let mut connection = self.connection().await?;

        Script::new(RELEASE_LEASE_SCRIPT)
            .key(self.key.as_str())
            .arg(self.token.as_str())
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to release leader lease: {error}"))
            })?;

        Ok(())
    }
}

#[async_trait]
impl LeaderElector for RedisLeaderElector {
    async fn is_leader(&self) -> AppResult<bool> {
        let mut connection = self.connection().await?;

        let renewed = Script::new(RENEW_LEASE_SCRIPT)
            .key(self.key.as_str())
            .arg(self.token.as_str())
            .arg(i64::from(self.lease_seconds))
            .invoke_async::<i32>(&mut connection)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to renew leader lease: {error}"))
            })?;
        if renewed > 0 {
            return Ok(true);
        }

        let acquired: bool = connection
            .set_nx(self.key.as_str(), self.token.as_str())
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to acquire leader lease: {error}"))
            })?;
        if !acquired {
            return Ok(false);
        }

        connection
            .expire::<_, ()>(self.key.as_str(), i64::from(self.lease_seconds))
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to set leader lease ttl: {error}"))
            })?;
        info!(key = %self.key, "acquired leader lease");

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use nada_application::LeaderElector;

    use super::RedisLeaderElector;

    fn test_client() -> Option<redis::Client> {
        let Ok(redis_url) = std::env::var("REDIS_URL") else {
            return None;
        };

        match redis::Client::open(redis_url.as_str()) {
            Ok(client) => Some(client),
            Err(error) => panic!("failed to open REDIS_URL in test: {error}"),
        }
    }

    #[tokio::test]
    async fn only_one_replica_holds_the_lease_until_released() {
        let Some(client) = test_client() else {
            return;
        };

        let key = format!("nada:test:leader:{}", uuid::Uuid::new_v4());
        let first = RedisLeaderElector::new(client.clone(), key.as_str(), "pod-a", 30)
            .unwrap_or_else(|error| panic!("{error}"));
        let second = RedisLeaderElector::new(client, key.as_str(), "pod-b", 30)
            .unwrap_or_else(|error| panic!("{error}"));

        assert!(first.is_leader().await.unwrap_or(false));
        assert!(!second.is_leader().await.unwrap_or(true));
        // Renewal keeps the lease with its holder.
        assert!(first.is_leader().await.unwrap_or(false));

        assert!(first.release().await.is_ok());
        assert!(second.is_leader().await.unwrap_or(false));
        assert!(second.release().await.is_ok());
    }

    #[test]
    fn zero_lease_is_rejected() {
        let client = redis::Client::open("redis://127.0.0.1/")
            .unwrap_or_else(|error| panic!("{error}"));

        assert!(RedisLeaderElector::new(client, "nada:leader", "pod-a", 0).is_err());
    }
}
