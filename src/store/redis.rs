use std::collections::HashMap;
use std::time::Duration;

use ::redis::aio::ConnectionManager;
use ::redis::{Client, Cmd, FromRedisValue};
use async_trait::async_trait;
use tracing::info;

use super::{KeyspaceStore, ScoredMember, SetCondition, SetOptions};
use crate::error::{NskvError, NskvResult};

const SCAN_BATCH: usize = 500;

/// [`KeyspaceStore`] backed by a Redis server.
///
/// The connection manager reconnects transparently; commands are not
/// retried here, a failed command surfaces as [`NskvError::Store`].
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> NskvResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| NskvError::Store(format!("Failed to create Redis client: {}", e)))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| NskvError::Store(format!("Failed to connect to Redis: {}", e)))?;

        info!(redis_url = %redis_url, "connected to redis");
        Ok(Self { connection })
    }

    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> NskvResult<T> {
        let mut conn = self.connection.clone();
        let value = cmd.query_async(&mut conn).await?;
        Ok(value)
    }
}

/// Formats a score bound the way Redis parses it.
fn score_arg(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

#[async_trait]
impl KeyspaceStore for RedisStore {
    async fn ping(&self) -> NskvResult<()> {
        let _: String = self.query(&::redis::cmd("PING")).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> NskvResult<Option<String>> {
        self.query(::redis::cmd("GET").arg(key)).await
    }

    async fn set(&self, key: &str, value: &str, options: SetOptions) -> NskvResult<bool> {
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = options.ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        match options.condition {
            SetCondition::Always => {}
            SetCondition::IfAbsent => {
                cmd.arg("NX");
            }
            SetCondition::IfPresent => {
                cmd.arg("XX");
            }
        }

        let reply: Option<String> = self.query(&cmd).await?;
        Ok(reply.is_some())
    }

    async fn mget(&self, keys: &[&str]) -> NskvResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.query(::redis::cmd("MGET").arg(keys)).await
    }

    async fn del(&self, keys: &[&str]) -> NskvResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.query(::redis::cmd("DEL").arg(keys)).await
    }

    async fn exists(&self, keys: &[&str]) -> NskvResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.query(::redis::cmd("EXISTS").arg(keys)).await
    }

    async fn incr(&self, key: &str, delta: i64) -> NskvResult<i64> {
        self.query(::redis::cmd("INCRBY").arg(key).arg(delta)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> NskvResult<bool> {
        let millis = ttl.as_millis().max(1) as u64;
        self.query(::redis::cmd("PEXPIRE").arg(key).arg(millis)).await
    }

    async fn ttl(&self, key: &str) -> NskvResult<i64> {
        self.query(::redis::cmd("TTL").arg(key)).await
    }

    async fn pttl(&self, key: &str) -> NskvResult<i64> {
        self.query(::redis::cmd("PTTL").arg(key)).await
    }

    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> NskvResult<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut cmd = ::redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(*field).arg(*value);
        }
        self.query(&cmd).await
    }

    async fn hget(&self, key: &str, field: &str) -> NskvResult<Option<String>> {
        self.query(::redis::cmd("HGET").arg(key).arg(field)).await
    }

    async fn hgetall(&self, key: &str) -> NskvResult<HashMap<String, String>> {
        self.query(::redis::cmd("HGETALL").arg(key)).await
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> NskvResult<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        self.query(::redis::cmd("HDEL").arg(key).arg(fields)).await
    }

    async fn zadd(&self, key: &str, entries: &[(f64, &str)]) -> NskvResult<u64> {
        if entries.is_empty() {
            return Ok(0);
        }
        let mut cmd = ::redis::cmd("ZADD");
        cmd.arg(key);
        for (score, member) in entries {
            cmd.arg(score_arg(*score)).arg(*member);
        }
        self.query(&cmd).await
    }

    async fn zrem(&self, key: &str, members: &[&str]) -> NskvResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        self.query(::redis::cmd("ZREM").arg(key).arg(members)).await
    }

    async fn zcard(&self, key: &str) -> NskvResult<u64> {
        self.query(::redis::cmd("ZCARD").arg(key)).await
    }

    async fn zscore(&self, key: &str, member: &str) -> NskvResult<Option<f64>> {
        self.query(::redis::cmd("ZSCORE").arg(key).arg(member)).await
    }

    async fn zrank(&self, key: &str, member: &str) -> NskvResult<Option<u64>> {
        self.query(::redis::cmd("ZRANK").arg(key).arg(member)).await
    }

    async fn zrevrank(&self, key: &str, member: &str) -> NskvResult<Option<u64>> {
        self.query(::redis::cmd("ZREVRANK").arg(key).arg(member)).await
    }

    async fn zincrby(&self, key: &str, delta: f64, member: &str) -> NskvResult<f64> {
        self.query(::redis::cmd("ZINCRBY").arg(key).arg(delta).arg(member))
            .await
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> NskvResult<Vec<ScoredMember>> {
        self.query(
            ::redis::cmd("ZRANGE")
                .arg(key)
                .arg(start)
                .arg(stop)
                .arg("WITHSCORES"),
        )
        .await
    }

    async fn zrevrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> NskvResult<Vec<ScoredMember>> {
        self.query(
            ::redis::cmd("ZREVRANGE")
                .arg(key)
                .arg(start)
                .arg(stop)
                .arg("WITHSCORES"),
        )
        .await
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<(usize, usize)>,
    ) -> NskvResult<Vec<ScoredMember>> {
        let mut cmd = ::redis::cmd("ZRANGEBYSCORE");
        cmd.arg(key)
            .arg(score_arg(min))
            .arg(score_arg(max))
            .arg("WITHSCORES");
        if let Some((offset, count)) = limit {
            cmd.arg("LIMIT").arg(offset).arg(count);
        }
        self.query(&cmd).await
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> NskvResult<u64> {
        self.query(
            ::redis::cmd("ZREMRANGEBYSCORE")
                .arg(key)
                .arg(score_arg(min))
                .arg(score_arg(max)),
        )
        .await
    }

    async fn sadd(&self, key: &str, members: &[&str]) -> NskvResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        self.query(::redis::cmd("SADD").arg(key).arg(members)).await
    }

    async fn srem(&self, key: &str, members: &[&str]) -> NskvResult<u64> {
        if members.is_empty() {
            return Ok(0);
        }
        self.query(::redis::cmd("SREM").arg(key).arg(members)).await
    }

    async fn smembers(&self, key: &str) -> NskvResult<Vec<String>> {
        self.query(::redis::cmd("SMEMBERS").arg(key)).await
    }

    async fn sismember(&self, key: &str, member: &str) -> NskvResult<bool> {
        self.query(::redis::cmd("SISMEMBER").arg(key).arg(member)).await
    }

    async fn scard(&self, key: &str) -> NskvResult<u64> {
        self.query(::redis::cmd("SCARD").arg(key)).await
    }

    async fn scan(&self, pattern: &str) -> NskvResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .query(
                    ::redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH),
                )
                .await?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once across iterations
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn pfadd(&self, key: &str, elements: &[&str]) -> NskvResult<bool> {
        self.query(::redis::cmd("PFADD").arg(key).arg(elements)).await
    }

    async fn pfcount(&self, keys: &[&str]) -> NskvResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.query(::redis::cmd("PFCOUNT").arg(keys)).await
    }

    async fn pfmerge(&self, dest: &str, sources: &[&str]) -> NskvResult<()> {
        self.query(::redis::cmd("PFMERGE").arg(dest).arg(sources))
            .await
    }

    async fn publish(&self, channel: &str, message: &str) -> NskvResult<u64> {
        self.query(::redis::cmd("PUBLISH").arg(channel).arg(message))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_arg_formats_infinities() {
        assert_eq!(score_arg(f64::INFINITY), "+inf");
        assert_eq!(score_arg(f64::NEG_INFINITY), "-inf");
        assert_eq!(score_arg(1500.0), "1500");
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let result = RedisStore::connect("not-a-url").await;
        assert!(matches!(result, Err(NskvError::Store(_))));
    }
}
