//! Redis store backend.
//!
//! Single round trip per operation; atomic batches run as a MULTI/EXEC
//! pipeline so the prune-count-add sequence of a sliding window can never
//! interleave with a concurrent caller on the same key.

use std::time::Duration;

use deadpool::managed::Object;
use redis::{FromRedisValue, Value};

use config::RedisConfig;

use crate::command::{StoreCommand, StoreReply};
use crate::error::StoreError;
use crate::redis_pool::{self, Manager, Pool};
use crate::StoreBackend;

/// Redis (or Redis-compatible) store backend.
pub struct RedisStore {
    pool: Pool,
    /// Prefix prepended to every key written by this subsystem.
    key_prefix: String,
    /// Per-command timeout; a timeout is a store error subject to the
    /// caller's fail-open policy.
    response_timeout: Duration,
}

impl RedisStore {
    /// Create a new Redis store and verify connectivity with a PING.
    pub async fn new(config: &RedisConfig) -> Result<Self, StoreError> {
        let pool = redis_pool::create_pool(config)
            .map_err(|e| StoreError::Connection(format!("failed to create Redis connection pool: {e}")))?;

        let store = Self {
            pool,
            key_prefix: config.key_prefix.clone().unwrap_or_default(),
            response_timeout: config.response_timeout.unwrap_or_else(|| Duration::from_secs(1)),
        };

        let connect_timeout = config.connection_timeout.unwrap_or_else(|| Duration::from_secs(5));
        let ping = store.query::<String>(redis::cmd("PING"));
        match tokio::time::timeout(connect_timeout, ping).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(StoreError::Connection("timed out connecting to the store".to_string())),
        }

        log::debug!("connected to Redis store at {}", config.url);

        Ok(store)
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    async fn connection(&self) -> Result<Object<Manager>, StoreError> {
        self.pool.get().await.map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn query<T: FromRedisValue>(&self, cmd: redis::Cmd) -> Result<T, StoreError> {
        let mut conn = self.connection().await?;

        let fut = cmd.query_async::<T>(&mut *conn);
        match tokio::time::timeout(self.response_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreError::Query(e.to_string())),
            Err(_) => Err(StoreError::Query("command timed out".to_string())),
        }
    }

    async fn query_pipeline<T: FromRedisValue>(&self, pipe: redis::Pipeline) -> Result<T, StoreError> {
        let mut conn = self.connection().await?;

        let fut = pipe.query_async::<T>(&mut *conn);
        match tokio::time::timeout(self.response_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreError::Query(e.to_string())),
            Err(_) => Err(StoreError::Query("pipeline timed out".to_string())),
        }
    }
}

/// TTLs are second-granular on the wire; anything shorter still has to
/// live for one tick.
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl StoreBackend for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(self.prefixed(key));
        self.query(cmd).await
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.prefixed(key)).arg(value).arg("EX").arg(ttl_seconds(ttl));
        self.query::<()>(cmd).await
    }

    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.prefixed(key))
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds(ttl));

        let reply: Option<String> = self.query(cmd).await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(self.prefixed(key));
        }

        let removed: i64 = self.query(cmd).await?;
        Ok(removed as u64)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut cmd = redis::cmd("INCR");
        cmd.arg(self.prefixed(key));
        self.query(cmd).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(self.prefixed(key)).arg(ttl_seconds(ttl));
        self.query::<i64>(cmd).await?;
        Ok(())
    }

    async fn expire_gt(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let key = self.prefixed(key);
        let ttl = ttl_seconds(ttl);

        // EXPIRE GT ignores keys without a TTL, so give those one first.
        let mut pipe = redis::pipe();
        pipe.cmd("EXPIRE").arg(&key).arg(ttl).arg("NX").ignore();
        pipe.cmd("EXPIRE").arg(&key).arg(ttl).arg("GT").ignore();

        self.query_pipeline::<()>(pipe).await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<(), StoreError> {
        if members.is_empty() {
            return Ok(());
        }

        let mut cmd = redis::cmd("SADD");
        cmd.arg(self.prefixed(key));
        for member in members {
            cmd.arg(member);
        }

        self.query::<i64>(cmd).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut cmd = redis::cmd("SMEMBERS");
        cmd.arg(self.prefixed(key));
        self.query(cmd).await
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let pattern = self.prefixed(pattern);
        let mut keys = Vec::new();
        let mut cursor = 0u64;

        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor).arg("MATCH").arg(&pattern).arg("COUNT").arg(100);

            let (next, batch): (u64, Vec<String>) = self.query(cmd).await?;

            keys.extend(batch.into_iter().map(|key| {
                key.strip_prefix(&self.key_prefix).map(str::to_string).unwrap_or(key)
            }));

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }

    async fn exec_atomic(&self, commands: Vec<StoreCommand>) -> Result<Vec<StoreReply>, StoreError> {
        let mut pipe = redis::pipe();
        pipe.atomic();

        for command in &commands {
            match command {
                StoreCommand::Expire { key, ttl } => {
                    pipe.cmd("EXPIRE").arg(self.prefixed(key)).arg(ttl_seconds(*ttl));
                }
                StoreCommand::ZAdd { key, score, member } => {
                    pipe.cmd("ZADD").arg(self.prefixed(key)).arg(*score).arg(member);
                }
                StoreCommand::ZRemRangeByScore { key, min, max } => {
                    pipe.cmd("ZREMRANGEBYSCORE").arg(self.prefixed(key)).arg(*min).arg(*max);
                }
                StoreCommand::ZCard { key } => {
                    pipe.cmd("ZCARD").arg(self.prefixed(key));
                }
                StoreCommand::ZRange { key } => {
                    pipe.cmd("ZRANGE").arg(self.prefixed(key)).arg(0).arg(-1);
                }
            }
        }

        let value: Value = self.query_pipeline(pipe).await?;

        let Value::Array(items) = value else {
            return Err(StoreError::UnexpectedReply(format!(
                "expected an array of {} replies",
                commands.len()
            )));
        };

        if items.len() != commands.len() {
            return Err(StoreError::UnexpectedReply(format!(
                "expected {} replies, got {}",
                commands.len(),
                items.len()
            )));
        }

        commands
            .iter()
            .zip(items)
            .map(|(command, item)| parse_reply(command, &item))
            .collect()
    }
}

fn parse_reply(command: &StoreCommand, item: &Value) -> Result<StoreReply, StoreError> {
    match command {
        StoreCommand::Expire { .. } | StoreCommand::ZAdd { .. } => Ok(StoreReply::Unit),
        StoreCommand::ZRemRangeByScore { .. } | StoreCommand::ZCard { .. } => {
            let n: i64 = redis::from_redis_value(item)
                .map_err(|e| StoreError::UnexpectedReply(e.to_string()))?;
            Ok(StoreReply::Int(n))
        }
        StoreCommand::ZRange { .. } => {
            let members: Vec<String> = redis::from_redis_value(item)
                .map_err(|e| StoreError::UnexpectedReply(e.to_string()))?;
            Ok(StoreReply::Members(members))
        }
    }
}
