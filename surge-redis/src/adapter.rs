use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common_metrics::subs::RedisMetrics;
use common_metrics::MetricsCollector;
use common_types::{Operation, OperationResult, ParamValue, SurgeError};
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError};
use surge_core::adapter::{not_connected, unsupported, ProtocolAdapter};
use tokio::sync::RwLock;
use tracing::info;

use crate::config::RedisConfig;
use crate::pool::{RedisConnectionPool, RedisLease};

const SUPPORTED: &[&str] = &[
    "set",
    "setex",
    "get",
    "del",
    "exists",
    "incr",
    "decr",
    "lpush",
    "rpush",
    "lpop",
    "rpop",
    "llen",
    "sadd",
    "srem",
    "smembers",
    "sismember",
    "zadd",
    "zrem",
    "zrange",
    "zcard",
    "hset",
    "hget",
    "hdel",
    "hgetall",
    "publish",
    "subscribe",
];

const READ_VERBS: &[&str] = &[
    "get",
    "exists",
    "llen",
    "smembers",
    "sismember",
    "zrange",
    "zcard",
    "hget",
    "hgetall",
    "subscribe",
];

pub struct RedisAdapter {
    config: RedisConfig,
    pool: RwLock<Option<Arc<RedisConnectionPool>>>,
    /// Dedicated client for pub/sub; subscriptions cannot ride the
    /// multiplexed connections in the pool.
    pubsub_client: RwLock<Option<redis::Client>>,
    connected: AtomicBool,
    collector: Arc<MetricsCollector>,
}

impl RedisAdapter {
    pub fn new(config: RedisConfig) -> Self {
        let collector = Arc::new(MetricsCollector::with_protocol(Box::new(
            RedisMetrics::new(),
        )));
        Self {
            config,
            pool: RwLock::new(None),
            pubsub_client: RwLock::new(None),
            connected: AtomicBool::new(false),
            collector,
        }
    }

    /// Subscribe to the operation's channel and wait for one message under
    /// the command deadline. Each call holds its own connection for the
    /// lifetime of the subscription.
    async fn subscribe_once(&self, op: &Operation) -> OperationResult {
        let client = match self.pubsub_client.read().await.clone() {
            Some(client) => client,
            None => return not_connected(op),
        };
        let channel = op
            .param("channel")
            .and_then(ParamValue::as_str)
            .unwrap_or(op.key())
            .to_owned();

        let started = Instant::now();
        let received = tokio::time::timeout(self.config.command_timeout, async {
            let conn = client.get_async_connection().await?;
            let mut pubsub = conn.into_pubsub();
            pubsub.subscribe(&channel).await?;
            let message = pubsub.on_message().next().await;
            match message {
                Some(message) => message.get_payload::<Vec<u8>>().map(Some),
                None => Ok(None),
            }
        })
        .await;
        let duration = started.elapsed();

        let result = match received {
            Err(_) => OperationResult::fail(
                duration,
                SurgeError::Timeout(self.config.command_timeout),
            ),
            Ok(Err(err)) => OperationResult::fail(duration, map_redis_error(&err)),
            Ok(Ok(None)) => OperationResult::fail(
                duration,
                SurgeError::Transport("subscription stream ended".into()),
            ),
            Ok(Ok(Some(payload))) => OperationResult::ok(duration).with_value(payload),
        };
        result
            .read(true)
            .with_metadata("command", "subscribe")
            .with_metadata("key", channel)
    }

    pub async fn in_flight(&self) -> usize {
        match self.pool.read().await.as_ref() {
            Some(pool) => pool.in_flight(),
            None => 0,
        }
    }

    async fn run_command(
        &self,
        conn: &mut MultiplexedConnection,
        op: &Operation,
    ) -> Result<Option<Vec<u8>>, RedisError> {
        let key = op.key();
        let payload = op.value().map(|b| b.to_vec()).unwrap_or_default();
        let member = op
            .param("member")
            .and_then(ParamValue::as_str)
            .unwrap_or("member");
        let field = op
            .param("field")
            .and_then(ParamValue::as_str)
            .unwrap_or("field");

        match op.op_type() {
            "set" | "setex" => {
                let ttl = op.ttl().or(self.config.ttl);
                match ttl {
                    Some(ttl) => {
                        conn.set_ex::<_, _, ()>(key, payload, ttl.as_secs().max(1) as usize)
                            .await?
                    }
                    None => conn.set::<_, _, ()>(key, payload).await?,
                }
                Ok(None)
            }
            "get" => conn.get::<_, Option<Vec<u8>>>(key).await,
            "del" => {
                conn.del::<_, i64>(key).await?;
                Ok(None)
            }
            "exists" => {
                let found: bool = conn.exists(key).await?;
                Ok(found.then(|| b"1".to_vec()))
            }
            "incr" => {
                let n: i64 = conn.incr(key, 1i64).await?;
                Ok(Some(n.to_string().into_bytes()))
            }
            "decr" => {
                let n: i64 = conn.decr(key, 1i64).await?;
                Ok(Some(n.to_string().into_bytes()))
            }
            "lpush" => {
                conn.lpush::<_, _, i64>(key, payload).await?;
                Ok(None)
            }
            "rpush" => {
                conn.rpush::<_, _, i64>(key, payload).await?;
                Ok(None)
            }
            "lpop" => conn.lpop::<_, Option<Vec<u8>>>(key, None).await,
            "rpop" => conn.rpop::<_, Option<Vec<u8>>>(key, None).await,
            "llen" => {
                let n: i64 = conn.llen(key).await?;
                Ok(Some(n.to_string().into_bytes()))
            }
            "sadd" => {
                conn.sadd::<_, _, i64>(key, member).await?;
                Ok(None)
            }
            "srem" => {
                conn.srem::<_, _, i64>(key, member).await?;
                Ok(None)
            }
            "smembers" => {
                let members: Vec<Vec<u8>> = conn.smembers(key).await?;
                Ok(Some(members.len().to_string().into_bytes()))
            }
            "sismember" => {
                let found: bool = conn.sismember(key, member).await?;
                Ok(found.then(|| b"1".to_vec()))
            }
            "zadd" => {
                let score = op
                    .param("score")
                    .and_then(ParamValue::as_f64)
                    .unwrap_or(0.0);
                conn.zadd::<_, _, _, i64>(key, member, score).await?;
                Ok(None)
            }
            "zrem" => {
                conn.zrem::<_, _, i64>(key, member).await?;
                Ok(None)
            }
            "zrange" => {
                let members: Vec<Vec<u8>> = conn.zrange(key, 0, -1).await?;
                Ok(Some(members.len().to_string().into_bytes()))
            }
            "zcard" => {
                let n: i64 = conn.zcard(key).await?;
                Ok(Some(n.to_string().into_bytes()))
            }
            "hset" => {
                conn.hset::<_, _, _, i64>(key, field, payload).await?;
                Ok(None)
            }
            "hget" => conn.hget::<_, _, Option<Vec<u8>>>(key, field).await,
            "hdel" => {
                conn.hdel::<_, _, i64>(key, field).await?;
                Ok(None)
            }
            "hgetall" => {
                let entries: std::collections::HashMap<String, Vec<u8>> =
                    conn.hgetall(key).await?;
                Ok(Some(entries.len().to_string().into_bytes()))
            }
            "publish" => {
                let channel = op
                    .param("channel")
                    .and_then(ParamValue::as_str)
                    .unwrap_or(key);
                conn.publish::<_, _, i64>(channel, payload).await?;
                Ok(None)
            }
            // Dispatch is exhaustive over SUPPORTED; anything else was
            // rejected before we got here.
            other => unreachable!("unrouted redis verb {other}"),
        }
    }

    async fn probe(&self, pool: &Arc<RedisConnectionPool>) -> Result<(), SurgeError> {
        let lease = pool.acquire(self.config.pool.acquire_timeout).await?;
        let RedisLease {
            connection: mut conn,
            _permit,
        } = lease;
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|err| map_redis_error(&err))?;
        if pong != "PONG" {
            return Err(SurgeError::Protocol(format!(
                "unexpected PING reply {pong:?}"
            )));
        }
        Ok(())
    }
}

fn map_redis_error(err: &RedisError) -> SurgeError {
    if err.is_timeout() {
        SurgeError::Transport(format!("redis timed out: {err}"))
    } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        SurgeError::Transport(err.to_string())
    } else {
        SurgeError::Protocol(err.to_string())
    }
}

fn is_read_verb(op_type: &str) -> bool {
    READ_VERBS.contains(&op_type)
}

#[async_trait]
impl ProtocolAdapter for RedisAdapter {
    fn protocol_name(&self) -> &'static str {
        "redis"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn supported_operations(&self) -> &'static [&'static str] {
        SUPPORTED
    }

    fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    async fn connect(&self) -> Result<(), SurgeError> {
        self.config.validate()?;
        let pool = Arc::new(RedisConnectionPool::new(&self.config).await?);
        if let Err(err) = self.probe(&pool).await {
            pool.close();
            self.connected.store(false, Ordering::Release);
            return Err(err);
        }
        let pubsub_client = redis::Client::open(self.config.url())
            .map_err(|err| SurgeError::PoolInit(format!("invalid redis url: {err}")))?;
        *self.pool.write().await = Some(pool);
        *self.pubsub_client.write().await = Some(pubsub_client);
        self.connected.store(true, Ordering::Release);
        info!(addr = %self.config.addrs[0], "redis adapter connected");
        Ok(())
    }

    async fn execute(&self, op: &Operation) -> OperationResult {
        if !self.is_connected() {
            return not_connected(op);
        }
        if !SUPPORTED.contains(&op.op_type()) {
            return unsupported(op, Instant::now());
        }
        if op.op_type() == "subscribe" {
            return self.subscribe_once(op).await;
        }
        let pool = match self.pool.read().await.as_ref() {
            Some(pool) => pool.clone(),
            None => return not_connected(op),
        };

        let is_read = is_read_verb(op.op_type());
        let acquire_started = Instant::now();
        let lease = match pool.acquire(self.config.pool.acquire_timeout).await {
            Ok(lease) => lease,
            Err(err) => {
                return OperationResult::fail(acquire_started.elapsed(), err)
                    .read(is_read)
                    .with_metadata("command", op.op_type())
            }
        };
        let RedisLease {
            connection: mut conn,
            _permit,
        } = lease;

        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.config.command_timeout, self.run_command(&mut conn, op))
                .await;
        let duration = started.elapsed();
        let result = match outcome {
            Err(_) => OperationResult::fail(
                duration,
                SurgeError::Timeout(self.config.command_timeout),
            ),
            Ok(Err(err)) => OperationResult::fail(duration, map_redis_error(&err)),
            Ok(Ok(value)) => {
                let mut result = OperationResult::ok(duration);
                if let Some(value) = value {
                    result = result.with_value(value);
                }
                result
            }
        };
        result
            .read(is_read)
            .with_metadata("command", op.op_type())
            .with_metadata("key", op.key())
    }

    async fn health_check(&self) -> Result<(), SurgeError> {
        let pool = self
            .pool
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(SurgeError::PoolClosed)?;
        self.probe(&pool).await
    }

    async fn close(&self) -> Result<(), SurgeError> {
        self.connected.store(false, Ordering::Release);
        if let Some(pool) = self.pool.write().await.take() {
            pool.close();
        }
        self.pubsub_client.write().await.take();
        Ok(())
    }
}
