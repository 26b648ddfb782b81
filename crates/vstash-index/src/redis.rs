use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, Client, RedisError, RedisResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::field::display;
use vstash_cas::Fingerprint;
use vstash_config::{log_cache_debug, log_cache_info, log_cache_warn, CacheConfig};

use crate::{CacheEntry, CacheIndex, IndexError};

const FIELD_PATH: &str = "path";
const FIELD_EXTENSION: &str = "extension";

/// Connection settings for [`RedisCacheIndex`].
#[derive(Debug, Clone)]
pub struct RedisOptions {
    pub url: String,
    pub key_prefix: String,
    pub ttl: Option<Duration>,
    /// Bound on connect attempts and on each command
    pub op_timeout: Duration,
    /// Minimum gap between lazy reconnect attempts
    pub reconnect_interval: Duration,
}

impl RedisOptions {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            url: config.url.clone(),
            key_prefix: config.key_prefix.clone(),
            ttl: config.ttl(),
            op_timeout: config.op_timeout(),
            reconnect_interval: config.reconnect_interval(),
        }
    }
}

/// Outcome of [`ConnSlot::begin`].
#[derive(Debug, PartialEq, Eq)]
enum Attempt<C> {
    Connected(Handle<C>),
    /// Caller should connect, then [`ConnSlot::install`].
    Start,
    NotDue,
}

/// Connection tagged with the generation it was installed under.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Handle<C> {
    generation: u64,
    conn: C,
}

/// Connection bookkeeping. Every method is synchronous, so the lock
/// guarding it is never held across a connect or a command.
#[derive(Debug)]
struct ConnSlot<C> {
    current: Option<Handle<C>>,
    generation: u64,
    last_attempt: Option<Instant>,
}

impl<C> Default for ConnSlot<C> {
    fn default() -> Self {
        Self {
            current: None,
            generation: 0,
            last_attempt: None,
        }
    }
}

impl<C: Clone> ConnSlot<C> {
    fn current(&self) -> Option<Handle<C>> {
        self.current.clone()
    }

    /// Hand out the live connection, or claim a connect attempt if one is
    /// due (always when `force`). Claiming stamps the attempt time, so
    /// concurrent callers see `NotDue` while it is in flight.
    fn begin(&mut self, force: bool, interval: Duration) -> Attempt<C> {
        if let Some(handle) = &self.current {
            return Attempt::Connected(handle.clone());
        }
        let due = self.last_attempt.map_or(true, |at| at.elapsed() >= interval);
        if !force && !due {
            return Attempt::NotDue;
        }
        self.last_attempt = Some(Instant::now());
        Attempt::Start
    }

    /// Install a freshly opened connection. If another attempt won the
    /// race, its connection is kept and returned instead. The flag is true
    /// when `conn` was installed.
    fn install(&mut self, conn: C) -> (Handle<C>, bool) {
        if let Some(handle) = &self.current {
            return (handle.clone(), false);
        }
        self.generation += 1;
        let handle = Handle {
            generation: self.generation,
            conn,
        };
        self.current = Some(handle.clone());
        (handle, true)
    }

    /// Drop the connection only if it is still `generation`.
    fn drop_if(&mut self, generation: u64) -> bool {
        match &self.current {
            Some(handle) if handle.generation == generation => {
                self.current = None;
                self.last_attempt = Some(Instant::now());
                true
            }
            _ => false,
        }
    }
}

/// Redis-backed cache index.
///
/// Holds at most one multiplexed connection. While disconnected, a lookup
/// tries to reconnect only if `reconnect_interval` has passed since the
/// previous attempt; otherwise it misses immediately. Any command error or
/// timeout drops the connection it ran on.
pub struct RedisCacheIndex {
    client: Client,
    options: RedisOptions,
    slot: Mutex<ConnSlot<MultiplexedConnection>>,
}

impl RedisCacheIndex {
    /// Create the index and make one connection attempt.
    ///
    /// Only an invalid URL is an error; an unreachable server leaves the
    /// index in disconnected mode.
    pub async fn new(options: RedisOptions) -> Result<Self, IndexError> {
        let client = Client::open(options.url.as_str())?;
        let index = Self {
            client,
            options,
            slot: Mutex::new(ConnSlot::default()),
        };
        index.acquire(true).await;
        Ok(index)
    }

    fn key(&self, fingerprint: &Fingerprint) -> String {
        format!("{}:{}", self.options.key_prefix, fingerprint)
    }

    async fn acquire(&self, force: bool) -> Option<Handle<MultiplexedConnection>> {
        let attempt = self.slot.lock().begin(force, self.options.reconnect_interval);
        match attempt {
            Attempt::Connected(handle) => Some(handle),
            Attempt::NotDue => None,
            Attempt::Start => match self.open().await {
                Ok(conn) => {
                    let (handle, installed) = self.slot.lock().install(conn);
                    if installed {
                        log_cache_info!(
                            "Cache backend connected",
                            backend = "redis",
                            generation = handle.generation
                        );
                    }
                    Some(handle)
                }
                Err(e) => {
                    log_cache_warn!("Cache backend unavailable, serving from disk", error = display(&e));
                    None
                }
            },
        }
    }

    async fn open(&self) -> Result<MultiplexedConnection, IndexError> {
        let connect = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            ping(&mut conn).await?;
            Ok::<_, RedisError>(conn)
        };
        match timeout(self.options.op_timeout, connect).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(IndexError::Timeout(self.options.op_timeout)),
        }
    }

    fn mark_down(&self, generation: u64) {
        if self.slot.lock().drop_if(generation) {
            log_cache_warn!("Cache backend connection dropped", generation = generation);
        }
    }

    /// Run one command, absorbing failures as `None`.
    async fn run<T, F, Fut>(&self, op: &'static str, f: F) -> Option<T>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let handle = self.acquire(false).await?;
        match timeout(self.options.op_timeout, f(handle.conn)).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                log_cache_warn!("Cache command failed", op = op, error = display(&e));
                self.mark_down(handle.generation);
                None
            }
            Err(_) => {
                log_cache_warn!("Cache command timed out", op = op);
                self.mark_down(handle.generation);
                None
            }
        }
    }

    /// Ping the current connection, or try to reconnect if there is none.
    pub async fn health_check(&self) -> bool {
        let current = self.slot.lock().current();
        match current {
            Some(mut handle) => match timeout(self.options.op_timeout, ping(&mut handle.conn)).await {
                Ok(Ok(())) => true,
                _ => {
                    self.mark_down(handle.generation);
                    false
                }
            },
            None => self.acquire(true).await.is_some(),
        }
    }

    /// Periodically run [`health_check`](Self::health_check).
    ///
    /// The task stops once the index is dropped.
    pub fn spawn_health_check(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(index) = weak.upgrade() else {
                    break;
                };
                let healthy = index.health_check().await;
                log_cache_debug!("Cache health check", healthy = healthy);
            }
        })
    }
}

async fn ping(conn: &mut MultiplexedConnection) -> RedisResult<()> {
    let _: String = ::redis::cmd("PING").query_async(conn).await?;
    Ok(())
}

fn entry_from_fields(mut fields: HashMap<String, String>) -> Option<CacheEntry> {
    let path = fields.remove(FIELD_PATH)?;
    let extension = fields.remove(FIELD_EXTENSION).unwrap_or_else(|| {
        Path::new(&path)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    Some(CacheEntry::new(path, extension))
}

#[async_trait]
impl CacheIndex for RedisCacheIndex {
    async fn exists(&self, fingerprint: &Fingerprint) -> bool {
        let key = self.key(fingerprint);
        self.run("exists", move |mut conn| async move {
            let found: bool = conn.exists(&key).await?;
            Ok::<_, RedisError>(found)
        })
        .await
        .unwrap_or(false)
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let key = self.key(fingerprint);
        let fields = self
            .run("get", move |mut conn| async move {
                let fields: HashMap<String, String> = conn.hgetall(&key).await?;
                Ok::<_, RedisError>(fields)
            })
            .await?;
        entry_from_fields(fields)
    }

    async fn set(&self, fingerprint: &Fingerprint, entry: &CacheEntry) {
        let key = self.key(fingerprint);
        let path = entry.path.to_string_lossy().into_owned();
        let extension = entry.extension.clone();
        let ttl = self.options.ttl;
        self.run("set", move |mut conn| async move {
            let mut pipe = ::redis::pipe();
            pipe.atomic()
                .cmd("HSET")
                .arg(&key)
                .arg(FIELD_PATH)
                .arg(&path)
                .arg(FIELD_EXTENSION)
                .arg(&extension)
                .ignore();
            if let Some(ttl) = ttl {
                pipe.cmd("EXPIRE").arg(&key).arg(ttl.as_secs().max(1)).ignore();
            }
            let _: () = pipe.query_async(&mut conn).await?;
            Ok::<_, RedisError>(())
        })
        .await;
    }

    async fn is_available(&self) -> bool {
        self.slot.lock().current.is_some()
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
