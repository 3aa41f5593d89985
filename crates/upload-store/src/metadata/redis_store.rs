//! Redis-backed metadata store.
//!
//! Records live in hashes under `upload:meta:{id}` with a native Redis TTL.
//! A sorted set scored by expiry time outlives them so expired uploads can
//! be found after Redis has evicted the hash.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use redis::AsyncCommands;
use redis::Client as RedisClient;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info};

use super::{MetadataStore, UploadRecord};
use crate::error::{Result, StorageError};
use crate::id::UploadId;

/// Prefix for per-upload record hashes.
const RECORD_KEY_PREFIX: &str = "upload:meta:";

/// Sorted set of upload ids scored by expiry (unix seconds).
const EXPIRY_INDEX_KEY: &str = "upload:expiry";

const FIELD_FILENAME: &str = "filename";
const FIELD_DELETE: &str = "delete";
const FIELD_CREATED: &str = "created";
const FIELD_EXPIRES: &str = "expires";

/// Shared metadata store on a single multiplexed Redis connection.
///
/// The connection is opened once by [`RedisMetadataStore::connect`] and
/// shared by every clone of the owning facade until [`MetadataStore::close`].
pub struct RedisMetadataStore {
    conn: RwLock<Option<MultiplexedConnection>>,
}

impl RedisMetadataStore {
    /// Connect to Redis and verify the connection with PING.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = RedisClient::open(url)
            .map_err(|e| StorageError::Config(format!("invalid Redis URL: {e}")))?;

        let mut conn = client.get_multiplexed_async_connection().await?;

        redis::cmd("PING").query_async::<String>(&mut conn).await?;

        info!("metadata store connected");

        Ok(Self {
            conn: RwLock::new(Some(conn)),
        })
    }

    fn conn(&self) -> Result<MultiplexedConnection> {
        self.conn
            .read()
            .clone()
            .ok_or_else(|| StorageError::Metadata("connection closed".to_string()))
    }
}

#[async_trait]
impl MetadataStore for RedisMetadataStore {
    async fn put(&self, id: &UploadId, record: &UploadRecord) -> Result<()> {
        let key = record_key(id);
        let created = record.created.timestamp().to_string();
        let expires = record.expires.timestamp().to_string();
        let mut conn = self.conn()?;

        redis::pipe()
            .atomic()
            .hset_multiple(
                &key,
                &[
                    (FIELD_FILENAME, record.filename.as_str()),
                    (FIELD_DELETE, record.delete_token.as_str()),
                    (FIELD_CREATED, created.as_str()),
                    (FIELD_EXPIRES, expires.as_str()),
                ],
            )
            .ignore()
            .expire(&key, record.ttl_secs())
            .ignore()
            .zadd(EXPIRY_INDEX_KEY, id.as_str(), record.expires.timestamp())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(id = %id, ttl = record.ttl_secs(), "metadata stored");
        Ok(())
    }

    async fn get(&self, id: &UploadId) -> Result<UploadRecord> {
        let mut conn = self.conn()?;
        let fields: HashMap<String, String> = conn.hgetall(record_key(id)).await?;

        if fields.is_empty() {
            return Err(StorageError::not_found(id.as_str()));
        }

        record_from_fields(id, &fields)
    }

    async fn get_filename(&self, id: &UploadId) -> Result<String> {
        let mut conn = self.conn()?;
        let filename: Option<String> = conn.hget(record_key(id), FIELD_FILENAME).await?;

        filename.ok_or_else(|| StorageError::not_found(id.as_str()))
    }

    async fn get_delete_token(&self, id: &UploadId) -> Result<String> {
        let mut conn = self.conn()?;
        let token: Option<String> = conn.hget(record_key(id), FIELD_DELETE).await?;

        token.ok_or_else(|| StorageError::not_found(id.as_str()))
    }

    async fn remove(&self, id: &UploadId) -> Result<()> {
        let mut conn = self.conn()?;

        redis::pipe()
            .atomic()
            .del(record_key(id))
            .ignore()
            .zrem(EXPIRY_INDEX_KEY, id.as_str())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(id = %id, "metadata removed");
        Ok(())
    }

    async fn take_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<String>> {
        let mut conn = self.conn()?;

        let script = redis::Script::new(TAKE_EXPIRED_SCRIPT);
        let ids: Vec<String> = script
            .key(EXPIRY_INDEX_KEY)
            .arg(now.timestamp())
            .arg(limit)
            .arg(RECORD_KEY_PREFIX)
            .invoke_async(&mut conn)
            .await?;

        Ok(ids)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn()?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.conn.write().take().is_some() {
            info!("metadata store connection closed");
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisMetadataStore")
            .field("connected", &self.conn.read().is_some())
            .finish()
    }
}

fn record_key(id: &UploadId) -> String {
    format!("{RECORD_KEY_PREFIX}{id}")
}

/// Rebuild a record from its hash fields.
fn record_from_fields(id: &UploadId, fields: &HashMap<String, String>) -> Result<UploadRecord> {
    let field = |name: &str| {
        fields.get(name).cloned().ok_or_else(|| {
            StorageError::Metadata(format!("record for {id} is missing field '{name}'"))
        })
    };
    let timestamp = |name: &str| -> Result<DateTime<Utc>> {
        let raw = field(name)?;
        raw.parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| {
                StorageError::Metadata(format!("record for {id} has invalid '{name}': {raw}"))
            })
    };

    Ok(UploadRecord {
        filename: field(FIELD_FILENAME)?,
        delete_token: field(FIELD_DELETE)?,
        created: timestamp(FIELD_CREATED)?,
        expires: timestamp(FIELD_EXPIRES)?,
    })
}

/// Lua script claiming expired ids from the expiry index.
///
/// Ids whose record hash still exists (re-uploaded, or clock skew against
/// Redis' own TTL) are left in place.
const TAKE_EXPIRED_SCRIPT: &str = r#"
local ids = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1], "LIMIT", 0, ARGV[2])
local claimed = {}
for _, id in ipairs(ids) do
    if redis.call("EXISTS", ARGV[3] .. id) == 0 then
        redis.call("ZREM", KEYS[1], id)
        table.insert(claimed, id)
    end
end
return claimed
"#;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_record_key() {
        let id = UploadId::parse("abc123").unwrap();
        assert_eq!(record_key(&id), "upload:meta:abc123");
    }

    #[test]
    fn test_record_key_cannot_collide_with_index() {
        let id = UploadId::parse("expiry").unwrap();
        assert_ne!(record_key(&id), EXPIRY_INDEX_KEY);
    }

    #[test]
    fn test_record_from_fields() {
        let id = UploadId::parse("abc123").unwrap();
        let record = record_from_fields(
            &id,
            &fields(&[
                ("filename", "photo.png"),
                ("delete", "0123456789abcdef0123456789abcdef"),
                ("created", "1700000000"),
                ("expires", "1700086400"),
            ]),
        )
        .unwrap();

        assert_eq!(record.filename, "photo.png");
        assert_eq!(record.delete_token, "0123456789abcdef0123456789abcdef");
        assert_eq!(record.created.timestamp(), 1_700_000_000);
        assert_eq!(record.ttl_secs(), 86_400);
    }

    #[test]
    fn test_record_from_fields_rejects_partial_records() {
        let id = UploadId::parse("abc123").unwrap();

        let missing = record_from_fields(&id, &fields(&[("filename", "photo.png")]));
        assert!(matches!(missing, Err(StorageError::Metadata(_))));

        let garbled = record_from_fields(
            &id,
            &fields(&[
                ("filename", "photo.png"),
                ("delete", "t"),
                ("created", "yesterday"),
                ("expires", "1700086400"),
            ]),
        );
        assert!(matches!(garbled, Err(StorageError::Metadata(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let result = RedisMetadataStore::connect("not a url").await;
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_round_trip_against_redis() {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let store = RedisMetadataStore::connect(&url).await.unwrap();
        let id = UploadId::parse(format!("test-{}", hex::encode(rand::random::<[u8; 8]>())))
            .unwrap();
        let now = Utc::now();
        let record = UploadRecord {
            filename: "photo.png".to_string(),
            delete_token: "token".to_string(),
            created: now,
            expires: now + chrono::Duration::seconds(60),
        };

        store.put(&id, &record).await.unwrap();
        assert_eq!(store.get_filename(&id).await.unwrap(), "photo.png");
        assert_eq!(store.get_delete_token(&id).await.unwrap(), "token");

        store.remove(&id).await.unwrap();
        assert!(store.get(&id).await.unwrap_err().is_not_found());
        store.remove(&id).await.unwrap();

        store.close().await.unwrap();
        assert!(matches!(store.ping().await, Err(StorageError::Metadata(_))));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_take_expired_against_redis() {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let store = RedisMetadataStore::connect(&url).await.unwrap();
        let suffix = hex::encode(rand::random::<[u8; 8]>());
        let short = UploadId::parse(format!("short-{suffix}")).unwrap();
        let long = UploadId::parse(format!("long-{suffix}")).unwrap();
        let now = Utc::now();
        let record = |secs: i64| UploadRecord {
            filename: "a.bin".to_string(),
            delete_token: "token".to_string(),
            created: now,
            expires: now + chrono::Duration::seconds(secs),
        };

        store.put(&short, &record(1)).await.unwrap();
        store.put(&long, &record(60)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2100)).await;

        // Far enough ahead that both ids are due; only the evicted hash is claimed.
        let later = Utc::now() + chrono::Duration::seconds(120);
        let claimed = store.take_expired(later, 1000).await.unwrap();
        assert!(claimed.contains(&short.as_str().to_string()));
        assert!(!claimed.contains(&long.as_str().to_string()));

        let again = store.take_expired(later, 1000).await.unwrap();
        assert!(!again.contains(&short.as_str().to_string()));

        store.remove(&long).await.unwrap();
    }
}
