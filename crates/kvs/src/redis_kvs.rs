//! Redis implementation of the [`Kvs`] trait.
//!
//! Uses a multiplexed tokio connection (cheap to clone, shared across
//! workers). The CAS operations (`del_if_equals`, `pexpire_if_equals`) are
//! Lua scripts so lock release/renewal cannot race another owner.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use crate::backend::Kvs;
use crate::{KvsError, KvsResult};

const DEL_IF_EQUALS: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
  return redis.call('del', KEYS[1])
else
  return 0
end
"#;

const PEXPIRE_IF_EQUALS: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
  return redis.call('pexpire', KEYS[1], ARGV[2])
else
  return 0
end
"#;

pub struct RedisKvs {
    conn: MultiplexedConnection,
    ns: String,
    del_if_equals: redis::Script,
    pexpire_if_equals: redis::Script,
}

impl RedisKvs {
    /// Connect to Redis and namespace all keys under `<namespace>:`.
    pub async fn connect(url: &str, namespace: &str) -> KvsResult<Self> {
        let client = redis::Client::open(url).map_err(|e| KvsError::Connection(e.to_string()))?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(Self {
            conn,
            ns: namespace.to_string(),
            del_if_equals: redis::Script::new(DEL_IF_EQUALS),
            pexpire_if_equals: redis::Script::new(PEXPIRE_IF_EQUALS),
        })
    }

    fn k(&self, key: &str) -> String {
        format!("{}:{}", self.ns, key)
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

#[async_trait]
impl Kvs for RedisKvs {
    async fn get(&self, key: &str) -> KvsResult<Option<String>> {
        let mut conn = self.conn();
        let v: Option<String> = redis::cmd("GET")
            .arg(self.k(key))
            .query_async(&mut conn)
            .await?;
        Ok(v)
    }

    async fn set(&self, key: &str, value: &str) -> KvsResult<()> {
        let mut conn = self.conn();
        redis::cmd("SET")
            .arg(self.k(key))
            .arg(value)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> KvsResult<()> {
        let mut conn = self.conn();
        redis::cmd("SET")
            .arg(self.k(key))
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> KvsResult<bool> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.k(key))
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> KvsResult<bool> {
        let mut conn = self.conn();
        let n: i64 = redis::cmd("DEL")
            .arg(self.k(key))
            .query_async(&mut conn)
            .await?;
        Ok(n > 0)
    }

    async fn del_if_equals(&self, key: &str, value: &str) -> KvsResult<bool> {
        let mut conn = self.conn();
        let n: i64 = self
            .del_if_equals
            .key(self.k(key))
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(n > 0)
    }

    async fn pexpire_if_equals(&self, key: &str, value: &str, ttl_ms: u64) -> KvsResult<bool> {
        let mut conn = self.conn();
        let n: i64 = self
            .pexpire_if_equals
            .key(self.k(key))
            .arg(value)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(n > 0)
    }

    async fn incr(&self, key: &str) -> KvsResult<i64> {
        let mut conn = self.conn();
        let n: i64 = redis::cmd("INCR")
            .arg(self.k(key))
            .query_async(&mut conn)
            .await?;
        Ok(n)
    }

    async fn incr_px(&self, key: &str, ttl_ms: u64) -> KvsResult<i64> {
        let mut conn = self.conn();
        let full = self.k(key);
        let n: i64 = redis::cmd("INCR").arg(&full).query_async(&mut conn).await?;
        if n == 1 {
            redis::cmd("PEXPIRE")
                .arg(&full)
                .arg(ttl_ms)
                .query_async::<i64>(&mut conn)
                .await?;
        }
        Ok(n)
    }

    async fn pexpire(&self, key: &str, ttl_ms: u64) -> KvsResult<bool> {
        let mut conn = self.conn();
        let n: i64 = redis::cmd("PEXPIRE")
            .arg(self.k(key))
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(n > 0)
    }

    async fn pttl(&self, key: &str) -> KvsResult<Option<i64>> {
        let mut conn = self.conn();
        let n: i64 = redis::cmd("PTTL")
            .arg(self.k(key))
            .query_async(&mut conn)
            .await?;
        // -2 = no key, -1 = no TTL.
        Ok(if n < 0 { None } else { Some(n) })
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> KvsResult<()> {
        let mut conn = self.conn();
        redis::cmd("HSET")
            .arg(self.k(key))
            .arg(field)
            .arg(value)
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> KvsResult<Option<String>> {
        let mut conn = self.conn();
        let v: Option<String> = redis::cmd("HGET")
            .arg(self.k(key))
            .arg(field)
            .query_async(&mut conn)
            .await?;
        Ok(v)
    }

    async fn hdel(&self, key: &str, field: &str) -> KvsResult<bool> {
        let mut conn = self.conn();
        let n: i64 = redis::cmd("HDEL")
            .arg(self.k(key))
            .arg(field)
            .query_async(&mut conn)
            .await?;
        Ok(n > 0)
    }

    async fn hlen(&self, key: &str) -> KvsResult<u64> {
        let mut conn = self.conn();
        let n: u64 = redis::cmd("HLEN")
            .arg(self.k(key))
            .query_async(&mut conn)
            .await?;
        Ok(n)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> KvsResult<()> {
        let mut conn = self.conn();
        redis::cmd("ZADD")
            .arg(self.k(key))
            .arg(score)
            .arg(member)
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> KvsResult<bool> {
        let mut conn = self.conn();
        let n: i64 = redis::cmd("ZREM")
            .arg(self.k(key))
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(n > 0)
    }

    async fn zcard(&self, key: &str) -> KvsResult<u64> {
        let mut conn = self.conn();
        let n: u64 = redis::cmd("ZCARD")
            .arg(self.k(key))
            .query_async(&mut conn)
            .await?;
        Ok(n)
    }

    async fn zpop_min(&self, key: &str) -> KvsResult<Option<(String, f64)>> {
        let mut conn = self.conn();
        let popped: Vec<(String, f64)> = redis::cmd("ZPOPMIN")
            .arg(self.k(key))
            .arg(1)
            .query_async(&mut conn)
            .await?;
        Ok(popped.into_iter().next())
    }

    async fn zrangebyscore_below(
        &self,
        key: &str,
        max_score: f64,
        limit: usize,
    ) -> KvsResult<Vec<String>> {
        let mut conn = self.conn();
        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.k(key))
            .arg("-inf")
            .arg(max_score)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn sadd(&self, key: &str, member: &str) -> KvsResult<bool> {
        let mut conn = self.conn();
        let n: i64 = redis::cmd("SADD")
            .arg(self.k(key))
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(n > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> KvsResult<bool> {
        let mut conn = self.conn();
        let n: i64 = redis::cmd("SREM")
            .arg(self.k(key))
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(n > 0)
    }

    async fn sismember(&self, key: &str, member: &str) -> KvsResult<bool> {
        let mut conn = self.conn();
        let n: i64 = redis::cmd("SISMEMBER")
            .arg(self.k(key))
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(n > 0)
    }

    async fn scard(&self, key: &str) -> KvsResult<u64> {
        let mut conn = self.conn();
        let n: u64 = redis::cmd("SCARD")
            .arg(self.k(key))
            .query_async(&mut conn)
            .await?;
        Ok(n)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> KvsResult<Vec<String>> {
        let mut conn = self.conn();
        let pattern = format!("{}:{}*", self.ns, prefix);
        let strip = format!("{}:", self.ns);
        let mut cursor: u64 = 0;
        let mut out = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            for key in batch {
                if let Some(logical) = key.strip_prefix(&strip) {
                    out.push(logical.to_string());
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(out)
    }
}
