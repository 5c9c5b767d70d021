//! In-process [`KeyspaceStore`].
//!
//! Every operation takes the single map lock, so each call is atomic with
//! respect to every other call, which is the guarantee the engines rely on
//! from Redis. Expired keys are dropped lazily when touched. HyperLogLogs
//! are kept as exact sets, so counts are exact rather than approximate.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use super::{KeyspaceStore, ScoredMember, SetCondition, SetOptions};
use crate::clock::{Clock, SystemClock};
use crate::error::{NskvError, NskvResult};

type Entries = HashMap<String, Entry>;

pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    entries: RwLock<Entries>,
}

struct Entry {
    value: Value,
    expires_at: Option<u64>,
}

enum Value {
    String(String),
    Hash(HashMap<String, String>),
    SortedSet(SortedSet),
    Set(HashSet<String>),
    HyperLogLog(HashSet<String>),
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn is_empty(&self) -> bool {
        match &self.value {
            Value::String(_) | Value::HyperLogLog(_) => false,
            Value::Hash(map) => map.is_empty(),
            Value::SortedSet(zset) => zset.scores.is_empty(),
            Value::Set(set) => set.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Ordered by (score, member), like a Redis zset.
#[derive(Default)]
struct SortedSet {
    scores: HashMap<String, f64>,
    order: BTreeSet<(Score, String)>,
}

impl SortedSet {
    /// Returns `true` if the member is new.
    fn insert(&mut self, member: &str, score: f64) -> bool {
        let previous = self.scores.insert(member.to_string(), score);
        if let Some(old) = previous {
            self.order.remove(&(Score(old), member.to_string()));
        }
        self.order.insert((Score(score), member.to_string()));
        previous.is_none()
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.order.remove(&(Score(score), member.to_string()));
                true
            }
            None => false,
        }
    }

    fn rank(&self, member: &str) -> Option<usize> {
        let score = *self.scores.get(member)?;
        self.order
            .iter()
            .position(|(s, m)| *s == Score(score) && m == member)
    }

    fn by_score(&self, min: f64, max: f64) -> impl Iterator<Item = ScoredMember> + '_ {
        self.order
            .range((Score(min), String::new())..)
            .take_while(move |(score, _)| score.0 <= max)
            .map(|(score, member)| (member.clone(), score.0))
    }

    fn ascending(&self) -> impl DoubleEndedIterator<Item = ScoredMember> + '_ {
        self.order
            .iter()
            .map(|(score, member)| (member.clone(), score.0))
    }
}

/// Resolves Redis-style inclusive, possibly negative, indexes into a
/// `(skip, take)` pair.
fn index_window(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, (stop - start + 1) as usize))
}

fn wrong_type(key: &str) -> NskvError {
    NskvError::Store(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {}",
        key
    ))
}

/// Translates a Redis glob (`*`, `?`, `[...]`, `\x`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> NskvResult<Regex> {
    let mut re = String::from("(?s)^");
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                re.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    re.push('^');
                }
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    if matches!(c, '\\' | '[' | '&' | '~') {
                        re.push('\\');
                    }
                    re.push(c);
                }
                re.push(']');
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    re.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');

    Regex::new(&re)
        .map_err(|e| NskvError::Validation(format!("Invalid scan pattern '{}': {}", pattern, e)))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Expiry is judged against `clock`, so a [`crate::clock::ManualClock`]
    /// shared with the engines makes TTLs advance with simulated time.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> NskvResult<usize> {
        let now = self.clock.now_millis();
        let entries = self.read()?;
        Ok(entries.values().filter(|e| !e.is_expired(now)).count())
    }

    pub fn is_empty(&self) -> NskvResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> NskvResult<RwLockReadGuard<'_, Entries>> {
        self.entries
            .read()
            .map_err(|_| NskvError::Internal("Failed to acquire read lock on store".to_string()))
    }

    fn write(&self) -> NskvResult<RwLockWriteGuard<'_, Entries>> {
        self.entries
            .write()
            .map_err(|_| NskvError::Internal("Failed to acquire write lock on store".to_string()))
    }

    fn live<'a>(entries: &'a Entries, key: &str, now: u64) -> Option<&'a Entry> {
        entries.get(key).filter(|e| !e.is_expired(now))
    }

    fn live_mut<'a>(entries: &'a mut Entries, key: &str, now: u64) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }

    fn live_or_insert<'a>(
        entries: &'a mut Entries,
        key: &str,
        now: u64,
        make: fn() -> Value,
    ) -> &'a mut Entry {
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(make()))
    }

    /// Drops `key` if the last operation emptied its container.
    fn drop_if_empty(entries: &mut Entries, key: &str) {
        if entries.get(key).is_some_and(Entry::is_empty) {
            entries.remove(key);
        }
    }

    fn with_zset<T>(
        &self,
        key: &str,
        empty: T,
        f: impl FnOnce(&SortedSet) -> T,
    ) -> NskvResult<T> {
        let now = self.clock.now_millis();
        let entries = self.read()?;
        match Self::live(&entries, key, now).map(|e| &e.value) {
            None => Ok(empty),
            Some(Value::SortedSet(zset)) => Ok(f(zset)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn with_zset_mut<T>(
        &self,
        key: &str,
        create: bool,
        empty: T,
        f: impl FnOnce(&mut SortedSet) -> T,
    ) -> NskvResult<T> {
        let now = self.clock.now_millis();
        let mut entries = self.write()?;
        let entry = if create {
            Some(Self::live_or_insert(&mut entries, key, now, || {
                Value::SortedSet(SortedSet::default())
            }))
        } else {
            Self::live_mut(&mut entries, key, now)
        };
        let result = match entry.map(|e| &mut e.value) {
            None => empty,
            Some(Value::SortedSet(zset)) => f(zset),
            Some(_) => return Err(wrong_type(key)),
        };
        Self::drop_if_empty(&mut entries, key);
        Ok(result)
    }

    fn with_set<T>(&self, key: &str, empty: T, f: impl FnOnce(&HashSet<String>) -> T) -> NskvResult<T> {
        let now = self.clock.now_millis();
        let entries = self.read()?;
        match Self::live(&entries, key, now).map(|e| &e.value) {
            None => Ok(empty),
            Some(Value::Set(set)) => Ok(f(set)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn with_hash<T>(
        &self,
        key: &str,
        empty: T,
        f: impl FnOnce(&HashMap<String, String>) -> T,
    ) -> NskvResult<T> {
        let now = self.clock.now_millis();
        let entries = self.read()?;
        match Self::live(&entries, key, now).map(|e| &e.value) {
            None => Ok(empty),
            Some(Value::Hash(map)) => Ok(f(map)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hll_members(entries: &Entries, key: &str, now: u64) -> NskvResult<Option<HashSet<String>>> {
        match Self::live(entries, key, now).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::HyperLogLog(set)) => Ok(Some(set.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyspaceStore for MemoryStore {
    async fn ping(&self) -> NskvResult<()> {
        self.read().map(|_| ())
    }

    async fn get(&self, key: &str) -> NskvResult<Option<String>> {
        let now = self.clock.now_millis();
        let entries = self.read()?;
        match Self::live(&entries, key, now).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, options: SetOptions) -> NskvResult<bool> {
        let now = self.clock.now_millis();
        let mut entries = self.write()?;
        let exists = Self::live_mut(&mut entries, key, now).is_some();

        let allowed = match options.condition {
            SetCondition::Always => true,
            SetCondition::IfAbsent => !exists,
            SetCondition::IfPresent => exists,
        };
        if !allowed {
            return Ok(false);
        }

        entries.insert(
            key.to_string(),
            Entry {
                value: Value::String(value.to_string()),
                expires_at: options.ttl.map(|ttl| now + ttl.as_millis() as u64),
            },
        );
        Ok(true)
    }

    async fn mget(&self, keys: &[&str]) -> NskvResult<Vec<Option<String>>> {
        let now = self.clock.now_millis();
        let entries = self.read()?;
        Ok(keys
            .iter()
            .map(|key| match Self::live(&entries, key, now).map(|e| &e.value) {
                Some(Value::String(value)) => Some(value.clone()),
                _ => None,
            })
            .collect())
    }

    async fn del(&self, keys: &[&str]) -> NskvResult<u64> {
        let now = self.clock.now_millis();
        let mut entries = self.write()?;
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = entries.remove(*key) {
                if !entry.is_expired(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn exists(&self, keys: &[&str]) -> NskvResult<u64> {
        let now = self.clock.now_millis();
        let entries = self.read()?;
        Ok(keys
            .iter()
            .filter(|key| Self::live(&entries, key, now).is_some())
            .count() as u64)
    }

    async fn incr(&self, key: &str, delta: i64) -> NskvResult<i64> {
        let now = self.clock.now_millis();
        let mut entries = self.write()?;
        let entry = Self::live_or_insert(&mut entries, key, now, || Value::String("0".to_string()));

        match &mut entry.value {
            Value::String(current) => {
                let value: i64 = current.parse().map_err(|_| {
                    NskvError::Store("ERR value is not an integer or out of range".to_string())
                })?;
                let next = value
                    .checked_add(delta)
                    .ok_or_else(|| NskvError::Store("ERR increment or decrement would overflow".to_string()))?;
                *current = next.to_string();
                Ok(next)
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> NskvResult<bool> {
        let now = self.clock.now_millis();
        let mut entries = self.write()?;
        match Self::live_mut(&mut entries, key, now) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl.as_millis() as u64);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> NskvResult<i64> {
        let now = self.clock.now_millis();
        let entries = self.read()?;
        Ok(match Self::live(&entries, key, now) {
            None => -2,
            Some(Entry { expires_at: None, .. }) => -1,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => ((at - now + 500) / 1000) as i64,
        })
    }

    async fn pttl(&self, key: &str) -> NskvResult<i64> {
        let now = self.clock.now_millis();
        let entries = self.read()?;
        Ok(match Self::live(&entries, key, now) {
            None => -2,
            Some(Entry { expires_at: None, .. }) => -1,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => (at - now) as i64,
        })
    }

    async fn hset(&self, key: &str, fields: &[(&str, &str)]) -> NskvResult<u64> {
        let now = self.clock.now_millis();
        let mut entries = self.write()?;
        let entry = Self::live_or_insert(&mut entries, key, now, || Value::Hash(HashMap::new()));
        let result = match &mut entry.value {
            Value::Hash(map) => Ok(fields
                .iter()
                .filter(|(field, value)| map.insert(field.to_string(), value.to_string()).is_none())
                .count() as u64),
            _ => Err(wrong_type(key)),
        };
        Self::drop_if_empty(&mut entries, key);
        result
    }

    async fn hget(&self, key: &str, field: &str) -> NskvResult<Option<String>> {
        self.with_hash(key, None, |map| map.get(field).cloned())
    }

    async fn hgetall(&self, key: &str) -> NskvResult<HashMap<String, String>> {
        self.with_hash(key, HashMap::new(), |map| map.clone())
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> NskvResult<u64> {
        let now = self.clock.now_millis();
        let mut entries = self.write()?;
        let result = match Self::live_mut(&mut entries, key, now).map(|e| &mut e.value) {
            None => Ok(0),
            Some(Value::Hash(map)) => Ok(fields
                .iter()
                .filter(|field| map.remove(**field).is_some())
                .count() as u64),
            Some(_) => Err(wrong_type(key)),
        };
        Self::drop_if_empty(&mut entries, key);
        result
    }

    async fn zadd(&self, key: &str, members: &[(f64, &str)]) -> NskvResult<u64> {
        self.with_zset_mut(key, true, 0, |zset| {
            members
                .iter()
                .filter(|(score, member)| zset.insert(member, *score))
                .count() as u64
        })
    }

    async fn zrem(&self, key: &str, members: &[&str]) -> NskvResult<u64> {
        self.with_zset_mut(key, false, 0, |zset| {
            members.iter().filter(|member| zset.remove(member)).count() as u64
        })
    }

    async fn zcard(&self, key: &str) -> NskvResult<u64> {
        self.with_zset(key, 0, |zset| zset.scores.len() as u64)
    }

    async fn zscore(&self, key: &str, member: &str) -> NskvResult<Option<f64>> {
        self.with_zset(key, None, |zset| zset.scores.get(member).copied())
    }

    async fn zrank(&self, key: &str, member: &str) -> NskvResult<Option<u64>> {
        self.with_zset(key, None, |zset| zset.rank(member).map(|r| r as u64))
    }

    async fn zrevrank(&self, key: &str, member: &str) -> NskvResult<Option<u64>> {
        self.with_zset(key, None, |zset| {
            zset.rank(member)
                .map(|r| (zset.scores.len() - 1 - r) as u64)
        })
    }

    async fn zincrby(&self, key: &str, delta: f64, member: &str) -> NskvResult<f64> {
        self.with_zset_mut(key, true, 0.0, |zset| {
            let score = zset.scores.get(member).copied().unwrap_or(0.0) + delta;
            zset.insert(member, score);
            score
        })
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> NskvResult<Vec<ScoredMember>> {
        self.with_zset(key, Vec::new(), |zset| {
            match index_window(zset.scores.len(), start, stop) {
                Some((skip, take)) => zset.ascending().skip(skip).take(take).collect(),
                None => Vec::new(),
            }
        })
    }

    async fn zrevrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> NskvResult<Vec<ScoredMember>> {
        self.with_zset(key, Vec::new(), |zset| {
            match index_window(zset.scores.len(), start, stop) {
                Some((skip, take)) => zset.ascending().rev().skip(skip).take(take).collect(),
                None => Vec::new(),
            }
        })
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<(usize, usize)>,
    ) -> NskvResult<Vec<ScoredMember>> {
        self.with_zset(key, Vec::new(), |zset| {
            let matching = zset.by_score(min, max);
            match limit {
                Some((offset, count)) => matching.skip(offset).take(count).collect(),
                None => matching.collect(),
            }
        })
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> NskvResult<u64> {
        self.with_zset_mut(key, false, 0, |zset| {
            let doomed: Vec<String> = zset.by_score(min, max).map(|(member, _)| member).collect();
            for member in &doomed {
                zset.remove(member);
            }
            doomed.len() as u64
        })
    }

    async fn sadd(&self, key: &str, members: &[&str]) -> NskvResult<u64> {
        let now = self.clock.now_millis();
        let mut entries = self.write()?;
        let entry = Self::live_or_insert(&mut entries, key, now, || Value::Set(HashSet::new()));
        let result = match &mut entry.value {
            Value::Set(set) => Ok(members
                .iter()
                .filter(|member| set.insert(member.to_string()))
                .count() as u64),
            _ => Err(wrong_type(key)),
        };
        Self::drop_if_empty(&mut entries, key);
        result
    }

    async fn srem(&self, key: &str, members: &[&str]) -> NskvResult<u64> {
        let now = self.clock.now_millis();
        let mut entries = self.write()?;
        let result = match Self::live_mut(&mut entries, key, now).map(|e| &mut e.value) {
            None => Ok(0),
            Some(Value::Set(set)) => Ok(members
                .iter()
                .filter(|member| set.remove(**member))
                .count() as u64),
            Some(_) => Err(wrong_type(key)),
        };
        Self::drop_if_empty(&mut entries, key);
        result
    }

    async fn smembers(&self, key: &str) -> NskvResult<Vec<String>> {
        self.with_set(key, Vec::new(), |set| set.iter().cloned().collect())
    }

    async fn sismember(&self, key: &str, member: &str) -> NskvResult<bool> {
        self.with_set(key, false, |set| set.contains(member))
    }

    async fn scard(&self, key: &str) -> NskvResult<u64> {
        self.with_set(key, 0, |set| set.len() as u64)
    }

    async fn scan(&self, pattern: &str) -> NskvResult<Vec<String>> {
        let matcher = glob_to_regex(pattern)?;
        let now = self.clock.now_millis();
        let entries = self.read()?;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && matcher.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn pfadd(&self, key: &str, elements: &[&str]) -> NskvResult<bool> {
        let now = self.clock.now_millis();
        let mut entries = self.write()?;
        let created = Self::live_mut(&mut entries, key, now).is_none();
        let entry =
            Self::live_or_insert(&mut entries, key, now, || Value::HyperLogLog(HashSet::new()));
        match &mut entry.value {
            Value::HyperLogLog(set) => {
                let mut changed = created;
                for element in elements {
                    changed |= set.insert(element.to_string());
                }
                Ok(changed)
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn pfcount(&self, keys: &[&str]) -> NskvResult<u64> {
        let now = self.clock.now_millis();
        let entries = self.read()?;
        let mut union: HashSet<String> = HashSet::new();
        for key in keys {
            if let Some(members) = Self::hll_members(&entries, key, now)? {
                union.extend(members);
            }
        }
        Ok(union.len() as u64)
    }

    async fn pfmerge(&self, dest: &str, sources: &[&str]) -> NskvResult<()> {
        let now = self.clock.now_millis();
        let mut entries = self.write()?;
        let mut union = Self::hll_members(&entries, dest, now)?.unwrap_or_default();
        for source in sources {
            if let Some(members) = Self::hll_members(&entries, source, now)? {
                union.extend(members);
            }
        }

        let expires_at = Self::live(&entries, dest, now).and_then(|e| e.expires_at);
        entries.insert(
            dest.to_string(),
            Entry {
                value: Value::HyperLogLog(union),
                expires_at,
            },
        );
        Ok(())
    }

    async fn publish(&self, _channel: &str, _message: &str) -> NskvResult<u64> {
        // no in-process subscribers
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = MemoryStore::with_clock(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_set_conditions() {
        let (_, store) = store();
        assert!(!store.set("k", "1", SetOptions::default().if_present()).await.unwrap());
        assert!(store.set("k", "1", SetOptions::default().if_absent()).await.unwrap());
        assert!(!store.set("k", "2", SetOptions::default().if_absent()).await.unwrap());
        assert!(store.set("k", "3", SetOptions::default().if_present()).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_ttl_expiry_follows_clock() {
        let (clock, store) = store();
        store
            .set("k", "v", SetOptions::with_ttl(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(store.ttl("k").await.unwrap(), 10);

        clock.advance(Duration::from_secs(4));
        assert_eq!(store.ttl("k").await.unwrap(), 6);

        clock.advance(Duration::from_millis(5_700));
        assert_eq!(store.ttl("k").await.unwrap(), 0);
        assert_eq!(store.pttl("k").await.unwrap(), 300);
        assert_eq!(store.len().unwrap(), 1);

        clock.advance(Duration::from_millis(300));

        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), -2);
        assert_eq!(store.pttl("k").await.unwrap(), -2);
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_plain_set_clears_ttl() {
        let (_, store) = store();
        store
            .set("k", "v", SetOptions::with_ttl(Duration::from_secs(10)))
            .await
            .unwrap();
        store.set("k", "v", SetOptions::default()).await.unwrap();
        assert_eq!(store.ttl("k").await.unwrap(), -1);
        assert_eq!(store.pttl("k").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_incr_keeps_ttl_and_rejects_non_integers() {
        let (_, store) = store();
        assert_eq!(store.incr("n", 1).await.unwrap(), 1);
        store.expire("n", Duration::from_secs(30)).await.unwrap();
        assert_eq!(store.incr("n", 5).await.unwrap(), 6);
        assert_eq!(store.ttl("n").await.unwrap(), 30);

        store.set("s", "abc", SetOptions::default()).await.unwrap();
        assert!(store.incr("s", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_sorted_set_ordering_and_ranges() {
        let (_, store) = store();
        store
            .zadd("z", &[(3.0, "c"), (1.0, "a"), (2.0, "b"), (2.0, "bb")])
            .await
            .unwrap();

        let all: Vec<String> = store
            .zrange("z", 0, -1)
            .await
            .unwrap()
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        assert_eq!(all, vec!["a", "b", "bb", "c"]);

        let rev = store.zrevrange("z", 0, 0).await.unwrap();
        assert_eq!(rev, vec![("c".to_string(), 3.0)]);

        let mid = store.zrange_by_score("z", 2.0, 3.0, Some((1, 2))).await.unwrap();
        assert_eq!(mid, vec![("bb".to_string(), 2.0), ("c".to_string(), 3.0)]);

        assert_eq!(store.zrank("z", "b").await.unwrap(), Some(1));
        assert_eq!(store.zrevrank("z", "b").await.unwrap(), Some(2));
        assert_eq!(store.zincrby("z", 5.0, "a").await.unwrap(), 6.0);
        assert_eq!(store.zrevrank("z", "a").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_zrem_reports_removed_count() {
        let (_, store) = store();
        store.zadd("z", &[(1.0, "a")]).await.unwrap();
        assert_eq!(store.zrem("z", &["a"]).await.unwrap(), 1);
        assert_eq!(store.zrem("z", &["a"]).await.unwrap(), 0);
        assert_eq!(store.exists(&["z"]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zrem_range_by_score() {
        let (_, store) = store();
        store
            .zadd("z", &[(1.0, "a"), (5.0, "b"), (9.0, "c")])
            .await
            .unwrap();
        let removed = store
            .zrem_range_by_score("z", f64::NEG_INFINITY, 5.0)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.zcard("z").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let (_, store) = store();
        store.sadd("s", &["x"]).await.unwrap();
        assert!(store.get("s").await.is_err());
        assert!(store.zadd("s", &[(1.0, "x")]).await.is_err());
    }

    #[tokio::test]
    async fn test_scan_glob() {
        let (_, store) = store();
        for key in ["user:1", "user:2", "user:10", "order:1"] {
            store.set(key, "v", SetOptions::default()).await.unwrap();
        }
        assert_eq!(store.scan("user:*").await.unwrap(), vec!["user:1", "user:10", "user:2"]);
        assert_eq!(store.scan("user:?").await.unwrap(), vec!["user:1", "user:2"]);
        assert_eq!(store.scan("[ou]*:1").await.unwrap(), vec!["order:1", "user:1"]);
    }

    #[tokio::test]
    async fn test_hyperloglog_union() {
        let (_, store) = store();
        assert!(store.pfadd("a", &["x", "y"]).await.unwrap());
        assert!(!store.pfadd("a", &["x"]).await.unwrap());
        store.pfadd("b", &["y", "z"]).await.unwrap();

        assert_eq!(store.pfcount(&["a", "b"]).await.unwrap(), 3);
        store.pfmerge("ab", &["a", "b"]).await.unwrap();
        assert_eq!(store.pfcount(&["ab"]).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_hash_fields() {
        let (_, store) = store();
        assert_eq!(store.hset("h", &[("a", "1"), ("b", "2")]).await.unwrap(), 2);
        assert_eq!(store.hset("h", &[("a", "3")]).await.unwrap(), 0);
        assert_eq!(store.hget("h", "a").await.unwrap().as_deref(), Some("3"));
        assert_eq!(store.hdel("h", &["a", "b"]).await.unwrap(), 2);
        assert!(store.hgetall("h").await.unwrap().is_empty());
    }

    #[test]
    fn test_index_window() {
        assert_eq!(index_window(5, 0, -1), Some((0, 5)));
        assert_eq!(index_window(5, -2, -1), Some((3, 2)));
        assert_eq!(index_window(5, 3, 100), Some((3, 2)));
        assert_eq!(index_window(5, 4, 2), None);
        assert_eq!(index_window(0, 0, -1), None);
    }
}
