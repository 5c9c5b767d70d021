//! Daily event analytics: approximate unique visitors and exact totals.
//!
//! Buckets are UTC days: `unique:<event>:<YYYY-MM-DD>` is a HyperLogLog of
//! visitor ids, `count:<event>:<YYYY-MM-DD>` a plain counter.

use std::sync::Arc;

use chrono::{Days, NaiveDate, TimeZone, Utc};
use tracing::debug;

use crate::clock::Clock;
use crate::error::{NskvError, NskvResult};
use crate::namespace::Namespace;
use crate::store::KeyspaceStore;

#[derive(Clone)]
pub struct Analytics {
    ns: Namespace,
    clock: Arc<dyn Clock>,
}

fn unique_key(event: &str, bucket: &str) -> String {
    format!("unique:{}:{}", event, bucket)
}

fn count_key(event: &str, bucket: &str) -> String {
    format!("count:{}:{}", event, bucket)
}

fn day_label(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

impl Analytics {
    pub fn new(ns: Namespace, clock: Arc<dyn Clock>) -> Self {
        Self { ns, clock }
    }

    /// Current UTC day according to the clock.
    pub fn today(&self) -> NskvResult<NaiveDate> {
        let now = self.clock.now_millis() as i64;
        Utc.timestamp_millis_opt(now)
            .single()
            .map(|at| at.date_naive())
            .ok_or_else(|| NskvError::Internal(format!("clock value {} is out of range", now)))
    }

    /// The `n` days ending today, oldest first.
    pub fn last_days(&self, n: u64) -> NskvResult<Vec<NaiveDate>> {
        let today = self.today()?;
        Ok((0..n)
            .rev()
            .filter_map(|back| today.checked_sub_days(Days::new(back)))
            .collect())
    }

    /// Records one occurrence of `event` by `visitor_id` today. Returns
    /// whether the visitor looked new to today's unique estimate.
    pub async fn track(&self, event: &str, visitor_id: &str) -> NskvResult<bool> {
        let day = day_label(self.today()?);
        let added = self.ns.pfadd(&unique_key(event, &day), &[visitor_id]).await?;
        self.ns.incr(&count_key(event, &day), 1).await?;

        debug!(event = %event, day = %day, new_visitor = added, "event tracked");
        Ok(added)
    }

    pub async fn unique_count(&self, event: &str, day: NaiveDate) -> NskvResult<u64> {
        self.ns
            .pfcount(&[&unique_key(event, &day_label(day))])
            .await
    }

    /// Distinct visitors across all of `days`, each visitor counted once.
    pub async fn unique_count_range(&self, event: &str, days: &[NaiveDate]) -> NskvResult<u64> {
        if days.is_empty() {
            return Ok(0);
        }

        let keys: Vec<String> = days
            .iter()
            .map(|day| unique_key(event, &day_label(*day)))
            .collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        self.ns.pfcount(&refs).await
    }

    /// Stores the union of `days` under `unique:<event>:<label>` (for
    /// example a week or month label) and returns its cardinality.
    pub async fn merge_unique(
        &self,
        event: &str,
        days: &[NaiveDate],
        label: &str,
    ) -> NskvResult<u64> {
        let dest = unique_key(event, label);
        let sources: Vec<String> = days
            .iter()
            .map(|day| unique_key(event, &day_label(*day)))
            .collect();
        let refs: Vec<&str> = sources.iter().map(String::as_str).collect();

        self.ns.pfmerge(&dest, &refs).await?;
        self.ns.pfcount(&[&dest]).await
    }

    pub async fn event_count(&self, event: &str, day: NaiveDate) -> NskvResult<u64> {
        let raw = self.ns.get(&count_key(event, &day_label(day))).await?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
    }
}
