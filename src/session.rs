//! Sessions with expiry and a per-user index of live sessions.
//!
//! A session lives under `session:<id>` with the session TTL. The set
//! `user:<user_id>:sessions` lists a user's session ids; it may briefly hold
//! ids whose session already expired, which [`SessionManager::list_for_user`]
//! prunes as it finds them.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::NskvResult;
use crate::namespace::Namespace;
use crate::store::KeyspaceStore;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl DeviceInfo {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            user_agent: None,
            ip: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub device: DeviceInfo,
    pub data: serde_json::Value,
    pub created_at: u64,
    pub last_seen: u64,
}

#[derive(Clone)]
pub struct SessionManager {
    ns: Namespace,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

fn session_key(id: &str) -> String {
    format!("session:{}", id)
}

fn user_key(user_id: &str) -> String {
    format!("user:{}:sessions", user_id)
}

impl SessionManager {
    pub fn new(ns: Namespace, clock: Arc<dyn Clock>) -> Self {
        Self {
            ns,
            clock,
            ttl: DEFAULT_SESSION_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    async fn save(&self, session: &Session) -> NskvResult<()> {
        self.ns
            .set_json(&session_key(&session.id), session, Some(self.ttl))
            .await?;
        self.ns.expire(&user_key(&session.user_id), self.ttl).await?;
        Ok(())
    }

    pub async fn create(
        &self,
        user_id: &str,
        device: DeviceInfo,
        data: serde_json::Value,
    ) -> NskvResult<Session> {
        let now = self.clock.now_millis();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            device,
            data,
            created_at: now,
            last_seen: now,
        };

        self.ns.sadd(&user_key(user_id), &[&session.id]).await?;
        self.save(&session).await?;

        info!(session_id = %session.id, user_id = %user_id, device_id = %session.device.device_id, "session created");
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> NskvResult<Option<Session>> {
        self.ns.get_json(&session_key(id)).await
    }

    /// Marks the session as seen now and extends its expiry.
    pub async fn touch(&self, id: &str) -> NskvResult<bool> {
        let Some(mut session) = self.get(id).await? else {
            return Ok(false);
        };

        session.last_seen = self.clock.now_millis();
        self.save(&session).await?;
        debug!(session_id = %id, "session touched");
        Ok(true)
    }

    pub async fn update_data(&self, id: &str, data: serde_json::Value) -> NskvResult<bool> {
        let Some(mut session) = self.get(id).await? else {
            return Ok(false);
        };

        session.data = data;
        session.last_seen = self.clock.now_millis();
        self.save(&session).await?;
        Ok(true)
    }

    pub async fn destroy(&self, id: &str) -> NskvResult<bool> {
        let Some(session) = self.get(id).await? else {
            return Ok(false);
        };

        let removed = self.ns.del(&[&session_key(id)]).await?;
        self.ns.srem(&user_key(&session.user_id), &[id]).await?;

        info!(session_id = %id, user_id = %session.user_id, "session destroyed");
        Ok(removed > 0)
    }

    /// Live sessions of `user_id`, oldest first.
    pub async fn list_for_user(&self, user_id: &str) -> NskvResult<Vec<Session>> {
        let index = user_key(user_id);
        let mut sessions = Vec::new();

        for id in self.ns.smembers(&index).await? {
            match self.get(&id).await? {
                Some(session) => sessions.push(session),
                None => {
                    self.ns.srem(&index, &[&id]).await?;
                    debug!(session_id = %id, user_id = %user_id, "pruned expired session from index");
                }
            }
        }

        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(sessions)
    }

    /// Logs the user out everywhere. Returns how many sessions were removed.
    pub async fn destroy_all_for_user(&self, user_id: &str) -> NskvResult<usize> {
        let index = user_key(user_id);
        let keys: Vec<String> = self
            .ns
            .smembers(&index)
            .await?
            .iter()
            .map(|id| session_key(id))
            .collect();

        let mut removed = 0;
        if !keys.is_empty() {
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            removed = self.ns.del(&refs).await? as usize;
        }
        self.ns.del(&[&index]).await?;

        info!(user_id = %user_id, removed, "all sessions destroyed");
        Ok(removed)
    }

    /// Distinct devices across the user's live sessions.
    pub async fn device_count(&self, user_id: &str) -> NskvResult<usize> {
        let devices: HashSet<String> = self
            .list_for_user(user_id)
            .await?
            .into_iter()
            .map(|s| s.device.device_id)
            .collect();
        Ok(devices.len())
    }
}
