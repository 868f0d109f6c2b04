//! Session pool: bounded set of open provider sessions.
//!
//! Only external providers (subprocess, network) count against
//! `max_sessions`. A slot is reserved before connecting and either filled or
//! released afterwards, so connects racing for the last slot cannot both
//! succeed. Idle sessions are evicted first when capacity is needed.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::RwLock;

use crate::{
    error::{Error, Result},
    traits::McpClientTrait,
    types::ToolDef,
};

pub type SharedClient = Arc<RwLock<dyn McpClientTrait>>;

/// An open session with one provider.
pub struct Session {
    pub client: SharedClient,
    pub tools: Vec<ToolDef>,
    pub external: bool,
    pub opened_at: Instant,
    pub last_used: Instant,
    /// Set after a timeout or transport failure; the next use reconnects.
    pub suspect: bool,
}

impl Session {
    pub fn new(client: SharedClient, tools: Vec<ToolDef>, external: bool, now: Instant) -> Self {
        Self {
            client,
            tools,
            external,
            opened_at: now,
            last_used: now,
            suspect: false,
        }
    }

    pub fn is_idle(&self, idle_timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_used) >= idle_timeout
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolLimits {
    pub max_sessions: usize,
    pub idle_timeout: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_sessions: 8,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Sessions keyed by provider name.
pub struct SessionPool {
    limits: PoolLimits,
    sessions: HashMap<String, Session>,
    reserved: HashSet<String>,
}

impl SessionPool {
    pub fn new(limits: PoolLimits) -> Self {
        Self {
            limits,
            sessions: HashMap::new(),
            reserved: HashSet::new(),
        }
    }

    pub fn limits(&self) -> PoolLimits {
        self.limits
    }

    pub fn get(&self, provider: &str) -> Option<&Session> {
        self.sessions.get(provider)
    }

    pub fn get_mut(&mut self, provider: &str) -> Option<&mut Session> {
        self.sessions.get_mut(provider)
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.sessions.contains_key(provider)
    }

    pub fn is_reserved(&self, provider: &str) -> bool {
        self.reserved.contains(provider)
    }

    /// Open external sessions plus outstanding reservations.
    pub fn external_in_use(&self) -> usize {
        self.sessions.values().filter(|s| s.external).count() + self.reserved.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    /// Reserve capacity for a new external session, evicting the
    /// least-recently-used idle session if the pool is full.
    ///
    /// Returns the evicted sessions; the caller shuts them down outside any
    /// lock. A provider that already holds a reservation or an external
    /// session takes no further capacity.
    pub fn reserve(&mut self, provider: &str, now: Instant) -> Result<Vec<(String, Session)>> {
        let mut evicted = Vec::new();
        if self.reserved.contains(provider) || self.sessions.get(provider).is_some_and(|s| s.external) {
            return Ok(evicted);
        }
        if self.external_in_use() >= self.limits.max_sessions {
            let victim = self
                .sessions
                .iter()
                .filter(|(name, s)| {
                    s.external && name.as_str() != provider && s.is_idle(self.limits.idle_timeout, now)
                })
                .min_by_key(|(_, s)| s.last_used)
                .map(|(name, _)| name.clone());
            match victim.and_then(|name| self.sessions.remove_entry(&name)) {
                Some(entry) => evicted.push(entry),
                None => {
                    return Err(Error::PoolExhausted {
                        max_sessions: self.limits.max_sessions,
                    });
                },
            }
        }
        self.reserved.insert(provider.to_string());
        Ok(evicted)
    }

    pub fn release(&mut self, provider: &str) {
        self.reserved.remove(provider);
    }

    /// Insert an established session, filling its reservation if any.
    /// Returns the session it replaced.
    pub fn insert(&mut self, provider: &str, session: Session) -> Option<Session> {
        self.reserved.remove(provider);
        self.sessions.insert(provider.to_string(), session)
    }

    pub fn remove(&mut self, provider: &str) -> Option<Session> {
        self.sessions.remove(provider)
    }

    pub fn touch(&mut self, provider: &str, now: Instant) {
        if let Some(session) = self.sessions.get_mut(provider) {
            session.last_used = now;
        }
    }

    pub fn mark_suspect(&mut self, provider: &str) {
        if let Some(session) = self.sessions.get_mut(provider) {
            session.suspect = true;
        }
    }

    /// Remove every idle external session.
    pub fn take_idle(&mut self, now: Instant) -> Vec<(String, Session)> {
        let idle: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.external && s.is_idle(self.limits.idle_timeout, now))
            .map(|(name, _)| name.clone())
            .collect();
        idle.into_iter()
            .filter_map(|name| self.sessions.remove_entry(&name))
            .collect()
    }

    pub fn drain(&mut self) -> Vec<(String, Session)> {
        self.reserved.clear();
        self.sessions.drain().collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::local::{LocalClient, ToolSet},
    };

    fn session(external: bool, now: Instant) -> Session {
        let client: SharedClient = Arc::new(RwLock::new(LocalClient::new("t", Arc::new(ToolSet::new()))));
        Session::new(client, Vec::new(), external, now)
    }

    fn pool(max: usize) -> SessionPool {
        SessionPool::new(PoolLimits {
            max_sessions: max,
            idle_timeout: Duration::from_secs(60),
        })
    }

    #[test]
    fn exhausted_when_all_sessions_busy() {
        let now = Instant::now();
        let mut pool = pool(2);
        pool.reserve("a", now).unwrap();
        pool.insert("a", session(true, now));
        pool.reserve("b", now).unwrap();
        // Reserved but not yet inserted still counts.
        let Err(err) = pool.reserve("c", now) else {
            panic!("third reservation should not fit");
        };
        assert!(matches!(err, Error::PoolExhausted { max_sessions: 2 }));

        pool.release("b");
        assert!(pool.reserve("c", now).is_ok());
    }

    #[test]
    fn repeated_reservation_takes_one_slot() {
        let now = Instant::now();
        let mut pool = pool(1);
        pool.reserve("a", now).unwrap();
        assert!(pool.reserve("a", now).unwrap().is_empty());
        assert_eq!(pool.external_in_use(), 1);

        pool.insert("a", session(true, now));
        assert!(pool.reserve("a", now).unwrap().is_empty());
        assert_eq!(pool.external_in_use(), 1);
        assert!(!pool.is_reserved("a"));
    }

    #[test]
    fn internal_sessions_do_not_count() {
        let now = Instant::now();
        let mut pool = pool(1);
        pool.insert("local", session(false, now));
        pool.reserve("remote", now).unwrap();
        pool.insert("remote", session(true, now));
        assert_eq!(pool.external_in_use(), 1);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn evicts_oldest_idle_session_when_full() {
        let start = Instant::now();
        let mut pool = pool(2);
        pool.insert("old", session(true, start));
        pool.insert("older", session(true, start));
        pool.touch("old", start + Duration::from_secs(10));

        let later = start + Duration::from_secs(90);
        let evicted = pool.reserve("new", later).unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].0, "older");
        assert!(pool.contains("old"));
        assert!(pool.is_reserved("new"));
    }

    #[test]
    fn take_idle_only_removes_idle_external_sessions() {
        let start = Instant::now();
        let mut pool = pool(4);
        pool.insert("idle", session(true, start));
        pool.insert("busy", session(true, start));
        pool.insert("local", session(false, start));
        let later = start + Duration::from_secs(61);
        pool.touch("busy", later);

        let removed: Vec<String> = pool.take_idle(later).into_iter().map(|(n, _)| n).collect();
        assert_eq!(removed, vec!["idle"]);
        assert!(pool.contains("busy"));
        assert!(pool.contains("local"));
    }

    #[test]
    fn suspect_flag() {
        let now = Instant::now();
        let mut pool = pool(1);
        pool.insert("a", session(true, now));
        pool.mark_suspect("a");
        assert!(pool.get("a").unwrap().suspect);
    }
}
