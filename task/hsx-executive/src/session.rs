// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session and capability negotiation (spec §3, §4.7).

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

pub const SUPPORTED_FEATURES: &[&str] = &["events", "stack", "symbols", "memory", "watch", "disasm"];

#[derive(Clone, Copy, Debug)]
pub struct SessionLimits {
    pub session_events_max: usize,
    pub heartbeat_min: u32,
    pub heartbeat_max: u32,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self { session_events_max: 4096, heartbeat_min: 5, heartbeat_max: 300 }
    }
}

pub struct Session {
    pub id: String,
    pub client: String,
    pub features: HashSet<String>,
    pub pid_lock: HashSet<u32>,
    pub heartbeat_s: u32,
    pub last_seen: f64,
    pub warnings: Vec<String>,
}

fn now_ts() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

pub struct SessionTable {
    sessions: Vec<Session>,
    next_id: u64,
    limits: SessionLimits,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OpenParams {
    pub max_events: usize,
    pub heartbeat_s: u32,
}

pub enum OpenOutcome {
    Ok { session_id: String, params: OpenParams, warnings: Vec<String> },
    PidLocked(u32),
}

impl SessionTable {
    pub fn new(limits: SessionLimits) -> Self {
        Self { sessions: Vec::new(), next_id: 1, limits }
    }

    pub fn open(
        &mut self,
        client: &str,
        requested_features: &[String],
        requested_max_events: usize,
        requested_heartbeat_s: u32,
        pid_lock: &[u32],
    ) -> OpenOutcome {
        for &pid in pid_lock {
            if self.sessions.iter().any(|s| s.pid_lock.contains(&pid)) {
                return OpenOutcome::PidLocked(pid);
            }
        }

        let mut warnings = Vec::new();
        let mut features = HashSet::new();
        for f in requested_features {
            if SUPPORTED_FEATURES.contains(&f.as_str()) {
                features.insert(f.clone());
            } else {
                warnings.push(format!("unknown_feature:{f}"));
            }
        }

        let max_events = requested_max_events.clamp(2, self.limits.session_events_max);
        let heartbeat_s = requested_heartbeat_s.clamp(self.limits.heartbeat_min, self.limits.heartbeat_max);

        let id = format!("sess-{}", self.next_id);
        self.next_id += 1;
        self.sessions.push(Session {
            id: id.clone(),
            client: client.to_string(),
            features,
            pid_lock: pid_lock.iter().copied().collect(),
            heartbeat_s,
            last_seen: now_ts(),
            warnings: warnings.clone(),
        });

        OpenOutcome::Ok { session_id: id, params: OpenParams { max_events, heartbeat_s }, warnings }
    }

    pub fn keepalive(&mut self, session_id: &str) -> bool {
        match self.sessions.iter_mut().find(|s| s.id == session_id) {
            Some(s) => {
                s.last_seen = now_ts();
                true
            }
            None => false,
        }
    }

    pub fn close(&mut self, session_id: &str) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != session_id);
        self.sessions.len() != before
    }

    /// Checks whether `session_id` may act on `pid`: either it holds the
    /// lock itself, or no one does.
    pub fn can_access(&self, session_id: &str, pid: u32) -> bool {
        !self.sessions.iter().any(|s| s.id != session_id && s.pid_lock.contains(&pid))
    }

    pub fn get(&self, session_id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    /// Prunes sessions whose heartbeat has expired, returning their ids so
    /// the caller can release locks and unsubscribe their event streams.
    pub fn prune_expired(&mut self) -> Vec<String> {
        let now = now_ts();
        let (expired, alive): (Vec<_>, Vec<_>) =
            self.sessions.drain(..).partition(|s| now - s.last_seen > s.heartbeat_s as f64);
        self.sessions = alive;
        expired.into_iter().map(|s| s.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_events_and_heartbeat_are_clamped() {
        let mut table = SessionTable::new(SessionLimits::default());
        let outcome = table.open("client", &[], 1, 1, &[]);
        match outcome {
            OpenOutcome::Ok { params, .. } => {
                assert_eq!(params.max_events, 2);
                assert_eq!(params.heartbeat_s, 5);
            }
            OpenOutcome::PidLocked(_) => panic!("unexpected lock conflict"),
        }
    }

    #[test]
    fn second_session_cannot_steal_a_held_pid_lock() {
        let mut table = SessionTable::new(SessionLimits::default());
        table.open("a", &[], 10, 10, &[7]);
        let outcome = table.open("b", &[], 10, 10, &[7]);
        assert!(matches!(outcome, OpenOutcome::PidLocked(7)));
    }

    #[test]
    fn unknown_feature_warns_but_does_not_fail() {
        let mut table = SessionTable::new(SessionLimits::default());
        let outcome = table.open("a", &["events".to_string(), "telekinesis".to_string()], 10, 10, &[]);
        match outcome {
            OpenOutcome::Ok { warnings, .. } => {
                assert_eq!(warnings, vec!["unknown_feature:telekinesis".to_string()]);
            }
            OpenOutcome::PidLocked(_) => panic!("unexpected"),
        }
    }
}
