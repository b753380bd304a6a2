// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event bus: global monotonic history plus per-session subscriptions with
//! back-pressure (spec §3, §4.7, §5).

use std::collections::{HashSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use hsx_rpc::Event;
use serde_json::Value;

pub type Token = u64;

fn now_ts() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// Thresholds controlling the slow-consumer warn/drop cadence. The spec
/// leaves the exact factors and floors to the implementer (§4.7); these are
/// the defaults `app/hsxd` exposes as CLI overrides.
#[derive(Clone, Copy, Debug)]
pub struct BackpressureConfig {
    pub warn_factor: f64,
    pub warn_floor: usize,
    pub drop_factor: f64,
    pub drop_floor: usize,
    pub grace_period_s: f64,
    pub slow_warning_interval_s: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            warn_factor: 2.0,
            warn_floor: 4,
            drop_factor: 4.0,
            drop_floor: 8,
            grace_period_s: 0.0,
            slow_warning_interval_s: 1.0,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    pub pids: Option<HashSet<u32>>,
    pub categories: Option<HashSet<String>>,
}

impl EventFilter {
    fn matches(&self, ev: &Event) -> bool {
        if let Some(pids) = &self.pids {
            if let Some(pid) = ev.pid {
                if !pids.contains(&pid) {
                    return false;
                }
            }
        }
        if let Some(cats) = &self.categories {
            if !cats.contains(&ev.kind) {
                return false;
            }
        }
        true
    }
}

pub struct Subscription {
    pub token: Token,
    pub session_id: String,
    pub filter: EventFilter,
    pub queue: VecDeque<Event>,
    pub max_events: usize,
    pub last_ack_seq: u64,
    pub drop_counter: u64,
    pub high_water: usize,
    warn_since: Option<f64>,
    last_warning_ts: Option<f64>,
}

/// Outcome of pushing one event into a subscription's queue.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PushOutcome {
    Delivered,
    DeliveredWithWarning,
    Dropped,
}

impl Subscription {
    fn pending(&self) -> usize {
        self.queue.len()
    }

    fn push(&mut self, ev: Event, cfg: &BackpressureConfig) -> (PushOutcome, Option<Event>) {
        self.queue.push_back(ev);
        self.high_water = self.high_water.max(self.queue.len());

        let warn_threshold = ((self.max_events as f64) * cfg.warn_factor).max(cfg.warn_floor as f64) as usize;
        let drop_threshold = ((self.max_events as f64) * cfg.drop_factor).max(cfg.drop_floor as f64) as usize;
        let pending = self.pending();

        if pending > drop_threshold {
            self.drop_counter += 1;
            return (PushOutcome::Dropped, None);
        }

        if pending > warn_threshold {
            let now = now_ts();
            let since = *self.warn_since.get_or_insert(now);
            let grace_elapsed = now - since >= cfg.grace_period_s;
            let interval_elapsed = self
                .last_warning_ts
                .map(|t| now - t >= cfg.slow_warning_interval_s)
                .unwrap_or(true);
            if grace_elapsed && interval_elapsed {
                self.last_warning_ts = Some(now);
                let warning = Event {
                    seq: 0, // overwritten by the bus before queueing
                    ts: now,
                    kind: "warning:slow_consumer".into(),
                    pid: None,
                    data: serde_json::json!({"pending": pending, "max_events": self.max_events}),
                };
                return (PushOutcome::DeliveredWithWarning, Some(warning));
            }
        } else {
            self.warn_since = None;
        }

        (PushOutcome::Delivered, None)
    }

    /// Drains the queue up to and including `seq`, clearing slow-consumer
    /// markers if the backlog falls back within `max_events`.
    pub fn ack(&mut self, seq: u64) {
        self.last_ack_seq = seq;
        self.queue.retain(|e| e.seq > seq);
        if self.queue.len() <= self.max_events {
            self.warn_since = None;
        }
    }
}

pub struct EventBus {
    next_seq: u64,
    history: VecDeque<Event>,
    history_capacity: usize,
    subscriptions: Vec<Subscription>,
    next_token: Token,
    cfg: BackpressureConfig,
}

impl EventBus {
    pub fn new(history_capacity: usize, cfg: BackpressureConfig) -> Self {
        Self {
            next_seq: 1,
            history: VecDeque::new(),
            history_capacity,
            subscriptions: Vec::new(),
            next_token: 1,
            cfg,
        }
    }

    /// Emits an event, appends it to the global history, and delivers it to
    /// every matching subscription, applying back-pressure. Returns the
    /// subscriptions that should be torn down (slow_consumer_drop).
    pub fn emit(&mut self, kind: &str, pid: Option<u32>, data: Value) -> (Event, Vec<Token>) {
        let ev = Event { seq: self.next_seq, ts: now_ts(), kind: kind.to_string(), pid, data };
        self.next_seq += 1;
        self.history.push_back(ev.clone());
        while self.history.len() > self.history_capacity {
            self.history.pop_front();
        }

        let mut to_drop = Vec::new();
        for sub in &mut self.subscriptions {
            if !sub.filter.matches(&ev) {
                continue;
            }
            let (outcome, warning) = sub.push(ev.clone(), &self.cfg);
            match outcome {
                PushOutcome::Delivered => {}
                PushOutcome::DeliveredWithWarning => {
                    if let Some(mut w) = warning {
                        w.seq = self.next_seq;
                        self.next_seq += 1;
                        sub.queue.push_back(w);
                    }
                }
                PushOutcome::Dropped => {
                    let w = Event {
                        seq: self.next_seq,
                        ts: now_ts(),
                        kind: "warning:slow_consumer_drop".into(),
                        pid: None,
                        data: serde_json::json!({"drop_counter": sub.drop_counter}),
                    };
                    self.next_seq += 1;
                    sub.queue.push_back(w);
                    to_drop.push(sub.token);
                }
            }
        }
        (ev, to_drop)
    }

    pub fn subscribe(
        &mut self,
        session_id: &str,
        filter: EventFilter,
        max_events: usize,
        since_seq: Option<u64>,
    ) -> Token {
        let token = self.next_token;
        self.next_token += 1;
        let mut queue = VecDeque::new();
        if let Some(since) = since_seq {
            queue.extend(self.history.iter().filter(|e| e.seq > since && filter.matches(e)).cloned());
        }
        self.subscriptions.push(Subscription {
            token,
            session_id: session_id.to_string(),
            filter,
            queue,
            max_events,
            last_ack_seq: since_seq.unwrap_or(0),
            drop_counter: 0,
            high_water: 0,
            warn_since: None,
            last_warning_ts: None,
        });
        token
    }

    pub fn unsubscribe(&mut self, token: Token) {
        self.subscriptions.retain(|s| s.token != token);
    }

    pub fn unsubscribe_session(&mut self, session_id: &str) {
        self.subscriptions.retain(|s| s.session_id != session_id);
    }

    pub fn subscription_mut(&mut self, token: Token) -> Option<&mut Subscription> {
        self.subscriptions.iter_mut().find(|s| s.token == token)
    }

    pub fn drain_pending(&mut self, token: Token) -> Vec<Event> {
        match self.subscription_mut(token) {
            Some(sub) => sub.queue.drain(..).collect(),
            None => Vec::new(),
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}
