//! # Server Pool
//!
//! The [`ServerPool`] keeps a reputation record for every peer we have requested data from
//! and decides which of them are worth asking again.
//!
//! Records are never deleted, a peer that misbehaves keeps its record with a score of `0`
//! so it is not trusted again after reconnecting. Records are [`borsh`] encoded in the
//! node's [`KeyValueStore`] under [`SERVER_POOL_PREFIX`] and restored on startup.
use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use borsh::{BorshDeserialize, BorshSerialize};
use rand::seq::SliceRandom;

use cinder_database::{DbError, DbResult, KeyValueStore, WriteBatch};
use cinder_p2p_core::PeerId;

use crate::{config::ServerPoolConfig, constants::INITIAL_SCORE};

/// The key prefix of the server pool records.
pub const SERVER_POOL_PREFIX: &[u8] = b"server_pool/v1/";

fn record_key(id: PeerId) -> Vec<u8> {
    let mut key = SERVER_POOL_PREFIX.to_vec();
    key.extend_from_slice(&id.0.to_be_bytes());
    key
}

/// The outcome of one request to a server.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success { latency: Duration },
    Timeout,
    InvalidResponse,
}

/// Dial backoff state.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DialBackoff {
    /// Failed dials in a row.
    pub failures: u32,
    /// UNIX timestamp before which the peer is not dialed.
    pub next_dial: u64,
}

/// One server's reputation record.
#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct ServerPoolEntry {
    pub id: u64,
    /// The address we dial the peer on, unknown for inbound peers.
    pub addr: Option<String>,
    pub successes: u64,
    pub timeouts: u64,
    pub invalid_responses: u64,
    /// Moving average of the response latency, in microseconds.
    pub avg_latency_us: u64,
    /// In `0.0..=1.0`.
    pub score: f64,
    /// Invalid responses in a row.
    pub strikes: u8,
    /// Set after too many invalid responses, a removed server is never used again.
    pub removed: bool,
    pub backoff: DialBackoff,
}

impl ServerPoolEntry {
    fn new(id: PeerId) -> Self {
        Self {
            id: id.0,
            addr: None,
            successes: 0,
            timeouts: 0,
            invalid_responses: 0,
            avg_latency_us: 0,
            score: INITIAL_SCORE,
            strikes: 0,
            removed: false,
            backoff: DialBackoff::default(),
        }
    }

    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.addr.as_ref()?.parse().ok()
    }

    pub const fn failures(&self) -> u64 {
        self.timeouts + self.invalid_responses
    }
}

/// Scores and ranks the peers we retrieve data from.
///
/// See the [module docs](self) for more.
pub struct ServerPool {
    config: ServerPoolConfig,
    entries: Mutex<BTreeMap<PeerId, ServerPoolEntry>>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl ServerPool {
    /// A server pool that is not persisted.
    pub fn new(config: ServerPoolConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(BTreeMap::new()),
            store: None,
        }
    }

    /// Loads the server pool records from `store`, [`ServerPool::save`] writes them back.
    ///
    /// # Errors
    /// Returns an error if the store can not be read or a record is corrupt.
    pub fn load(config: ServerPoolConfig, store: Arc<dyn KeyValueStore>) -> DbResult<Self> {
        let mut entries = BTreeMap::new();

        for (key, value) in store.scan_prefix(SERVER_POOL_PREFIX)? {
            let entry = ServerPoolEntry::try_from_slice(&value).map_err(|_| DbError::Decode {
                key: String::from_utf8_lossy(&key).into_owned(),
            })?;
            entries.insert(PeerId(entry.id), entry);
        }

        tracing::info!(records = entries.len(), "loaded server pool");

        Ok(Self {
            config,
            entries: Mutex::new(entries),
            store: Some(store),
        })
    }

    /// Writes every record to the store, does nothing if the pool is not persisted.
    ///
    /// # Errors
    /// Returns an error if the store can not be written to.
    pub fn save(&self) -> DbResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let mut batch = WriteBatch::new();
        {
            let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            for (id, entry) in &*entries {
                batch.put_borsh(record_key(*id), entry);
            }
        }

        tracing::debug!(records = batch.len(), "saving server pool");
        store.write_batch(batch)
    }

    fn with_entry<R>(&self, id: PeerId, f: impl FnOnce(&mut ServerPoolEntry) -> R) -> R {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        f(entries.entry(id).or_insert_with(|| ServerPoolEntry::new(id)))
    }

    /// Records the outcome of a request to `id`.
    ///
    /// Returns `true` if this outcome removed the server from the pool.
    pub fn report(&self, id: PeerId, outcome: Outcome) -> bool {
        let config = self.config;

        self.with_entry(id, |entry| {
            match outcome {
                Outcome::Success { latency } => {
                    let reference = config.reference_latency.as_secs_f64();
                    let weight = reference / (reference + latency.as_secs_f64());

                    entry.score += (1.0 - entry.score) * (1.0 - config.success_decay) * weight;
                    entry.successes += 1;
                    entry.strikes = 0;

                    let latency_us = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
                    entry.avg_latency_us = if entry.successes == 1 {
                        latency_us
                    } else {
                        entry.avg_latency_us.saturating_mul(7).saturating_add(latency_us) / 8
                    };
                }
                Outcome::Timeout => {
                    entry.score *= config.failure_decay;
                    entry.timeouts += 1;
                    entry.strikes = 0;
                }
                Outcome::InvalidResponse => {
                    entry.score *= config.failure_decay;
                    entry.invalid_responses += 1;
                    entry.strikes = entry.strikes.saturating_add(1);

                    if entry.strikes >= config.invalid_response_strikes && !entry.removed {
                        tracing::info!(peer = %id, "removing server after repeated invalid responses");
                        entry.removed = true;
                        entry.score = 0.0;
                        return true;
                    }
                }
            }

            false
        })
    }

    /// The current score of `id`.
    pub fn score(&self, id: &PeerId) -> Option<f64> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|entry| entry.score)
    }

    pub fn entry(&self, id: &PeerId) -> Option<ServerPoolEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// The score a peer is ranked with, peers we have no record of get [`INITIAL_SCORE`].
    pub fn rank_score(&self, id: &PeerId) -> f64 {
        self.score(id).unwrap_or(INITIAL_SCORE)
    }

    /// Returns `false` if `id` was removed from the pool.
    pub fn is_eligible(&self, id: &PeerId) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .is_none_or(|entry| !entry.removed)
    }

    /// Every server that was not removed, best first.
    pub fn rank(&self) -> Vec<(PeerId, f64)> {
        let mut ranked = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, entry)| !entry.removed)
            .map(|(id, entry)| (*id, entry.score))
            .collect::<Vec<_>>();

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    //------------------------------------------------ Dialing
    /// Adds a server we know the address of without having connected to it.
    pub fn add_known(&self, id: PeerId, addr: SocketAddr) {
        self.with_entry(id, |entry| entry.addr = Some(addr.to_string()));
    }

    /// Records a successful connection to `id`, clearing its dial backoff.
    pub fn connected(&self, id: PeerId, addr: Option<SocketAddr>) {
        self.with_entry(id, |entry| {
            if let Some(addr) = addr {
                entry.addr = Some(addr.to_string());
            }
            entry.backoff = DialBackoff::default();
        });
    }

    /// Records a failed dial, the next dial is delayed exponentially.
    pub fn dial_failed(&self, id: PeerId, now: u64) {
        let base = self.config.dial_backoff_base.as_secs();
        let max = self.config.dial_backoff_max.as_secs();

        self.with_entry(id, |entry| {
            entry.backoff.failures = entry.backoff.failures.saturating_add(1);

            let shift = (entry.backoff.failures - 1).min(32);
            let delay = base.saturating_mul(1_u64 << shift).min(max);
            entry.backoff.next_dial = now.saturating_add(delay);

            tracing::trace!(peer = %id, delay, "dial failed, backing off");
        });
    }

    /// Servers with an address that can be dialed at `now`, best first.
    ///
    /// Servers with equal scores, like fresh bootnodes, come in a random order.
    pub fn dial_candidates(&self, now: u64) -> Vec<(PeerId, SocketAddr)> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let mut candidates = entries
            .iter()
            .filter(|(_, entry)| !entry.removed && entry.backoff.next_dial <= now)
            .filter_map(|(id, entry)| Some((*id, entry.socket_addr()?, entry.score)))
            .collect::<Vec<_>>();
        drop(entries);

        candidates.shuffle(&mut rand::thread_rng());
        candidates.sort_by(|a, b| b.2.total_cmp(&a.2));
        candidates
            .into_iter()
            .map(|(id, addr, _)| (id, addr))
            .collect()
    }
}
