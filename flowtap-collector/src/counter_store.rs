//! Last-seen cumulative counter per key, used to turn the kernel's
//! monotonic counters into per-cycle deltas.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use flowtap_schema::CounterDelta;

/// A counter observed going backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterAnomaly {
    pub key: Ipv4Addr,
    pub previous: u64,
    pub current: u64,
}

impl fmt::Display for CounterAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "counter for {} went backwards: {} -> {} (producer reset?)",
            self.key, self.previous, self.current
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: u64,
    last_seen: u64,
}

/// Per-key last-seen cumulative values.
///
/// Entries persist for the process lifetime unless `idle_cycles` is
/// non-zero, in which case `end_cycle` evicts keys that have not been
/// observed for that many consecutive cycles.
#[derive(Debug, Default)]
pub struct CounterStore {
    entries: HashMap<Ipv4Addr, Entry>,
    cycle: u64,
    idle_cycles: u64,
}

impl CounterStore {
    /// Store that never evicts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that evicts keys idle for `idle_cycles` cycles (0 = never).
    pub fn with_idle_eviction(idle_cycles: u64) -> Self {
        Self {
            idle_cycles,
            ..Self::default()
        }
    }

    /// Record `cumulative` for `key` and return the change since the last
    /// observation. A never-seen key starts from 0.
    pub fn observe(&mut self, key: Ipv4Addr, cumulative: u64) -> CounterDelta {
        let cycle = self.cycle;
        let entry = self.entries.entry(key).or_insert(Entry {
            value: 0,
            last_seen: cycle,
        });

        let previous = entry.value;
        entry.value = cumulative;
        entry.last_seen = cycle;

        if cumulative >= previous {
            CounterDelta::Advanced(cumulative - previous)
        } else {
            CounterDelta::Reset {
                previous,
                current: cumulative,
            }
        }
    }

    /// Forget every key. Only valid when the producer's table was
    /// reinitialized too.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Close the current cycle, evicting idle keys. Returns how many keys
    /// were evicted.
    pub fn end_cycle(&mut self) -> usize {
        let evicted = if self.idle_cycles == 0 {
            0
        } else {
            let before = self.entries.len();
            let cycle = self.cycle;
            let idle = self.idle_cycles;
            self.entries
                .retain(|_, entry| cycle - entry.last_seen < idle);
            before - self.entries.len()
        };
        self.cycle += 1;
        evicted
    }

    /// Last-seen cumulative value for `key`.
    pub fn get(&self, key: &Ipv4Addr) -> Option<u64> {
        self.entries.get(key).map(|e| e.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys and cumulative values, sorted by key.
    pub fn iter(&self) -> impl Iterator<Item = (Ipv4Addr, u64)> + '_ {
        let mut keys: Vec<&Ipv4Addr> = self.entries.keys().collect();
        keys.sort();
        keys.into_iter().map(move |k| (*k, self.entries[k].value))
    }
}
