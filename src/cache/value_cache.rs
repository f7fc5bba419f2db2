use std::collections::HashSet;
use std::hash::Hash;

/// Probes between hit-ratio checks
pub const CHECK_INTERVAL: u64 = 256;
/// Below this hit ratio at a checkpoint the cache turns itself off
pub const MIN_HIT_RATIO: f64 = 0.7;

/// Interning cache for repeated column values.
///
/// Once disabled it stays disabled and holds nothing; `intern` becomes a
/// pass-through.
#[derive(Debug)]
pub struct ValueCache<T> {
    values: HashSet<T>,
    probes: u64,
    hits: u64,
    enabled: bool,
}

impl<T: Eq + Hash + Clone> ValueCache<T> {
    pub fn new() -> Self {
        ValueCache {
            values: HashSet::new(),
            probes: 0,
            hits: 0,
            enabled: true,
        }
    }

    /// Return the cached instance equal to `value`, caching `value` on a miss.
    pub fn intern(&mut self, value: T) -> T {
        if !self.enabled {
            return value;
        }

        self.probes += 1;
        let interned = match self.values.get(&value) {
            Some(existing) => {
                self.hits += 1;
                existing.clone()
            }
            None => {
                self.values.insert(value.clone());
                value
            }
        };

        if self.probes % CHECK_INTERVAL == 0 && self.hit_ratio() < MIN_HIT_RATIO {
            self.enabled = false;
            self.values = HashSet::new();
        }
        interned
    }

    pub fn hit_ratio(&self) -> f64 {
        if self.probes == 0 {
            0.0
        } else {
            self.hits as f64 / self.probes as f64
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn probes(&self) -> u64 {
        self.probes
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<T: Eq + Hash + Clone> Default for ValueCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
