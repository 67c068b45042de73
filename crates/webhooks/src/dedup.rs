//! Duplicate suppression for the ingress path.
//!
//! Two layers: a bounded Bloom filter over fingerprints (cheap, no false
//! negatives) and an exact TTL cache over `(tenant_id, delivery_id)` that
//! resolves the Bloom filter's false positives. The window is per provider.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use sha2::{Digest, Sha256};

use relay_common::TenantId;

const BLOOM_HASHES: u32 = 4;

/// Fixed-size Bloom filter over event fingerprints.
///
/// Rotated wholesale once the insert count would push the false-positive
/// rate up; rotation can only cause a missed dedup (re-enqueue), never a
/// dropped event.
struct BloomFilter {
    bits: Vec<u64>,
    bit_count: usize,
    inserts: usize,
    max_inserts: usize,
}

impl BloomFilter {
    fn new(bit_count: usize, max_inserts: usize) -> Self {
        Self {
            bits: vec![0; bit_count.div_ceil(64)],
            bit_count,
            inserts: 0,
            max_inserts,
        }
    }

    fn indices(&self, key: &str) -> [usize; BLOOM_HASHES as usize] {
        let mut out = [0usize; BLOOM_HASHES as usize];
        for (i, slot) in out.iter_mut().enumerate() {
            let mut hasher = Sha256::new();
            hasher.update([i as u8]);
            hasher.update(key.as_bytes());
            let digest = hasher.finalize();
            let n = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]);
            *slot = (n as usize) % self.bit_count;
        }
        out
    }

    fn contains(&self, key: &str) -> bool {
        self.indices(key)
            .iter()
            .all(|&i| self.bits[i / 64] & (1 << (i % 64)) != 0)
    }

    fn insert(&mut self, key: &str) {
        if self.inserts >= self.max_inserts {
            self.bits.fill(0);
            self.inserts = 0;
        }
        for &i in &self.indices(key) {
            self.bits[i / 64] |= 1 << (i % 64);
        }
        self.inserts += 1;
    }
}

struct ExactEntry {
    inserted_at: Instant,
}

/// The combined dedup filter.
pub struct DedupFilter {
    default_window: Duration,
    /// Per-provider window overrides.
    overrides: HashMap<String, Duration>,
    inner: Mutex<Inner>,
}

struct Inner {
    bloom: BloomFilter,
    /// Exact entries keyed `(tenant, delivery_id)`, evicted by TTL and by a
    /// hard cap.
    exact: HashMap<(TenantId, String), ExactEntry>,
    max_exact: usize,
}

impl DedupFilter {
    #[must_use]
    pub fn new(default_window: Duration, overrides: HashMap<String, Duration>) -> Self {
        Self {
            default_window,
            overrides,
            inner: Mutex::new(Inner {
                bloom: BloomFilter::new(1 << 20, 100_000),
                exact: HashMap::new(),
                max_exact: 100_000,
            }),
        }
    }

    fn window_for(&self, provider: &str) -> Duration {
        self.overrides
            .get(provider)
            .copied()
            .unwrap_or(self.default_window)
    }

    /// Returns true when the event is a duplicate within the window.
    /// A non-duplicate is recorded as seen.
    pub fn check_and_insert(
        &self,
        tenant: TenantId,
        provider: &str,
        delivery_id: &str,
        fingerprint: &str,
    ) -> bool {
        self.check_and_insert_at(tenant, provider, delivery_id, fingerprint, Instant::now())
    }

    pub fn check_and_insert_at(
        &self,
        tenant: TenantId,
        provider: &str,
        delivery_id: &str,
        fingerprint: &str,
        now: Instant,
    ) -> bool {
        let window = self.window_for(provider);
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        // Evict expired exact entries opportunistically.
        inner
            .exact
            .retain(|_, entry| now.duration_since(entry.inserted_at) < window);

        let exact_key = (tenant, delivery_id.to_string());
        let bloom_hit = inner.bloom.contains(fingerprint);
        let exact_hit = inner.exact.contains_key(&exact_key);

        // The Bloom filter alone can false-positive; only the exact cache
        // may declare a duplicate.
        if bloom_hit && exact_hit {
            return true;
        }

        inner.bloom.insert(fingerprint);
        if inner.exact.len() < inner.max_exact {
            inner
                .exact
                .insert(exact_key, ExactEntry { inserted_at: now });
        }
        false
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> DedupFilter {
        DedupFilter::new(Duration::from_secs(300), HashMap::new())
    }

    #[test]
    fn second_identical_delivery_is_a_duplicate() {
        let filter = filter();
        let tenant = TenantId::new();
        assert!(!filter.check_and_insert(tenant, "github", "d1", "fp1"));
        assert!(filter.check_and_insert(tenant, "github", "d1", "fp1"));
    }

    #[test]
    fn distinct_deliveries_pass() {
        let filter = filter();
        let tenant = TenantId::new();
        assert!(!filter.check_and_insert(tenant, "github", "d1", "fp1"));
        assert!(!filter.check_and_insert(tenant, "github", "d2", "fp2"));
    }

    #[test]
    fn duplicates_expire_after_the_window() {
        let filter = filter();
        let tenant = TenantId::new();
        let start = Instant::now();
        assert!(!filter.check_and_insert_at(tenant, "github", "d1", "fp1", start));
        let later = start + Duration::from_secs(301);
        assert!(!filter.check_and_insert_at(tenant, "github", "d1", "fp1", later));
    }

    #[test]
    fn same_delivery_id_across_tenants_is_not_a_duplicate() {
        let filter = filter();
        assert!(!filter.check_and_insert(TenantId::new(), "github", "d1", "fp-a"));
        assert!(!filter.check_and_insert(TenantId::new(), "github", "d1", "fp-b"));
    }

    #[test]
    fn provider_override_shortens_the_window() {
        let mut overrides = HashMap::new();
        overrides.insert("gitlab".to_string(), Duration::from_secs(10));
        let filter = DedupFilter::new(Duration::from_secs(300), overrides);
        let tenant = TenantId::new();
        let start = Instant::now();

        assert!(!filter.check_and_insert_at(tenant, "gitlab", "d1", "fp1", start));
        let later = start + Duration::from_secs(11);
        assert!(!filter.check_and_insert_at(tenant, "gitlab", "d1", "fp1", later));
    }

    #[test]
    fn bloom_filter_has_no_false_negatives() {
        let mut bloom = BloomFilter::new(1 << 16, 10_000);
        for i in 0..500 {
            bloom.insert(&format!("fp-{i}"));
        }
        for i in 0..500 {
            assert!(bloom.contains(&format!("fp-{i}")));
        }
    }
}
