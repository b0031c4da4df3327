use helio_raytracing::RayHit;

/// Per-probe cache lifecycle.
///
/// `Clean` slots were never filled. `Dirty` slots hold outdated data. A scheduled rebuild
/// moves a slot to `Rebuilding`, and only a completion carrying the current static
/// generation makes it `Valid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum CacheState {
    #[default]
    Clean,
    Dirty,
    Rebuilding,
    Valid,
}

/// Static-only hits per probe and ray, reused while the static scene is unchanged.
#[derive(Debug, Clone)]
pub struct RayCache {
    rays_per_probe: usize,
    hits: Vec<Option<RayHit>>,
    states: Vec<CacheState>,
    tokens: Vec<u64>,
}

impl RayCache {
    pub fn new(slot_count: usize, rays_per_probe: usize) -> Self {
        Self {
            rays_per_probe,
            hits: vec![None; slot_count * rays_per_probe],
            states: vec![CacheState::Clean; slot_count],
            tokens: vec![0; slot_count],
        }
    }

    pub fn rays_per_probe(&self) -> usize {
        self.rays_per_probe
    }

    pub fn slot_count(&self) -> usize {
        self.states.len()
    }

    pub fn state(&self, slot: u32) -> CacheState {
        self.states[slot as usize]
    }

    pub fn token(&self, slot: u32) -> u64 {
        self.tokens[slot as usize]
    }

    pub fn is_readable(&self, slot: u32, generation: u64) -> bool {
        self.states[slot as usize] == CacheState::Valid && self.tokens[slot as usize] == generation
    }

    /// Cached hits, only when the slot is valid for `generation`.
    pub fn read(&self, slot: u32, generation: u64) -> Option<&[Option<RayHit>]> {
        if !self.is_readable(slot, generation) {
            return None;
        }
        let start = slot as usize * self.rays_per_probe;
        Some(&self.hits[start..start + self.rays_per_probe])
    }

    pub fn invalidate(&mut self, slot: u32) {
        self.states[slot as usize] = CacheState::Dirty;
    }

    pub fn invalidate_all(&mut self) {
        self.states.fill(CacheState::Dirty);
    }

    pub fn begin_rebuild(&mut self, slot: u32, generation: u64) {
        self.states[slot as usize] = CacheState::Rebuilding;
        self.tokens[slot as usize] = generation;
    }

    /// Store freshly traced static hits. A completion whose generation no longer matches
    /// the one the rebuild started with is rejected and the slot goes back to `Dirty`.
    pub fn complete_rebuild(&mut self, slot: u32, hits: &[Option<RayHit>], generation: u64) -> bool {
        let index = slot as usize;
        if self.states[index] != CacheState::Rebuilding
            || self.tokens[index] != generation
            || hits.len() != self.rays_per_probe
        {
            self.states[index] = CacheState::Dirty;
            return false;
        }
        let start = index * self.rays_per_probe;
        self.hits[start..start + self.rays_per_probe].copy_from_slice(hits);
        self.states[index] = CacheState::Valid;
        true
    }

    /// Mark every valid slot with a foreign token dirty. Returns the slots that changed.
    pub fn expire_older_than(&mut self, generation: u64) -> Vec<u32> {
        let mut expired = Vec::new();
        for (slot, (state, token)) in self.states.iter_mut().zip(&self.tokens).enumerate() {
            if *state == CacheState::Valid && *token != generation {
                *state = CacheState::Dirty;
                expired.push(slot as u32);
            }
        }
        expired
    }

    /// Carry valid slots from `from` to `to`. Used when every static change in between
    /// is known and the slot was outside all of them.
    pub fn retag(&mut self, from: u64, to: u64) {
        for (state, token) in self.states.iter().zip(self.tokens.iter_mut()) {
            if *state == CacheState::Valid && *token == from {
                *token = to;
            }
        }
    }

    /// Ray count changed; all cached hits are meaningless.
    pub fn resize_rays(&mut self, rays_per_probe: usize) {
        *self = Self::new(self.slot_count(), rays_per_probe);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn hit(d: f32) -> Option<RayHit> {
        Some(RayHit {
            distance: d,
            normal: Vec3::Y,
            albedo: Vec3::ONE,
            reflectivity: 0.0,
            emissive: Vec3::ZERO,
        })
    }

    #[test]
    fn test_lifecycle_to_valid() {
        let mut cache = RayCache::new(4, 2);
        assert_eq!(cache.state(1), CacheState::Clean);
        assert!(cache.read(1, 0).is_none());

        cache.begin_rebuild(1, 5);
        assert_eq!(cache.state(1), CacheState::Rebuilding);
        assert!(cache.read(1, 5).is_none());

        assert!(cache.complete_rebuild(1, &[hit(1.0), None], 5));
        assert_eq!(cache.state(1), CacheState::Valid);
        assert_eq!(cache.read(1, 5).map(|h| h.len()), Some(2));
        assert!(cache.read(1, 6).is_none());
    }

    #[test]
    fn test_stale_completion_is_rejected() {
        let mut cache = RayCache::new(2, 1);
        cache.begin_rebuild(0, 3);
        assert!(!cache.complete_rebuild(0, &[hit(2.0)], 4));
        assert_eq!(cache.state(0), CacheState::Dirty);
    }

    #[test]
    fn test_expire_and_retag() {
        let mut cache = RayCache::new(3, 1);
        for slot in 0..3 {
            cache.begin_rebuild(slot, 1);
            cache.complete_rebuild(slot, &[hit(1.0)], 1);
        }
        cache.invalidate(2);
        cache.retag(1, 2);
        assert!(cache.is_readable(0, 2));
        assert_eq!(cache.expire_older_than(3), vec![0, 1]);
        assert_eq!(cache.state(0), CacheState::Dirty);
    }

    #[test]
    fn test_resize_drops_everything() {
        let mut cache = RayCache::new(2, 1);
        cache.begin_rebuild(0, 1);
        cache.complete_rebuild(0, &[hit(1.0)], 1);
        cache.resize_rays(4);
        assert_eq!(cache.rays_per_probe(), 4);
        assert_eq!(cache.state(0), CacheState::Clean);
    }
}
