//! A single direct-mapped cache level.

/// One line of a direct-mapped cache: validity, dirtiness, its tag, the
/// words it holds, and an LRU stamp from the owning cache's monotone clock.
#[derive(Debug, Clone)]
pub(crate) struct CacheLine {
    pub valid: bool,
    pub dirty: bool,
    pub tag: u32,
    pub data: Vec<u32>,
    pub lru_stamp: u64,
}

impl CacheLine {
    fn new(line_size: usize) -> Self {
        CacheLine {
            valid: false,
            dirty: false,
            tag: 0,
            data: vec![0; line_size],
            lru_stamp: 0,
        }
    }
}

/// Address decomposition of a byte address into `(index, offset, tag)`.
///
/// See §4.3: `word_idx = a >> 2`, then `offset`/`index`/`tag` derive from
/// `word_idx` alone. Implementations must match this bit for bit; test
/// fixtures compare hit/miss sequences directly.
pub(crate) fn decompose(addr: u32, size: usize, line_size: usize) -> (usize, usize, u32) {
    let word_idx = (addr >> 2) as u64;
    let line_size = line_size as u64;
    let size = size as u64;
    let offset = (word_idx % line_size) as usize;
    let index = ((word_idx / line_size) % size) as usize;
    let tag = (word_idx / (size * line_size)) as u32;
    (index, offset, tag)
}

/// A direct-mapped cache of `size` lines, each `line_size` words wide.
#[derive(Debug, Clone)]
pub struct Cache {
    lines: Vec<CacheLine>,
    size: usize,
    line_size: usize,
    access_time: u32,
    hits: u64,
    misses: u64,
    lru_clock: u64,
}

impl Cache {
    pub fn new(size: usize, line_size: usize, access_time: u32) -> Self {
        Cache {
            lines: (0..size).map(|_| CacheLine::new(line_size)).collect(),
            size,
            line_size,
            access_time,
            hits: 0,
            misses: 0,
            lru_clock: 0,
        }
    }

    pub fn reset(&mut self) {
        for line in &mut self.lines {
            *line = CacheLine::new(self.line_size);
        }
        self.hits = 0;
        self.misses = 0;
        self.lru_clock = 0;
    }

    pub fn access_time(&self) -> u32 {
        self.access_time
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Clears the hit/miss counters without disturbing cached lines. Used
    /// by [`crate::memory::MemorySystem::load_program`]'s L1 pre-warm,
    /// which installs lines directly rather than performing a real access.
    pub(crate) fn reset_counters_only(&mut self) {
        self.hits = 0;
        self.misses = 0;
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    fn tick(&mut self) -> u64 {
        self.lru_clock += 1;
        self.lru_clock
    }

    /// Probes this level for `addr`. On hit, bumps the hit counter and the
    /// line's LRU stamp and returns the stored word. On miss, bumps the miss
    /// counter and returns `None`. Does not allocate.
    pub(crate) fn probe(&mut self, addr: u32) -> Option<u32> {
        let (index, offset, tag) = decompose(addr, self.size, self.line_size);
        let stamp = self.tick();
        let line = &mut self.lines[index];
        if line.valid && line.tag == tag {
            line.lru_stamp = stamp;
            self.hits += 1;
            Some(line.data[offset])
        } else {
            self.misses += 1;
            None
        }
    }

    /// Refills this level at exactly the missed word, zeroing the rest of
    /// the line if the tag changes (a fresh allocation).
    pub(crate) fn refill_word(&mut self, addr: u32, value: u32) {
        let (index, offset, tag) = decompose(addr, self.size, self.line_size);
        let stamp = self.tick();
        let line = &mut self.lines[index];
        if !(line.valid && line.tag == tag) {
            line.data.iter_mut().for_each(|w| *w = 0);
            line.tag = tag;
            line.valid = true;
        }
        line.data[offset] = value;
        line.lru_stamp = stamp;
    }

    /// Write-through, write-allocate: `true` if this level already held the
    /// line (a write hit), `false` if it had to be allocated.
    pub(crate) fn write_through(&mut self, addr: u32, value: u32) -> bool {
        let (index, offset, tag) = decompose(addr, self.size, self.line_size);
        let stamp = self.tick();
        let line = &mut self.lines[index];
        let hit = line.valid && line.tag == tag;
        if !hit {
            line.data.iter_mut().for_each(|w| *w = 0);
            line.tag = tag;
            line.valid = true;
        }
        line.data[offset] = value;
        line.dirty = true;
        line.lru_stamp = stamp;
        hit
    }

    /// Writes back and clears the dirty bit of the line covering `addr`, if
    /// any and dirty. Never invalidates the line. Returns the words to
    /// write back as `(word_index, value)` pairs.
    pub(crate) fn flush_line(&mut self, addr: u32) -> Vec<(u32, u32)> {
        let (index, _offset, tag) = decompose(addr, self.size, self.line_size);
        let line = &mut self.lines[index];
        if !line.valid || line.tag != tag || !line.dirty {
            return Vec::new();
        }
        line.dirty = false;
        let base = (tag as u64) * (self.size as u64) * (self.line_size as u64)
            + (index as u64) * (self.line_size as u64);
        line.data
            .iter()
            .enumerate()
            .map(|(w, &value)| ((base + w as u64) as u32, value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decompose_matches_spec_formula() {
        // size=32, line_size=8: one line covers 8 words = 32 bytes.
        assert_eq!(decompose(0, 32, 8), (0, 0, 0));
        assert_eq!(decompose(4, 32, 8), (0, 1, 0));
        assert_eq!(decompose(28, 32, 8), (0, 7, 0));
        assert_eq!(decompose(32, 32, 8), (1, 0, 0));
        // wraps index after `size` lines, bumps tag after `size * line_size` words.
        assert_eq!(decompose(32 * 8 * 4, 32, 8), (0, 0, 1));
    }

    #[test]
    fn probe_miss_then_hit_after_refill() {
        let mut cache = Cache::new(32, 8, 1);
        assert_eq!(cache.probe(0), None);
        cache.refill_word(0, 0xABCD);
        assert_eq!(cache.probe(0), Some(0xABCD));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn refill_zeroes_rest_of_line_on_new_allocation() {
        let mut cache = Cache::new(32, 8, 1);
        cache.refill_word(4, 7);
        assert_eq!(cache.probe(0), Some(0));
        assert_eq!(cache.probe(4), Some(7));
    }

    #[test]
    fn flush_only_emits_when_dirty() {
        let mut cache = Cache::new(32, 8, 1);
        assert!(cache.flush_line(0).is_empty());
        cache.write_through(0, 42);
        let flushed = cache.flush_line(0);
        assert_eq!(flushed.len(), 8);
        assert_eq!(flushed[0], (0, 42));
        assert!(cache.flush_line(0).is_empty(), "dirty bit cleared by first flush");
    }
}
