// nanomap/src/khash.rs
//
// Robinhood open-addressing hash table with 64-bit keys and values, shared by
// the minimizer index (second-stage bucket tables) and the per-query alignment
// dedup hash. Empty and moved slots are encoded in the key itself so a slot is
// exactly 16 bytes and the table serializes as a flat array.

use std::io::{self, Read, Write};

#[path = "khash_test.rs"]
mod khash_test;

/// Initial table size; `clear` shrinks back to this.
const KH_SIZE: usize = 256;
/// Maximum occupancy before doubling.
const KH_THRESH: f64 = 0.4;

/// Key of a never-used slot. Lookup stops here.
const KEY_EMPTY: u64 = u64::MAX;
/// Key of a slot vacated during growth. Lookup probes past it.
const KEY_MOVED: u64 = u64::MAX - 1;

/// Value stored in freshly allocated slots (`put_ptr` leaves it for the caller).
pub const KH_INIT_VAL: u64 = u64::MAX;

#[derive(Debug, Clone, Copy)]
struct Slot {
    key: u64,
    val: u64,
}

impl Slot {
    #[inline]
    fn vacant(&self) -> bool {
        self.key >= KEY_MOVED
    }
}

const VACANT: Slot = Slot {
    key: KEY_EMPTY,
    val: KH_INIT_VAL,
};

/// Robinhood hash table. A default-constructed table owns no storage and
/// behaves as empty; the first `put` allocates it.
#[derive(Debug, Clone, Default)]
pub struct KHash {
    mask: u64,
    cnt: u32,
    ub: u32,
    a: Vec<Slot>,
}

impl KHash {
    pub fn with_capacity(size: usize) -> Self {
        let size = size.max(KH_SIZE).next_power_of_two();
        KHash {
            mask: (size - 1) as u64,
            cnt: 0,
            ub: (size as f64 * KH_THRESH) as u32,
            a: vec![VACANT; size],
        }
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.cnt
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cnt == 0
    }

    #[inline]
    pub fn table_size(&self) -> usize {
        self.a.len()
    }

    /// Reset to the initial table size without releasing more than the tail of
    /// the allocation; keys are discarded.
    pub fn clear(&mut self) {
        if self.a.is_empty() {
            return;
        }
        self.a.truncate(KH_SIZE);
        self.a.fill(VACANT);
        self.mask = (KH_SIZE - 1) as u64;
        self.cnt = 0;
        self.ub = (KH_SIZE as f64 * KH_THRESH) as u32;
    }

    /// Probe distance of the key stored at `idx` from its natural home.
    #[inline]
    fn probe_dist(&self, key: u64, idx: usize) -> u64 {
        (idx as u64).wrapping_sub(key & self.mask) & self.mask
    }

    /// Core insertion poll. Displaces slots whose distance from home is less
    /// than the probe's current displacement. Returns the index the original
    /// key landed at and whether a new slot was consumed.
    fn allocate(&mut self, key: u64, val: u64) -> (usize, bool) {
        let mask = self.mask;
        let mut i = (key & mask) as usize;
        let mut dist = 0u64;
        let mut cur = Slot { key, val };
        let mut landed: Option<usize> = None;

        loop {
            let s = self.a[i];
            if s.vacant() {
                self.a[i] = cur;
                return (landed.unwrap_or(i), true);
            }
            if landed.is_none() && s.key == cur.key {
                // Duplicate of the probed key; existing slot wins.
                return (i, false);
            }
            let sdist = self.probe_dist(s.key, i);
            if sdist < dist {
                self.a[i] = cur;
                cur = s;
                if landed.is_none() {
                    landed = Some(i);
                }
                dist = sdist;
            }
            i = (i + 1) & mask as usize;
            dist += 1;
        }
    }

    /// Double the table. Entries already at their natural home stay; the rest
    /// are marked moved and re-inserted.
    fn extend(&mut self) {
        let prev_size = self.a.len();
        let size = prev_size * 2;
        self.mask = (size - 1) as u64;
        self.ub = (size as f64 * KH_THRESH) as u32;
        self.a.resize(size, VACANT);

        for i in 0..size {
            let s = self.a[i];
            if s.vacant() || (s.key & self.mask) as usize == i {
                continue;
            }
            self.a[i] = Slot {
                key: KEY_MOVED,
                val: KH_INIT_VAL,
            };
            self.allocate(s.key, s.val);
        }
    }

    pub fn put(&mut self, key: u64, val: u64) {
        debug_assert!(key < KEY_MOVED);
        if self.a.is_empty() {
            *self = KHash::with_capacity(KH_SIZE);
        }
        if self.cnt >= self.ub {
            self.extend();
        }
        let (idx, new) = self.allocate(key, val);
        self.cnt += new as u32;
        self.a[idx] = Slot { key, val };
    }

    /// Insert the key if absent and return a mutable reference to its value
    /// cell. Fresh cells hold `KH_INIT_VAL`; the caller reads the previous
    /// value and writes the new one. With `extend == false` the table is never
    /// grown (the caller guarantees a following `put_ptr` with `extend` on the
    /// same generation, keeping returned references stable across the pair).
    pub fn put_ptr(&mut self, key: u64, extend: bool) -> &mut u64 {
        debug_assert!(key < KEY_MOVED);
        if self.a.is_empty() {
            *self = KHash::with_capacity(KH_SIZE);
        }
        if extend && self.cnt >= self.ub {
            self.extend();
        }
        let (idx, new) = self.allocate(key, KH_INIT_VAL);
        self.cnt += new as u32;
        &mut self.a[idx].val
    }

    pub fn get(&self, key: u64) -> Option<u64> {
        if self.a.is_empty() {
            return None;
        }
        let mask = self.mask;
        let mut i = (key & mask) as usize;
        loop {
            let s = self.a[i];
            if s.key == key {
                return Some(s.val);
            }
            if s.key == KEY_EMPTY {
                return None;
            }
            i = (i + 1) & mask as usize;
        }
    }

    /// Exact byte size of `dump`'s output.
    pub fn dump_bytes(&self) -> usize {
        8 + 16 * self.a.len()
    }

    /// Serialize as (size, cnt) header plus the raw slot array. A table that
    /// never allocated writes a zero-sized header.
    pub fn dump<W: Write>(&self, w: &mut W) -> io::Result<()> {
        if self.a.is_empty() {
            w.write_all(&0u32.to_le_bytes())?;
            w.write_all(&0u32.to_le_bytes())?;
            return Ok(());
        }
        w.write_all(&(self.a.len() as u32).to_le_bytes())?;
        w.write_all(&self.cnt.to_le_bytes())?;
        for s in &self.a {
            w.write_all(&s.key.to_le_bytes())?;
            w.write_all(&s.val.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn load<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf4 = [0u8; 4];
        let mut buf8 = [0u8; 8];
        r.read_exact(&mut buf4)?;
        let size = u32::from_le_bytes(buf4) as usize;
        r.read_exact(&mut buf4)?;
        let cnt = u32::from_le_bytes(buf4);
        if size == 0 {
            return Ok(KHash::default());
        }
        if !size.is_power_of_two() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "hash table size is not a power of two",
            ));
        }
        let mut a = Vec::with_capacity(size);
        for _ in 0..size {
            r.read_exact(&mut buf8)?;
            let key = u64::from_le_bytes(buf8);
            r.read_exact(&mut buf8)?;
            let val = u64::from_le_bytes(buf8);
            a.push(Slot { key, val });
        }
        Ok(KHash {
            mask: (size - 1) as u64,
            cnt,
            ub: (size as f64 * KH_THRESH) as u32,
            a,
        })
    }
}
