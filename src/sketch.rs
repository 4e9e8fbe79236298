// nanomap/src/sketch.rs
//
// Streaming (w,k)-minimizer sketcher. Two rolling k-mers (forward and
// reverse-complement) are maintained per base; the canonical k-mer is the
// smaller of the two and its strand bit records which one won. Window minima
// are tracked with a monotone deque and an emission is produced whenever the
// minimum of the length-w window changes, ties breaking to the first
// occurrence.
//
// Each emitted minimizer packs into a u64 as `hash << 8 | window_pos << 1 |
// strand`. The window position is relative to a frame the decoder advances by
// w whenever the position field does not increase, so absolute positions are
// reconstructed by accumulating window bases (see `MinimizerIter`). The
// sketcher is restartable: feeding more bases continues the same coordinate
// space, which is how circular references close the windows spanning their
// origin.

use std::collections::VecDeque;

#[path = "sketch_test.rs"]
mod sketch_test;

/// Upper bound on the window size; the frame field of the output encoding is
/// 6 bits wide and emissions may lag a frame behind.
pub const MAX_WINDOW: u32 = 32;
/// Upper bound on k so that `hash << 8` keeps the full 2k-bit hash.
pub const MAX_KMER: u32 = 28;

/// One decoded minimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Minimizer {
    pub hash: u64,
    /// k-mer start position. May run past the sequence end for the re-fed
    /// tail of a circular reference.
    pub pos: u32,
    /// 1 when the reverse-complement representation won.
    pub strand: u32,
}

#[derive(Debug, Clone, Copy)]
struct Cand {
    hash: u64,
    strand: u32,
    idx: i64, // absolute k-mer index
}

/// Streaming sketcher state. `feed` may be called repeatedly; every call
/// continues the k-mer and window state of the previous one.
pub struct Sketcher {
    w: i64,
    k: u32,
    mask: u64,
    shift1: u32,
    fw: u64,
    rv: u64,
    n_fed: i64, // bases consumed so far
    deque: VecDeque<Cand>,
    last: Option<(u64, i64)>, // (hash, idx) of the last emission
    // Decoder mirror so the emitted window positions reconstruct to absolute
    // positions under the accumulation rule of MinimizerIter.
    frame_base: i64,
    frame_v: i64,
}

impl Sketcher {
    pub fn new(w: u32, k: u32) -> Self {
        assert!(w >= 1 && w <= MAX_WINDOW, "window size out of range");
        assert!(k >= 2 && k <= MAX_KMER, "k-mer size out of range");
        Sketcher {
            w: w as i64,
            k,
            mask: (1u64 << (2 * k)) - 1,
            shift1: 2 * (k - 1),
            fw: 0,
            rv: 0,
            n_fed: 0,
            deque: VecDeque::with_capacity(w as usize + 1),
            last: None,
            frame_base: -(w as i64),
            frame_v: w as i64,
        }
    }

    /// Hash of a canonical k-mer, masked to 2k bits. The crc32 mix decouples
    /// the bucket selection bits from the raw k-mer bits.
    #[inline]
    fn hash(&self, km: u64) -> u64 {
        (crc32fast::hash(&km.to_le_bytes()) as u64 ^ km) & self.mask
    }

    /// Feed bases (codes 0-3; anything larger is squashed to 0) and append
    /// the minimizers of every window completed by them to `out`.
    pub fn feed(&mut self, seq: &[u8], out: &mut Vec<u64>) {
        let k = self.k as i64;
        for &b in seq {
            let c = (b & 0x03) as u64;
            self.fw = ((self.fw << 2) | c) & self.mask;
            self.rv = (self.rv >> 2) | ((3 ^ c) << self.shift1);
            self.n_fed += 1;
            if self.n_fed < k {
                continue;
            }
            let idx = self.n_fed - k; // k-mer start
            let (km, strand) = if self.fw < self.rv {
                (self.fw, 0)
            } else {
                (self.rv, 1)
            };
            let cand = Cand {
                hash: self.hash(km),
                strand,
                idx,
            };

            // Monotone deque: strict '>' keeps the first occurrence ahead of
            // equal-hash candidates.
            while self
                .deque
                .back()
                .is_some_and(|b| b.hash > cand.hash)
            {
                self.deque.pop_back();
            }
            self.deque.push_back(cand);
            while self.deque.front().is_some_and(|f| f.idx + self.w <= idx) {
                self.deque.pop_front();
            }

            if idx + 1 < self.w {
                continue; // first window not complete yet
            }
            let min = *self.deque.front().expect("window holds the current k-mer");
            if self.last == Some((min.hash, min.idx)) {
                continue;
            }
            self.last = Some((min.hash, min.idx));
            out.push(self.encode(min));
        }
    }

    /// Pack a minimizer. The decoder advances its frame by w exactly when the
    /// position field fails to increase, so the encoder mirrors that state
    /// and drops into the next frame when the 6-bit field would overflow (or
    /// on the very first emission). Consecutive minimizers are at most w
    /// apart, so a single frame step always suffices.
    fn encode(&mut self, min: Cand) -> u64 {
        let mut u = min.idx - self.frame_base;
        if u >= 64 || u <= self.frame_v {
            u -= self.w;
            self.frame_base += self.w;
            debug_assert!(u <= self.frame_v);
        }
        debug_assert!((0..64).contains(&u));
        self.frame_v = u;
        (min.hash << 8) | ((u as u64) << 1) | min.strand as u64
    }
}

/// Decode a packed minimizer stream back to absolute positions: the frame
/// base advances by w whenever the position field fails to increase.
pub struct MinimizerIter<'a> {
    mins: std::slice::Iter<'a, u64>,
    w: i64,
    base: i64,
    v: i64,
}

impl<'a> MinimizerIter<'a> {
    pub fn new(mins: &'a [u64], w: u32) -> Self {
        MinimizerIter {
            mins: mins.iter(),
            w: w as i64,
            base: -(w as i64),
            v: w as i64,
        }
    }
}

impl<'a> Iterator for MinimizerIter<'a> {
    type Item = Minimizer;

    fn next(&mut self) -> Option<Minimizer> {
        let x = *self.mins.next()?;
        let u = ((x >> 1) & 0x3f) as i64;
        if u <= self.v {
            self.base += self.w;
        }
        self.v = u;
        Some(Minimizer {
            hash: x >> 8,
            pos: (self.base + u) as u32,
            strand: (x & 1) as u32,
        })
    }
}

/// Sketch a whole sequence in one call.
pub fn sketch_all(seq: &[u8], w: u32, k: u32) -> Vec<u64> {
    let mut sk = Sketcher::new(w, k);
    let mut out = Vec::with_capacity(2 * seq.len() / w as usize + 16);
    sk.feed(seq, &mut out);
    out
}
