// nanomap/src/chain.rs
//
// Seed collection and chaining. Anchors live in the rotated (u,v) lattice
// `u = 2r - q + OFS`, `v = 2q - r + OFS`: collinear anchors on one
// anti-diagonal become axis-aligned neighbors, so sorting by (rid, v, u) and
// sweeping a fixed parallelogram window groups collinear seeds into chains
// in a single pass. Reverse-strand matches fold the query position through
// bitwise complement so one lattice covers both orientations and the strand
// is recovered from the sign of the projected query coordinate.

use crate::index::{Hits, MiniIndex, RefSeq, val_pos, val_rid_s};
use crate::sketch::{MinimizerIter, Sketcher};
use crate::utils::reserve_or_abort;

#[path = "chain_test.rs"]
mod chain_test;

/// Offset keeping (u,v) coordinates non-negative.
pub const OFS: i64 = 0x4000_0000;
pub const UNCHAINED: u32 = u32::MAX;
/// High plen bit marking a chain absorbed by a circular link.
pub const CHAIN_ABSORBED: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seed {
    pub rid: u32,
    pub v: u32,
    pub u: u32,
    /// Owning leaf while chaining, or UNCHAINED.
    pub lid: u32,
}

impl Seed {
    pub fn new(r: i64, q: i64, rid: u32) -> Seed {
        let u = 2 * r - q + OFS;
        let v = 2 * q - r + OFS;
        debug_assert!(u >= 0 && u <= u32::MAX as i64);
        debug_assert!(v >= 0 && v <= u32::MAX as i64);
        Seed {
            rid,
            v: v as u32,
            u: u as u32,
            lid: UNCHAINED,
        }
    }

    /// Projected reference coordinate.
    #[inline]
    pub fn apos(&self) -> i64 {
        let ud = self.u as i64 - OFS;
        let vd = self.v as i64 - OFS;
        (2 * ud + vd) / 3
    }

    /// Projected query coordinate; negative for reverse-strand anchors.
    #[inline]
    pub fn bpos(&self) -> i64 {
        let ud = self.u as i64 - OFS;
        let vd = self.v as i64 - OFS;
        (2 * vd + ud) / 3
    }

    /// u + v projection (offsets cancel in differences).
    #[inline]
    pub fn p(&self) -> i64 {
        self.u as i64 + self.v as i64
    }
}

/// Chain head record: opened when chaining starts at a root seed, closed
/// when extension stops. `tail_sid` may be propagated through merges and
/// circular links.
#[derive(Debug, Clone, Copy)]
pub struct Leaf {
    pub root_sid: u32,
    pub tail_sid: u32,
    pub rid: u32,
    pub cid: u32,
}

/// Chain record; keeps the leaf of its longest root-to-tail path.
#[derive(Debug, Clone, Copy)]
pub struct ChainRec {
    pub plen: u32,
    pub lid: u32,
}

/// Deferred seed whose occurrence count exceeded the current tier.
#[derive(Debug, Clone, Copy)]
pub struct RescEntry {
    pub n: u32,
    pub qs_enc: i32,
    pub hash: u64,
}

/// Per-thread seed/chain buffers, reset (not freed) between queries.
#[derive(Default)]
pub struct ChainBuf {
    pub seeds: Vec<Seed>,
    pub n_seed: usize,
    pub resc: Vec<RescEntry>,
    pub presc: usize,
    pub leaves: Vec<Leaf>,
    pub chains: Vec<ChainRec>,
    mins: Vec<u64>,
}

impl ChainBuf {
    pub fn clear(&mut self) {
        self.seeds.clear();
        self.n_seed = 0;
        self.resc.clear();
        self.presc = 0;
        self.leaves.clear();
        self.chains.clear();
        self.mins.clear();
    }
}

#[inline]
pub(crate) fn in_window(cu: i64, cv: i64, u: i64, v: i64, wedge: i64) -> bool {
    u > cu && u <= cu + wedge && v > cv && v <= cv + wedge
}

/// Expand one minimizer's index hits into seeds. In all-versus-all mode the
/// lower triangle (ref id below query id) is skipped.
fn expand(seeds: &mut Vec<Seed>, hits: &Hits, qs_enc: i32, k: u32, qid: u32, ava: bool) {
    reserve_or_abort(seeds, hits.len(), "expand");
    for val in hits.iter() {
        let rid_s = val_rid_s(val);
        let rid = rid_s >> 1;
        if ava && rid < qid {
            continue;
        }
        let rs = val_pos(val) as i64;
        let (r, q) = if rid_s & 1 == 1 {
            (rs + k as i64, !qs_enc as i64)
        } else {
            (rs, qs_enc as i64)
        };
        seeds.push(Seed::new(r, q, rid));
    }
}

impl ChainBuf {
    /// Collect seeds for occurrence tier `tier`. Tier 0 sketches the query
    /// and splits hits into immediate seeds and the rescue array; later
    /// tiers replay rescue entries whose count fits the widened threshold.
    /// Returns the number of seeds available for chaining.
    pub fn seed_round(
        &mut self,
        idx: &MiniIndex,
        query: &[u8],
        qid: u32,
        ava: bool,
        tier: usize,
    ) -> usize {
        let k = idx.k;
        if tier == 0 {
            self.seeds.clear();
            self.resc.clear();
            self.presc = 0;
            self.mins.clear();
            let mut sk = Sketcher::new(idx.w, k);
            sk.feed(query, &mut self.mins);

            let max_occ = idx.max_occ();
            let resc_occ = idx.occ[0];
            for m in MinimizerIter::new(&self.mins, idx.w) {
                let hits = idx.get(m.hash);
                let n = hits.len() as u32;
                if n == 0 || n > max_occ {
                    continue;
                }
                let qs_enc = if m.strand == 1 {
                    !(m.pos as i32 + k as i32)
                } else {
                    m.pos as i32
                };
                if n > resc_occ {
                    self.resc.push(RescEntry {
                        n,
                        qs_enc,
                        hash: m.hash,
                    });
                    continue;
                }
                expand(&mut self.seeds, &hits, qs_enc, k, qid, ava);
            }
        } else {
            if tier == 1 {
                self.resc.sort_unstable_by_key(|r| r.n);
            }
            // Strip the previous sentinel and chain marks, keep the seeds.
            self.seeds.truncate(self.n_seed);
            for s in &mut self.seeds {
                s.lid = UNCHAINED;
            }
            let thresh = idx.occ[tier];
            while self.presc < self.resc.len() && self.resc[self.presc].n <= thresh {
                let e = self.resc[self.presc];
                let hits = idx.get(e.hash);
                expand(&mut self.seeds, &hits, e.qs_enc, k, qid, ava);
                self.presc += 1;
            }
        }

        self.n_seed = self.seeds.len();
        if self.n_seed == 0 {
            return 0;
        }

        // Tail sentinel terminates every forward scan.
        self.seeds.push(Seed {
            rid: u32::MAX,
            v: u32::MAX,
            u: u32::MAX,
            lid: UNCHAINED,
        });
        self.seeds.sort_unstable_by_key(|s| (s.rid, s.v, s.u));
        self.n_seed
    }

    /// Group collinear seeds into chains. `wedge` is the (u,v)-space window
    /// edge (twice the linear window). Returns the number of chains.
    pub fn chain(&mut self, wedge: i64) -> usize {
        self.leaves.clear();
        self.chains.clear();
        let n = self.n_seed;
        let seeds = &mut self.seeds;
        let leaves = &mut self.leaves;
        let chains = &mut self.chains;

        let mut next_unchained = 0usize;
        while next_unchained < n {
            if seeds[next_unchained].lid != UNCHAINED {
                next_unchained += 1;
                continue;
            }
            let root = next_unchained;
            let lid = leaves.len() as u32;
            leaves.push(Leaf {
                root_sid: root as u32,
                tail_sid: root as u32,
                rid: seeds[root].rid,
                cid: UNCHAINED,
            });
            seeds[root].lid = lid;

            let p0 = seeds[root].p();
            let mut scnt = 1u32;
            let mut cursor = root;
            let mut first_skipped = usize::MAX;
            let mut merged_lid = UNCHAINED;

            loop {
                let cu = seeds[cursor].u as i64;
                let cv = seeds[cursor].v as i64;
                let crid = seeds[cursor].rid;
                let mut best: Option<(i64, usize)> = None;

                let mut sid = cursor + 1;
                loop {
                    let s = seeds[sid];
                    if s.rid != crid || s.v as i64 > cv + wedge {
                        break; // sort-direction bound (or sentinel)
                    }
                    if !in_window(cu, cv, s.u as i64, s.v as i64, wedge) {
                        first_skipped = first_skipped.min(sid);
                        sid += 1;
                        continue;
                    }
                    // p-distance to the window corner; larger means closer
                    // to the cursor, ties go to the first (smallest) sid.
                    let d = (cu + wedge - s.u as i64) + (cv + wedge - s.v as i64);
                    if best.map_or(true, |(bd, _)| d > bd) {
                        best = Some((d, sid));
                    }
                    sid += 1;
                }

                let Some((_, bsid)) = best else { break };
                if seeds[bsid].lid != UNCHAINED {
                    merged_lid = seeds[bsid].lid;
                    break;
                }
                seeds[bsid].lid = lid;
                scnt += 1;
                cursor = bsid;
            }
            next_unchained = if first_skipped != usize::MAX {
                first_skipped
            } else {
                cursor + 1
            };

            // Finalize the leaf: resolve the effective tail and chain id.
            let (tail, merged_cid) = if merged_lid != UNCHAINED {
                let t = leaves[merged_lid as usize];
                (t.tail_sid as usize, t.cid)
            } else {
                (cursor, UNCHAINED)
            };
            if tail == root {
                continue; // nothing chained
            }

            let span = (seeds[tail].p() - p0).max(0);
            let plen = ((1.0 - 1.0 / scnt as f64) * span as f64) as i64;
            let plen = plen.clamp(0, (CHAIN_ABSORBED - 1) as i64) as u32;

            let cid = if merged_cid != UNCHAINED {
                merged_cid
            } else {
                let cid = chains.len() as u32;
                chains.push(ChainRec { plen: 0, lid });
                if merged_lid != UNCHAINED {
                    leaves[merged_lid as usize].cid = cid;
                }
                cid
            };
            leaves[lid as usize].cid = cid;
            leaves[lid as usize].tail_sid = tail as u32;
            if plen > chains[cid as usize].plen {
                chains[cid as usize] = ChainRec { plen, lid };
            }
        }
        chains.len()
    }

    /// Link chain tails near the end of a circular reference back to chain
    /// heads near its origin, so junction-spanning mappings report as one
    /// alignment. The absorbed chain is flagged; the outer chain adopts its
    /// tail and path length.
    pub fn circularize(&mut self, seqs: &[RefSeq], wlen: i64, wedge: i64) {
        for rcid in 0..self.chains.len() {
            if self.chains[rcid].plen & CHAIN_ABSORBED != 0 {
                continue;
            }
            let rlid = self.chains[rcid].lid as usize;
            let tail_sid = self.leaves[rlid].tail_sid as usize;
            let rid = self.leaves[rlid].rid;
            let sref = &seqs[rid as usize];
            if !sref.circular {
                continue;
            }
            let rlen = sref.l_seq as i64;
            let tail = self.seeds[tail_sid];
            if rlen - tail.apos() > wlen {
                continue; // tail not near the sequence end
            }
            let (uofs, vofs) = (2 * rlen, -rlen);
            let (tu, tv) = (tail.u as i64, tail.v as i64);

            // Candidate heads: near-origin roots of other chains on the same
            // reference whose O-shifted position falls inside the window.
            let mut pick: Option<(u32, u32)> = None; // (plen, lid)
            for (lid, leaf) in self.leaves.iter().enumerate() {
                if leaf.rid != rid || leaf.cid == UNCHAINED {
                    continue;
                }
                let lcid = leaf.cid as usize;
                if lcid == rcid || self.chains[lcid].plen & CHAIN_ABSORBED != 0 {
                    continue;
                }
                let f = self.seeds[leaf.root_sid as usize];
                if !in_window(tu, tv, f.u as i64 + uofs, f.v as i64 + vofs, wedge) {
                    continue;
                }
                let cand = (self.chains[lcid].plen, lid as u32);
                if pick.map_or(true, |p| cand < p) {
                    pick = Some(cand);
                }
            }
            let Some((_, llid)) = pick else { continue };
            let lcid = self.leaves[llid as usize].cid as usize;

            let absorbed = self.chains[lcid].plen & !CHAIN_ABSORBED;
            self.chains[lcid].plen |= CHAIN_ABSORBED;
            self.chains[rcid].plen = (self.chains[rcid].plen)
                .saturating_add(absorbed)
                .min(CHAIN_ABSORBED - 1);
            self.leaves[rlid].tail_sid = self.leaves[llid as usize].tail_sid;
        }
    }

    /// Drop absorbed chains and order the rest by path length, longest
    /// first.
    pub fn finish_chains(&mut self) -> usize {
        self.chains.retain(|c| c.plen & CHAIN_ABSORBED == 0);
        self.chains.sort_unstable_by_key(|c| std::cmp::Reverse(c.plen));
        self.chains.len()
    }
}
