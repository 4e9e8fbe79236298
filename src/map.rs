// nanomap/src/map.rs
//
// Extension scheduler: walks the chains of a query in descending path-length
// order, issues banded extensions from chain seeds until each chain is
// covered or its budgets run out, deduplicates rediscovered alignments
// through the position hash, and post-processes the surviving result bins
// into primary/supplementary/secondary records with mapping qualities.

use crate::chain::{ChainBuf, OFS, Seed, in_window};
use crate::dp::{BandedSwg, DpWorkspace, FillMax, SeqView, TraceOut};
use crate::index::{MiniIndex, RefSeq};
use crate::khash::{KH_INIT_VAL, KHash};
use crate::opt::MapOpt;

#[path = "map_test.rs"]
mod map_test;

/// Chains tried without producing an alignment before the query is given up.
pub const MAX_CHAIN_TRIALS: u32 = 50_000;
/// Extension attempts per chain before moving on.
pub const MAX_SEED_TRIALS: u32 = 8;
/// Mapq fixed-point scale.
pub const MAPQ_COEF: u32 = 16;
/// Base band width of an extension; narrowed on duplicate collisions.
const DP_BAND: u32 = 64;
/// (u,v)-space exclusion edge around the current head when picking the next
/// seed (128 bases linear).
const NEAR_WEDGE: i64 = 256;

/// One aligned stretch on a reference. `qs` is always on the forward query;
/// `rev` tells whether the query aligns reverse-complemented. `ppos` is the
/// column offset of this stretch within the alignment path.
#[derive(Debug, Clone)]
pub struct Segment {
    pub rid: u32,
    pub rs: u32,
    pub rlen: u32,
    pub qs: u32,
    pub qlen: u32,
    pub ppos: u32,
    pub rev: bool,
}

/// A gapped alignment produced by the extension kernel.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub segs: Vec<Segment>,
    pub cigar: Vec<(u8, u32)>,
    pub score: i64,
    pub identity: f64,
    pub mcnt: u32,
    pub dcnt: u32,
    pub agcnt: u32,
    pub bgcnt: u32,
    /// Reference plus query bases consumed.
    pub plen: u32,
}

impl Alignment {
    /// Slice of the run-length path covering columns [from, to).
    pub fn cigar_slice(&self, from: u32, to: u32) -> Vec<(u8, u32)> {
        let mut out = Vec::new();
        let mut col = 0u32;
        for &(op, n) in &self.cigar {
            let s = col.max(from);
            let e = (col + n).min(to);
            if e > s {
                out.push((op, e - s));
            }
            col += n;
            if col >= to {
                break;
            }
        }
        out
    }

    pub fn columns(&self) -> u32 {
        self.cigar.iter().map(|&(_, n)| n).sum()
    }
}

/// One output record: result-bin index, its mapq (x16 fixed point) and the
/// alignment itself.
pub struct AlnEntry {
    pub aid: u32,
    pub mapq: u32,
    pub aln: Alignment,
}

/// Everything reported for one query, best first. The first `n_uniq` entries
/// are primary or supplementary; the rest are secondary.
pub struct AlignmentSet {
    pub n_all: u32,
    pub n_uniq: u32,
    pub alns: Vec<AlnEntry>,
}

/// Per-chain result accumulator.
#[derive(Debug, Clone, Default)]
struct ResBin {
    score: i64,
    n_aln: u32,
    plen: u32,
    lb: u32,
    ub: u32,
    mapq: u32,
    alns: Vec<u32>,
}

impl ResBin {
    fn open() -> Self {
        ResBin {
            lb: u32::MAX,
            ub: 0,
            ..ResBin::default()
        }
    }
}

/// Thread-local mapping buffers, reset (not freed) between queries.
#[derive(Default)]
pub struct MapBuffer {
    pub cb: ChainBuf,
    ws: DpWorkspace,
    pos: KHash,
    bins: Vec<ResBin>,
    pool: Vec<Option<Alignment>>,
    next: Vec<(u32, u32)>, // (pdiff, sid): next-seed candidates
}

impl MapBuffer {
    fn clear(&mut self) {
        self.pos.clear();
        self.bins.clear();
        self.pool.clear();
        self.next.clear();
    }
}

/// Per-extension search state.
struct SearchState {
    cp: (i64, i64), // current head (ref-forward view, query strand view)
    tp: (i64, i64), // downward max
    rev: bool,
    aid: u32,
    qid: u32,
    sid: usize, // up-chain scan base
    eid: usize, // open result bin
    prem: i64,
    pacc: i64,
    crem: u32,
    srem: u32,
    narrow: u32,
    min_score: i64,
}

#[inline]
fn dup_key(aid: u32, qid: u32, rev: bool, apos: i64, bpos: i64) -> u64 {
    let x = ((apos as u64) << 32) | (bpos as u64 & 0xffff_ffff);
    let y = ((aid as u64) << 33) | ((qid as u64) << 1) | rev as u64;
    x ^ (x >> 29) ^ y ^ y.swap_bytes()
}

#[inline]
fn pack_mark(eid: u32, nid: u32) -> u64 {
    ((nid as u64) << 32) | eid as u64
}

#[inline]
fn unpack_mark(v: u64) -> (u32, u32) {
    (v as u32, (v >> 32) as u32)
}

#[inline]
fn clip_mapq(q: f64) -> u32 {
    if !q.is_finite() {
        return 60 * MAPQ_COEF;
    }
    (q.max(0.0) as u32).min(60 * MAPQ_COEF)
}

/// Anchor position of a seed: reference-forward and strand-view query
/// coordinates plus the strand. Out-of-range anchors are pulled back inside
/// (modulo the length for circular references).
fn load_pos(seed: &Seed, rref: &RefSeq, qlen: usize, k: u32) -> ((i64, i64), bool) {
    let rlen = rref.l_seq as i64;
    let qlen = qlen as i64;
    let r = seed.apos();
    let mut q = seed.bpos();
    let rev = q < 0;
    if rev {
        q += qlen;
    }
    let mut apos = r;
    let mut bpos = q;
    if rref.circular {
        // Work in the doubled coordinate space: anchors in the first half
        // are lifted one copy up so the upward pass can cross the origin,
        // anchors near the end stay put so the downward pass can.
        if apos >= 2 * rlen {
            apos -= rlen;
        }
        if apos < rlen / 2 {
            apos += rlen;
        }
        return ((apos.clamp(0, 2 * rlen), bpos.clamp(0, qlen)), rev);
    }
    if apos >= rlen || bpos >= qlen {
        apos -= apos.min(k as i64);
        bpos -= bpos.min(k as i64);
    }
    (
        (apos.clamp(0, rlen), bpos.clamp(0, qlen)),
        rev,
    )
}

/// The mapping engine: immutable index plus derived scoring constants,
/// shared read-only across worker threads.
pub struct AlignEngine<'a> {
    pub idx: &'a MiniIndex,
    swg: BandedSwg,
    wlen: i64,
    wedge: i64,
    gwedge: i64,
    min_score: u32,
    min_ratio: f64,
    mcoef: f64,
    xcoef: f64,
    ava: bool,
}

impl<'a> AlignEngine<'a> {
    pub fn new(idx: &'a MiniIndex, opt: &MapOpt) -> Self {
        let params = opt.score_params();
        let (mcoef, xcoef) = params.coefs();
        AlignEngine {
            idx,
            swg: BandedSwg::new(params),
            wlen: opt.wlen as i64,
            wedge: 2 * opt.wlen as i64,
            gwedge: 2 * opt.glen as i64,
            min_score: opt.min_score,
            min_ratio: opt.min_ratio as f64,
            mcoef,
            xcoef,
            ava: opt.ava,
        }
    }

    pub fn mcoef(&self) -> f64 {
        self.mcoef
    }

    /// Map one query (base codes). None means unmapped.
    pub fn align(&self, buf: &mut MapBuffer, query: &[u8], qid: u32) -> Option<AlignmentSet> {
        let qlen = query.len();
        if qlen < self.idx.k as usize
            || (qlen as f64) * self.mcoef < self.min_score as f64
        {
            return None;
        }
        buf.clear();

        for tier in 0..self.idx.n_occ as usize {
            if buf.cb.seed_round(self.idx, query, qid, self.ava, tier) == 0 {
                continue;
            }
            if buf.cb.chain(self.wedge) == 0 {
                continue;
            }
            buf.cb.circularize(self.idx.seqs(), self.wlen, self.wedge);
            if buf.cb.finish_chains() == 0 {
                continue;
            }
            if self.extend_chains(buf, query, qid) > 0 {
                break;
            }
        }
        if buf.bins.is_empty() {
            return None;
        }

        // Report in descending score order; prune far-below-best bins.
        buf.bins.sort_by(|a, b| b.score.cmp(&a.score));
        let floor = (buf.bins[0].score as f64 * self.min_ratio) as i64;
        let mut n_all = buf.bins.iter().take_while(|b| b.score >= floor).count();
        n_all = n_all.max(1);
        buf.bins.truncate(n_all);

        // Overlap sets skip the supplementary/secondary split; the mapq
        // estimator is the same either way.
        let n_uniq = if self.ava {
            buf.bins.len()
        } else {
            collect_supp(&mut buf.bins)
        };
        self.post_map(&mut buf.bins, &buf.pool, n_uniq);

        let mut alns = Vec::new();
        let mut n_uniq_alns = 0u32;
        for (i, bin) in buf.bins.iter().enumerate() {
            for &nid in &bin.alns {
                if let Some(aln) = buf.pool[nid as usize].take() {
                    alns.push(AlnEntry {
                        aid: i as u32,
                        mapq: bin.mapq,
                        aln,
                    });
                }
            }
            if i + 1 == n_uniq {
                n_uniq_alns = alns.len() as u32;
            }
        }
        if alns.is_empty() {
            return None;
        }
        if n_uniq_alns == 0 {
            n_uniq_alns = alns.len() as u32;
        }
        Some(AlignmentSet {
            n_all: n_all as u32,
            n_uniq: n_uniq_alns,
            alns,
        })
    }

    /// Walk the sorted chains, extending each until covered or out of
    /// budget. Returns the number of result bins kept.
    fn extend_chains(&self, buf: &mut MapBuffer, query: &[u8], qid: u32) -> usize {
        let qlen = query.len();
        let mut crem = MAX_CHAIN_TRIALS;
        let mut min_score = self.min_score as i64;

        for ci in 0..buf.cb.chains.len() {
            let chain = buf.cb.chains[ci];
            if (chain.plen as f64) * self.mcoef < 2.0 * self.min_score as f64 {
                break; // chains are sorted by path length
            }
            let leaf = buf.cb.leaves[chain.lid as usize];
            let rref = self.idx.seq(leaf.rid);
            let tail_sid = leaf.tail_sid as usize;
            let (cp, rev) = load_pos(&buf.cb.seeds[tail_sid], rref, qlen, self.idx.k);

            let eid = buf.bins.len();
            buf.bins.push(ResBin::open());
            buf.next.clear();
            let mut st = SearchState {
                cp,
                tp: cp,
                rev,
                aid: leaf.rid,
                qid,
                sid: tail_sid,
                eid,
                prem: chain.plen as i64,
                pacc: 0,
                crem,
                srem: MAX_SEED_TRIALS,
                narrow: 0,
                min_score,
            };

            while st.srem > 0 && st.prem > 0 {
                if self.extend_once(buf, &mut st, query) {
                    break;
                }
                if !self.load_next(buf, &mut st, qlen) {
                    break;
                }
            }
            min_score = st.min_score;

            let bin = &buf.bins[eid];
            if bin.n_aln == 0 || bin.score < self.min_score as i64 {
                buf.bins.pop();
                crem = st.crem.saturating_sub(1);
            } else {
                crem = MAX_CHAIN_TRIALS;
            }
            if crem == 0 {
                break;
            }
        }
        buf.bins.len()
    }

    /// One extension attempt from the current head. Returns true when the
    /// chain loop should stop.
    fn extend_once(&self, buf: &mut MapBuffer, st: &mut SearchState, query: &[u8]) -> bool {
        let rref = self.idx.seq(st.aid);
        let ra = SeqView::new(rref.bases(), rref.circular, false, false);
        let qv = if st.rev {
            SeqView::revcomp(query)
        } else {
            SeqView::forward(query)
        };
        let band = DP_BAND >> st.narrow;

        // Downward extension toward the sequence ends.
        let fmax = self.swg.fill_max(
            &mut buf.ws,
            &ra,
            &qv,
            st.cp.0 as u32,
            st.cp.1 as u32,
            band,
        );
        if fmax.score == 0 || self.test_dup(buf, st, &fmax) {
            return false; // try the next seed, possibly with a narrower band
        }

        // Upward extension from the downward max, reversed coordinates.
        let ra_rev = ra.flipped();
        let qv_rev = qv.flipped();
        let alim = ra.limit() as i64;
        let blim = query.len() as i64;
        let trace = self.swg.fill_trace(
            &mut buf.ws,
            &ra_rev,
            &qv_rev,
            (alim - st.tp.0) as u32,
            (blim - st.tp.1) as u32,
            DP_BAND,
        );
        let Some(tr) = trace else {
            return false;
        };
        if (tr.score as i64) < st.min_score {
            return false;
        }

        let aln = self.make_alignment(&tr, st, rref, query.len());
        self.record(buf, st, aln)
    }

    /// Position key normalized into the primary copy of a circular
    /// reference so rediscoveries through either copy collide.
    fn pos_key(&self, st: &SearchState, apos: i64, bpos: i64) -> u64 {
        let rref = self.idx.seq(st.aid);
        let apos = if rref.circular {
            apos.rem_euclid(rref.l_seq as i64)
        } else {
            apos
        };
        dup_key(st.aid, st.qid, st.rev, apos, bpos)
    }

    /// Mark the downward max in the dedup hash; report true when it was
    /// already reached by an earlier extension.
    fn test_dup(&self, buf: &mut MapBuffer, st: &mut SearchState, fmax: &FillMax) -> bool {
        st.tp = (fmax.apos as i64, fmax.bpos as i64);
        let key = self.pos_key(st, st.tp.0, st.tp.1);
        let cell = buf.pos.put_ptr(key, true);
        let prev = *cell;
        *cell = pack_mark(st.eid as u32, u32::MAX);
        if prev == KH_INIT_VAL {
            return false;
        }
        let (p_eid, _) = unpack_mark(prev);
        let ext = (st.tp.0 - st.cp.0) + (st.tp.1 - st.cp.1);
        if p_eid as usize != st.eid
            && (p_eid as usize) < buf.bins.len()
            && ext < buf.bins[p_eid as usize].plen as i64
        {
            // Contained in an earlier, longer result: stop this chain.
            st.srem = 0;
        } else {
            st.narrow = (st.narrow + 1).min(2);
        }
        true
    }

    /// Build the alignment record from an upward trace, splitting the
    /// reference span at the origin of a circular reference.
    fn make_alignment(
        &self,
        tr: &TraceOut,
        st: &SearchState,
        rref: &RefSeq,
        qlen: usize,
    ) -> Alignment {
        let rlen = rref.l_seq as i64;
        let (mut ahead, bhead) = (st.tp.0 - tr.a_off as i64, st.tp.1 - tr.b_off as i64);
        let mut atail = st.tp.0;
        if ahead >= rlen {
            // Entirely inside the wrapped copy.
            ahead -= rlen;
            atail -= rlen;
        }

        let to_fwd = |vs: i64, ve: i64| -> (u32, u32) {
            if st.rev {
                ((qlen as i64 - ve) as u32, (ve - vs) as u32)
            } else {
                (vs as u32, (ve - vs) as u32)
            }
        };

        let mut segs = Vec::with_capacity(2);
        if rref.circular && atail > rlen {
            // Walk the path to the origin crossing.
            let mut ar = ahead;
            let mut br = bhead;
            let mut col = 0u32;
            'outer: for &(op, n) in &tr.cigar {
                for _ in 0..n {
                    if ar == rlen {
                        break 'outer;
                    }
                    match op {
                        crate::dp::OP_DEL => ar += 1,
                        crate::dp::OP_INS => br += 1,
                        _ => {
                            ar += 1;
                            br += 1;
                        }
                    }
                    col += 1;
                }
            }
            let (qs1, ql1) = to_fwd(bhead, br);
            let (qs2, ql2) = to_fwd(br, st.tp.1);
            segs.push(Segment {
                rid: st.aid,
                rs: ahead as u32,
                rlen: (rlen - ahead) as u32,
                qs: qs1,
                qlen: ql1,
                ppos: 0,
                rev: st.rev,
            });
            segs.push(Segment {
                rid: st.aid,
                rs: 0,
                rlen: (atail - rlen) as u32,
                qs: qs2,
                qlen: ql2,
                ppos: col,
                rev: st.rev,
            });
        } else {
            let (qs, ql) = to_fwd(bhead, st.tp.1);
            segs.push(Segment {
                rid: st.aid,
                rs: ahead as u32,
                rlen: (atail - ahead) as u32,
                qs,
                qlen: ql,
                ppos: 0,
                rev: st.rev,
            });
        }

        let identity = if tr.dcnt > 0 {
            tr.mcnt as f64 / tr.dcnt as f64
        } else {
            0.0
        };
        Alignment {
            segs,
            cigar: tr.cigar.clone(),
            score: tr.score as i64,
            identity,
            mcnt: tr.mcnt,
            dcnt: tr.dcnt,
            agcnt: tr.agcnt,
            bgcnt: tr.bgcnt,
            plen: 2 * tr.dcnt + tr.agcnt + tr.bgcnt,
        }
    }

    /// Record an alignment into the open result bin and the dedup hash.
    /// Returns true when the chain loop should stop (duplicated head or
    /// exhausted span).
    fn record(&self, buf: &mut MapBuffer, st: &mut SearchState, aln: Alignment) -> bool {
        let head = (st.tp.0 - aln_a_off(&aln) as i64, st.tp.1 - aln_b_off(&aln) as i64);
        let tail = st.tp;

        let hk = self.pos_key(st, head.0, head.1);
        let tk = self.pos_key(st, tail.0, tail.1);
        let prev_h = *buf.pos.put_ptr(hk, true);
        let (_, prev_nid) = unpack_mark(prev_h);
        let new = prev_nid == u32::MAX;

        let score = aln.score;
        let plen = aln.plen;
        let identity = aln.identity;

        // Query-forward span, from the segments (uniform across strands).
        let qlb = aln.segs.iter().map(|g| g.qs).min().unwrap_or(0) as i64;
        let qub = aln
            .segs
            .iter()
            .map(|g| g.qs + g.qlen)
            .max()
            .unwrap_or(0) as i64;

        // Update the result bin: the score favors novel query coverage.
        let bin = &mut buf.bins[st.eid];
        let novel = if bin.n_aln == 0 {
            qub - qlb
        } else {
            (bin.lb as i64 - qlb).max(0) + (qub - bin.ub as i64).max(0)
        };
        bin.score += score + (2.0 * novel as f64 * identity) as i64;
        bin.n_aln += new as u32;
        bin.plen += plen;
        bin.lb = bin.lb.min(qlb as u32);
        bin.ub = bin.ub.max(qub as u32);

        // Store or reconcile the alignment at this head position; of two
        // alignments sharing a head, the higher-scoring one survives.
        if new {
            buf.pool.push(Some(aln));
            let nid = (buf.pool.len() - 1) as u32;
            let mark = pack_mark(st.eid as u32, nid);
            *buf.pos.put_ptr(hk, false) = mark;
            *buf.pos.put_ptr(tk, false) = mark;
            buf.bins[st.eid].alns.push(nid);
        } else {
            let nid = prev_nid;
            let existing_score = buf.pool[nid as usize]
                .as_ref()
                .map(|a| a.score)
                .unwrap_or(i64::MIN);
            if existing_score > score {
                // Evaluated but beaten: leave the stored alignment, mark the
                // tail position as visited.
                *buf.pos.put_ptr(tk, false) = pack_mark(st.eid as u32, u32::MAX);
            } else {
                buf.pool[nid as usize] = Some(aln);
                let mark = pack_mark(st.eid as u32, nid);
                *buf.pos.put_ptr(hk, false) = mark;
                *buf.pos.put_ptr(tk, false) = mark;
            }
        }

        // Advance the head and the budgets.
        st.cp = head;
        st.prem -= plen as i64;
        st.pacc = plen as i64;
        st.srem = MAX_SEED_TRIALS;
        st.narrow = 0;
        st.min_score = st.min_score.max((score as f64 * self.min_ratio) as i64);

        !(new && st.prem > 0)
    }

    /// Pick the closest up-chain seed within the linkable window of the
    /// current head, maintaining the aged candidate array. Returns false
    /// when the chain has no further seed.
    fn load_next(&self, buf: &mut MapBuffer, st: &mut SearchState, qlen: usize) -> bool {
        if st.srem == 0 {
            return false;
        }
        st.srem -= 1;

        let ofs = 2 * self.gwedge;
        if st.pacc > ofs {
            buf.next.clear();
        } else {
            let plim = (ofs - st.pacc) as u32;
            let cut = buf
                .next
                .iter()
                .position(|&(pd, _)| pd >= plim)
                .unwrap_or(buf.next.len());
            buf.next.truncate(cut);
            for e in buf.next.iter_mut() {
                e.0 += st.pacc as u32;
            }
        }

        // Head position back in (u,v) space.
        let q_enc = st.cp.1 - if st.rev { qlen as i64 } else { 0 };
        let hu = 2 * st.cp.0 - q_enc + OFS;
        let hv = 2 * q_enc - st.cp.0 + OFS;

        let seeds = &buf.cb.seeds;
        let mut sid = st.sid;
        let mut rcnt = 2 * st.srem;
        while sid > 0 && rcnt > 0 {
            let s = seeds[sid - 1];
            if s.rid != st.aid || (s.v as i64) + self.gwedge < hv {
                break;
            }
            let su = s.u as i64;
            let sv = s.v as i64;
            if in_window(su, sv, hu, hv, self.gwedge) && !in_window(su, sv, hu, hv, NEAR_WEDGE)
            {
                let d = (su + self.gwedge - hu) + (sv + self.gwedge - hv);
                buf.next.push((d as u32, (sid - 1) as u32));
                rcnt -= 1;
            }
            sid -= 1;
        }
        st.sid = sid;

        if buf.next.is_empty() {
            st.pacc = 0;
            st.srem = 0;
            return false;
        }
        buf.next.sort_unstable();
        let (pd, nsid) = buf.next.pop().expect("non-empty");
        st.pacc = ofs - pd as i64;
        let rref = self.idx.seq(st.aid);
        let (cp, rev) = load_pos(&seeds[nsid as usize], rref, qlen, self.idx.k);
        st.cp = cp;
        st.rev = rev;
        true
    }

    /// Mapq for primaries and supplementaries from the unique-length
    /// estimate, then for secondaries from the scaled score sum.
    fn post_map(&self, bins: &mut [ResBin], pool: &[Option<Alignment>], n_uniq: usize) {
        let mut usc = 0i64;
        let mut lsc = i64::MAX;
        let mut tsc = 0i64;
        for b in &bins[n_uniq..] {
            usc = usc.max(b.score);
            lsc = lsc.min(b.score);
            tsc += b.score;
        }
        if lsc == i64::MAX {
            lsc = 0;
        }

        let x = self.xcoef;
        let mx = self.mcoef + self.xcoef;
        let mut tpc = 1.0f64;
        for b in bins[..n_uniq].iter_mut() {
            let pid = bin_identity(b, pool);
            let denom = pid * mx - x;
            let ec = if denom > 0.0 { 2.0 / denom } else { 0.0 };
            let ulen = ec * (b.score - usc).max(0) as f64;
            let pe = 1.0 / (ulen * ulen + 1.0);
            b.mapq = clip_mapq(-10.0 * MAPQ_COEF as f64 * pe.log10());
            tpc *= 1.0 - pe;
        }

        let tpe = (1.0 - tpc).min(1.0);
        for b in bins[n_uniq..].iter_mut() {
            let frac = if tsc > 0 {
                tpe * (b.score - lsc + 1) as f64 / tsc as f64
            } else {
                0.0
            };
            b.mapq = clip_mapq(-10.0 * MAPQ_COEF as f64 * (1.0 - frac).max(1e-30).log10());
        }
    }
}

fn aln_a_off(aln: &Alignment) -> u32 {
    aln.dcnt + aln.agcnt
}

fn aln_b_off(aln: &Alignment) -> u32 {
    aln.dcnt + aln.bgcnt
}

fn bin_identity(bin: &ResBin, pool: &[Option<Alignment>]) -> f64 {
    let mut len = 0u64;
    let mut pid = 0.0f64;
    for &nid in &bin.alns {
        if let Some(a) = &pool[nid as usize] {
            len += a.plen as u64;
            pid += a.plen as f64 * a.identity;
        }
    }
    if len > 0 { pid / len as f64 } else { 0.0 }
}

/// Split sorted result bins into primary/supplementary and secondary: a bin
/// is secondary when the query span left after subtracting every
/// higher-ranked bin is covered 1.2x over by its full span. Returns the
/// number of non-secondary bins.
fn collect_supp(bins: &mut Vec<ResBin>) -> usize {
    let n = bins.len();
    let mut p = 1usize;
    let mut q = n;
    while p < q {
        let mut max_key = 0u64;
        let mut i = p;
        while i < q {
            let (lb0, ub0) = (bins[i].lb as i64, bins[i].ub as i64);
            let span = ub0 - lb0;
            let mut lb = lb0;
            let mut ub = ub0;
            let mut secondary = false;
            for j in 0..p {
                let t = &bins[j];
                if (t.ub as i64) < ub {
                    lb = lb.max(t.ub as i64);
                } else {
                    ub = ub.min(t.lb as i64);
                }
                if 6 * (ub - lb) < 5 * span {
                    // 1.2 * remaining < span: covered by the primaries
                    secondary = true;
                    break;
                }
            }
            if secondary {
                q -= 1;
                bins.swap(i, q);
                continue;
            }
            let cover = (2 * (ub - lb) - span).max(0) as u64;
            max_key = max_key.max((cover << 32) | i as u64);
            i += 1;
        }
        if max_key & 0xffff_ffff != 0 {
            bins.swap(p, (max_key & 0xffff_ffff) as usize);
        }
        p += 1;
    }
    p.min(q)
}
