// nanomap/src/index.rs
//
// Double-hash minimizer index. The low b bits of a minimizer hash select a
// bucket; inside the bucket a Robinhood table keyed on `hash >> b` holds
// either an inline (position, id) pair for unique minimizers or a (base,
// count) reference into the bucket's packed value array. Construction runs
// the read->sketch->bin pipeline of ptask followed by bucket-parallel sort,
// occurrence counting and table building under rayon.

use rayon::prelude::*;
use std::collections::HashSet;
use std::io::{self, Read, Write};

use crate::khash::KHash;
use crate::opt::IndexOpt;
use crate::ptask::run_pipeline;
use crate::seq::{SEQ_MARGIN, SeqBatch, SeqReader};
use crate::sketch::{MinimizerIter, Sketcher};
use crate::utils::ks_ksmall_u32;

#[path = "index_test.rs"]
mod index_test;

/// "MAI\x08" little endian.
pub const IDX_MAGIC: u32 = 0x0849_414d;
/// Maximum number of occurrence tiers.
pub const MAX_FRQ_CNT: usize = 7;

const VAL_INDIRECT: u64 = 1 << 63;

/// Reference-side sequence: base codes with an N-filled margin on both
/// sides, plus the circular flag from index construction.
#[derive(Debug)]
pub struct RefSeq {
    pub name: String,
    seq: Vec<u8>,
    pub l_seq: u32,
    pub circular: bool,
}

impl RefSeq {
    pub fn from_codes(name: String, codes: &[u8], circular: bool) -> Self {
        let mut seq = Vec::with_capacity(codes.len() + 2 * SEQ_MARGIN);
        seq.resize(SEQ_MARGIN, 4u8);
        seq.extend_from_slice(codes);
        seq.resize(codes.len() + 2 * SEQ_MARGIN, 4u8);
        RefSeq {
            name,
            l_seq: codes.len() as u32,
            seq,
            circular,
        }
    }

    /// The bases without the margins.
    pub fn bases(&self) -> &[u8] {
        &self.seq[SEQ_MARGIN..SEQ_MARGIN + self.l_seq as usize]
    }
}

/// Packed index value: position in the low word, `id << 1 | strand` in the
/// high word (the sign bit is never set for real ids).
#[inline]
pub fn pack_val(pos: u32, rid_s: u32) -> u64 {
    (pos as u64) | ((rid_s as u64) << 32)
}

#[inline]
pub fn val_pos(v: u64) -> u32 {
    v as u32
}

#[inline]
pub fn val_rid_s(v: u64) -> u32 {
    (v >> 32) as u32
}

#[derive(Default, Debug)]
pub struct Bucket {
    h: KHash,
    vals: Vec<u64>,
}

/// Lookup result: nothing, a single inlined hit, or a slice of the bucket's
/// value array.
pub enum Hits<'a> {
    None,
    One(u64),
    Many(&'a [u64]),
}

impl<'a> Hits<'a> {
    pub fn len(&self) -> usize {
        match self {
            Hits::None => 0,
            Hits::One(_) => 1,
            Hits::Many(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        let vals: &[u64] = match self {
            Hits::None => &[],
            Hits::One(v) => std::slice::from_ref(v),
            Hits::Many(s) => s,
        };
        vals.iter().copied()
    }
}

#[derive(Debug)]
pub struct MiniIndex {
    pub b: u32,
    pub w: u32,
    pub k: u32,
    pub n_occ: u32,
    pub occ: [u32; MAX_FRQ_CNT],
    mask: u64,
    buckets: Vec<Bucket>,
    seqs: Vec<RefSeq>,
}

struct Mini {
    hrem: u64,
    pos: u32,
    rid_s: u32,
}

struct BuildItem {
    batch: SeqBatch,
    sketches: Vec<Vec<u64>>,
    circular: Vec<bool>,
}

impl MiniIndex {
    pub fn n_seq(&self) -> usize {
        self.seqs.len()
    }

    pub fn seq(&self, rid: u32) -> &RefSeq {
        &self.seqs[rid as usize]
    }

    pub fn seqs(&self) -> &[RefSeq] {
        &self.seqs
    }

    /// The drop threshold: keys occurring more often than this were removed.
    pub fn max_occ(&self) -> u32 {
        self.occ[self.n_occ as usize - 1]
    }

    /// Hot path: minimizer hash to its (position, id) hits.
    pub fn get(&self, minier: u64) -> Hits<'_> {
        let bkt = &self.buckets[(minier & self.mask) as usize];
        match bkt.h.get(minier >> self.b) {
            None => Hits::None,
            Some(v) if v & VAL_INDIRECT == 0 => Hits::One(v),
            Some(v) => {
                let base = ((v >> 32) & 0x7fff_ffff) as usize;
                let n = (v & 0xffff_ffff) as usize;
                Hits::Many(&bkt.vals[base..base + n])
            }
        }
    }

    /// Build from a sequence stream. Sketching runs on the pipeline workers;
    /// the in-order drain assigns reference ids and bins minimizers; the
    /// bucket passes (sort, occurrence count, hash build) run under rayon.
    pub fn build(opt: &IndexOpt, reader: &mut SeqReader, nth: usize) -> io::Result<MiniIndex> {
        let k = opt.k;
        let w = opt.w;
        let b = opt.b.min(2 * k);
        let mask = (1u64 << b) - 1;
        assert!(
            !opt.frq.is_empty() && opt.frq.len() <= MAX_FRQ_CNT,
            "between 1 and 7 occurrence tiers required"
        );

        let circ_all = opt.circular.as_ref().is_some_and(|v| v.is_empty());
        let circ_names: HashSet<&str> = opt
            .circular
            .as_ref()
            .map(|v| v.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default();

        let mut staging: Vec<Vec<Mini>> = (0..(1usize << b)).map(|_| Vec::new()).collect();
        let mut seqs: Vec<RefSeq> = Vec::new();
        let mut read_err: Option<io::Error> = None;

        {
            let reader = &mut *reader;
            let read_err = &mut read_err;
            let staging = &mut staging;
            let seqs = &mut seqs;
            let circ_names = &circ_names;
            run_pipeline(
                nth,
                move || match reader.read_batch(4 * 1024 * 1024) {
                    Ok(batch) if batch.is_empty() => None,
                    Ok(batch) => Some(BuildItem {
                        sketches: Vec::new(),
                        circular: Vec::new(),
                        batch,
                    }),
                    Err(e) => {
                        *read_err = Some(e);
                        None
                    }
                },
                |_tid| {
                    let circ_names = circ_names;
                    move |mut item: BuildItem| {
                        for rec in &item.batch.records {
                            let circ = circ_all || circ_names.contains(rec.name.as_str());
                            let mut sk = Sketcher::new(w, k);
                            let mut mins =
                                Vec::with_capacity(4 * rec.seq.len() / w as usize + 16);
                            sk.feed(&rec.seq, &mut mins);
                            if circ {
                                // Close the windows spanning the origin.
                                let wrap = rec.seq.len().min((w + k - 1) as usize);
                                sk.feed(&rec.seq[..wrap], &mut mins);
                            }
                            item.sketches.push(mins);
                            item.circular.push(circ);
                        }
                        item
                    }
                },
                |item: BuildItem| {
                    for (i, rec) in item.batch.records.iter().enumerate() {
                        let rid = seqs.len() as u32;
                        for m in MinimizerIter::new(&item.sketches[i], w) {
                            staging[(m.hash & mask) as usize].push(Mini {
                                hrem: m.hash >> b,
                                pos: m.pos,
                                rid_s: (rid << 1) | m.strand,
                            });
                        }
                        seqs.push(RefSeq::from_codes(
                            rec.name.clone(),
                            &rec.seq,
                            item.circular[i],
                        ));
                    }
                },
            );
        }
        if let Some(e) = read_err {
            return Err(e);
        }

        // Sort buckets and collect per-key occurrence counts.
        let mut per_bucket_counts: Vec<Vec<u32>> = staging
            .par_iter_mut()
            .map(|minis| {
                minis.sort_unstable_by_key(|m| (m.hrem, m.pos, m.rid_s));
                let mut counts = Vec::new();
                let mut i = 0;
                while i < minis.len() {
                    let mut j = i + 1;
                    while j < minis.len() && minis[j].hrem == minis[i].hrem {
                        j += 1;
                    }
                    counts.push((j - i) as u32);
                    i = j;
                }
                counts
            })
            .collect();

        let mut all_counts: Vec<u32> = per_bucket_counts.drain(..).flatten().collect();
        let n_keys = all_counts.len();
        log::info!(
            "collected {} minimizers over {} distinct keys",
            staging.iter().map(|v| v.len()).sum::<usize>(),
            n_keys
        );

        // Percentile-select the occurrence thresholds.
        let mut occ = [u32::MAX; MAX_FRQ_CNT];
        for (i, &f) in opt.frq.iter().enumerate() {
            occ[i] = if f <= 0.0 || n_keys == 0 {
                u32::MAX
            } else {
                let sel = (((1.0 - f) * n_keys as f64) as usize).min(n_keys - 1);
                ks_ksmall_u32(&mut all_counts, sel) + 1
            };
        }
        let n_occ = opt.frq.len() as u32;
        let max_cnt = occ[n_occ as usize - 1];
        log::info!("occurrence thresholds: {:?}", &occ[..n_occ as usize]);

        // Build the per-bucket second-stage tables.
        let buckets: Vec<Bucket> = staging
            .par_iter()
            .map(|minis| {
                if minis.is_empty() {
                    return Bucket::default();
                }
                let mut n_keys_bkt = 0usize;
                let mut i = 0;
                while i < minis.len() {
                    let mut j = i + 1;
                    while j < minis.len() && minis[j].hrem == minis[i].hrem {
                        j += 1;
                    }
                    n_keys_bkt += 1;
                    i = j;
                }
                let mut h = KHash::with_capacity((1.1 * n_keys_bkt as f64 / 0.4) as usize);
                let mut vals = Vec::new();
                let mut i = 0;
                while i < minis.len() {
                    let mut j = i + 1;
                    while j < minis.len() && minis[j].hrem == minis[i].hrem {
                        j += 1;
                    }
                    let n = j - i;
                    if n <= max_cnt as usize {
                        if n == 1 {
                            h.put(minis[i].hrem, pack_val(minis[i].pos, minis[i].rid_s));
                        } else {
                            let base = vals.len() as u64;
                            for m in &minis[i..j] {
                                vals.push(pack_val(m.pos, m.rid_s));
                            }
                            h.put(
                                minis[i].hrem,
                                VAL_INDIRECT | (base << 32) | (n as u64),
                            );
                        }
                    }
                    i = j;
                }
                Bucket { h, vals }
            })
            .collect();

        Ok(MiniIndex {
            b,
            w,
            k,
            n_occ,
            occ,
            mask,
            buckets,
            seqs,
        })
    }

    fn payload_bytes(&self) -> u64 {
        let mut size = 4u64 * 4 + 4 * MAX_FRQ_CNT as u64 + 4;
        for s in &self.seqs {
            size += 2 + s.name.len() as u64 + 4 + 1 + s.l_seq as u64;
        }
        for bkt in &self.buckets {
            size += bkt.h.dump_bytes() as u64 + 8 + 8 * bkt.vals.len() as u64;
        }
        size
    }

    /// Serialize: magic, payload size, then params, sequences and buckets.
    pub fn dump<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&IDX_MAGIC.to_le_bytes())?;
        w.write_all(&self.payload_bytes().to_le_bytes())?;

        w.write_all(&self.b.to_le_bytes())?;
        w.write_all(&self.w.to_le_bytes())?;
        w.write_all(&self.k.to_le_bytes())?;
        w.write_all(&self.n_occ.to_le_bytes())?;
        for o in &self.occ {
            w.write_all(&o.to_le_bytes())?;
        }

        w.write_all(&(self.seqs.len() as u32).to_le_bytes())?;
        for s in &self.seqs {
            w.write_all(&(s.name.len() as u16).to_le_bytes())?;
            w.write_all(s.name.as_bytes())?;
            w.write_all(&s.l_seq.to_le_bytes())?;
            w.write_all(&[s.circular as u8])?;
            w.write_all(s.bases())?;
        }

        for bkt in &self.buckets {
            bkt.h.dump(w)?;
            w.write_all(&(bkt.vals.len() as u64).to_le_bytes())?;
            for v in &bkt.vals {
                w.write_all(&v.to_le_bytes())?;
            }
        }
        Ok(())
    }

    /// Deserialize an index written by `dump`. A wrong magic or a short read
    /// surfaces as InvalidData so callers can fall back to on-the-fly
    /// construction.
    pub fn load<R: Read>(r: &mut R) -> io::Result<MiniIndex> {
        let mut b4 = [0u8; 4];
        let mut b8 = [0u8; 8];
        let mut b2 = [0u8; 2];
        let mut b1 = [0u8; 1];

        r.read_exact(&mut b4)?;
        if u32::from_le_bytes(b4) != IDX_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "index magic mismatch",
            ));
        }
        r.read_exact(&mut b8)?;
        let _payload = u64::from_le_bytes(b8);

        r.read_exact(&mut b4)?;
        let b = u32::from_le_bytes(b4);
        if b > 32 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "corrupt index header",
            ));
        }
        r.read_exact(&mut b4)?;
        let w = u32::from_le_bytes(b4);
        r.read_exact(&mut b4)?;
        let k = u32::from_le_bytes(b4);
        r.read_exact(&mut b4)?;
        let n_occ = u32::from_le_bytes(b4);
        let mut occ = [u32::MAX; MAX_FRQ_CNT];
        for o in occ.iter_mut() {
            r.read_exact(&mut b4)?;
            *o = u32::from_le_bytes(b4);
        }

        r.read_exact(&mut b4)?;
        let n_seq = u32::from_le_bytes(b4);
        let mut seqs = Vec::with_capacity(n_seq as usize);
        for _ in 0..n_seq {
            r.read_exact(&mut b2)?;
            let name_len = u16::from_le_bytes(b2) as usize;
            let mut name = vec![0u8; name_len];
            r.read_exact(&mut name)?;
            r.read_exact(&mut b4)?;
            let l_seq = u32::from_le_bytes(b4);
            r.read_exact(&mut b1)?;
            let circular = b1[0] != 0;
            let mut codes = vec![0u8; l_seq as usize];
            r.read_exact(&mut codes)?;
            let name = String::from_utf8(name).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "non-utf8 sequence name")
            })?;
            seqs.push(RefSeq::from_codes(name, &codes, circular));
        }

        let mut buckets = Vec::with_capacity(1usize << b);
        for _ in 0..(1usize << b) {
            let h = KHash::load(r)?;
            r.read_exact(&mut b8)?;
            let n_vals = u64::from_le_bytes(b8) as usize;
            let mut vals = Vec::with_capacity(n_vals);
            for _ in 0..n_vals {
                r.read_exact(&mut b8)?;
                vals.push(u64::from_le_bytes(b8));
            }
            buckets.push(Bucket { h, vals });
        }

        Ok(MiniIndex {
            b,
            w,
            k,
            n_occ,
            occ,
            mask: (1u64 << b) - 1,
            buckets,
            seqs,
        })
    }
}
