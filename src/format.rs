// nanomap/src/format.rs
//
// Output record printers. Each alignment set arrives in score order with the
// primary first; SAM gets one line per segment with clips derived from the
// query-forward segment coordinates, the tabular formats get one row per
// segment, MAF gets a block with the gapped texts reconstructed from the
// path.

use std::io::{self, Write};

use crate::dp::{OP_DEL, OP_INS};
use crate::index::RefSeq;
use crate::map::{Alignment, AlignmentSet, MAPQ_COEF, Segment};
use crate::opt::{MapOpt, OutFormat};
use crate::seq::{SeqRecord, code_to_base, comp_code};

#[path = "format_test.rs"]
mod format_test;

const SAM_REVERSE: u32 = 0x10;
const SAM_UNMAPPED: u32 = 0x4;
const SAM_SECONDARY: u32 = 0x100;
const SAM_SUPPLEMENTARY: u32 = 0x800;

pub struct Printer {
    format: OutFormat,
    omit_rep: bool,
    read_group: Option<String>,
}

impl Printer {
    pub fn new(opt: &MapOpt) -> Printer {
        Printer {
            format: opt.format,
            omit_rep: opt.omit_rep,
            read_group: opt.read_group.clone(),
        }
    }

    fn rg_id(&self) -> Option<&str> {
        let line = self.read_group.as_deref()?;
        line.split('\t')
            .find_map(|f| f.strip_prefix("ID:"))
    }

    pub fn write_header<W: Write>(&self, w: &mut W, seqs: &[RefSeq]) -> io::Result<()> {
        match self.format {
            OutFormat::Sam => {
                writeln!(w, "@HD\tVN:1.6\tSO:unsorted")?;
                for s in seqs {
                    writeln!(w, "@SQ\tSN:{}\tLN:{}", s.name, s.l_seq)?;
                }
                if let Some(rg) = &self.read_group {
                    writeln!(w, "{}", rg)?;
                }
                writeln!(
                    w,
                    "@PG\tID:nanomap\tPN:nanomap\tVN:{}",
                    env!("CARGO_PKG_VERSION")
                )?;
            }
            OutFormat::Maf => {
                writeln!(w, "##maf version=1")?;
            }
            OutFormat::Paf | OutFormat::Blast6 => {}
        }
        Ok(())
    }

    pub fn write_mapped<W: Write>(
        &self,
        w: &mut W,
        seqs: &[RefSeq],
        rec: &SeqRecord,
        reg: Option<&AlignmentSet>,
    ) -> io::Result<()> {
        let Some(set) = reg else {
            if self.format == OutFormat::Sam {
                self.write_sam_unmapped(w, rec)?;
            }
            return Ok(());
        };

        for (i, e) in set.alns.iter().enumerate() {
            let secondary = i as u32 >= set.n_uniq;
            if secondary && self.omit_rep {
                continue;
            }
            for (si, seg) in e.aln.segs.iter().enumerate() {
                let supplementary = !secondary && (i > 0 || si > 0);
                match self.format {
                    OutFormat::Sam => self.write_sam(
                        w,
                        seqs,
                        rec,
                        set,
                        e.mapq,
                        &e.aln,
                        seg,
                        si,
                        i,
                        secondary,
                        supplementary,
                    )?,
                    OutFormat::Paf => self.write_paf(w, seqs, rec, e.mapq, &e.aln, seg, si)?,
                    OutFormat::Blast6 => self.write_blast6(w, seqs, rec, &e.aln, seg, si)?,
                    OutFormat::Maf => self.write_maf(w, seqs, rec, &e.aln, seg, si)?,
                }
            }
        }
        Ok(())
    }

    fn write_sam_unmapped<W: Write>(&self, w: &mut W, rec: &SeqRecord) -> io::Result<()> {
        let seq: String = rec.seq.iter().map(|&c| code_to_base(c) as char).collect();
        let qual = if rec.qual.is_empty() {
            "*".to_string()
        } else {
            String::from_utf8_lossy(&rec.qual).into_owned()
        };
        write!(
            w,
            "{}\t{}\t*\t0\t0\t*\t*\t0\t0\t{}\t{}",
            rec.name, SAM_UNMAPPED, seq, qual
        )?;
        if let Some(id) = self.rg_id() {
            write!(w, "\tRG:Z:{}", id)?;
        }
        writeln!(w)
    }

    /// Columns of the path belonging to segment `si`.
    fn seg_cigar(aln: &Alignment, si: usize) -> Vec<(u8, u32)> {
        let from = aln.segs[si].ppos;
        let to = aln
            .segs
            .get(si + 1)
            .map(|s| s.ppos)
            .unwrap_or_else(|| aln.columns());
        aln.cigar_slice(from, to)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_sam<W: Write>(
        &self,
        w: &mut W,
        seqs: &[RefSeq],
        rec: &SeqRecord,
        set: &AlignmentSet,
        mapq: u32,
        aln: &Alignment,
        seg: &Segment,
        si: usize,
        ent_idx: usize,
        secondary: bool,
        supplementary: bool,
    ) -> io::Result<()> {
        let qlen = rec.seq.len() as u32;
        let mut flag = 0u32;
        if seg.rev {
            flag |= SAM_REVERSE;
        }
        if secondary {
            flag |= SAM_SECONDARY;
        }
        if supplementary {
            flag |= SAM_SUPPLEMENTARY;
        }

        // Soft clips along the printed (strand-oriented) sequence.
        let (clip5, clip3) = if seg.rev {
            (qlen - seg.qs - seg.qlen, seg.qs)
        } else {
            (seg.qs, qlen - seg.qs - seg.qlen)
        };

        let mut cigar = String::new();
        if clip5 > 0 {
            cigar.push_str(&format!("{}S", clip5));
        }
        for (op, n) in Self::seg_cigar(aln, si) {
            let c = match op {
                OP_DEL => 'D',
                OP_INS => 'I',
                _ => 'M',
            };
            cigar.push_str(&format!("{}{}", n, c));
        }
        if clip3 > 0 {
            cigar.push_str(&format!("{}S", clip3));
        }

        let seq: String = if seg.rev {
            rec.seq
                .iter()
                .rev()
                .map(|&c| code_to_base(comp_code(c)) as char)
                .collect()
        } else {
            rec.seq.iter().map(|&c| code_to_base(c) as char).collect()
        };
        let qual = if rec.qual.is_empty() {
            "*".to_string()
        } else if seg.rev {
            rec.qual.iter().rev().map(|&q| q as char).collect()
        } else {
            String::from_utf8_lossy(&rec.qual).into_owned()
        };

        write!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}\t*\t0\t0\t{}\t{}",
            rec.name,
            flag,
            seqs[seg.rid as usize].name,
            seg.rs + 1,
            (mapq / MAPQ_COEF).min(60),
            cigar,
            seq,
            qual
        )?;
        let nm = aln.dcnt - aln.mcnt + aln.agcnt + aln.bgcnt;
        write!(
            w,
            "\tNM:i:{}\tAS:i:{}\tNH:i:{}\tIH:i:{}\tID:f:{:.4}",
            nm,
            aln.score,
            set.alns.len(),
            ent_idx,
            aln.identity
        )?;
        if let Some(id) = self.rg_id() {
            write!(w, "\tRG:Z:{}", id)?;
        }
        writeln!(w)
    }

    fn write_paf<W: Write>(
        &self,
        w: &mut W,
        seqs: &[RefSeq],
        rec: &SeqRecord,
        mapq: u32,
        aln: &Alignment,
        seg: &Segment,
        si: usize,
    ) -> io::Result<()> {
        let cols: u32 = Self::seg_cigar(aln, si).iter().map(|&(_, n)| n).sum();
        let nm = aln.dcnt - aln.mcnt + aln.agcnt + aln.bgcnt;
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\tAS:i:{}\tNM:i:{}",
            rec.name,
            rec.seq.len(),
            seg.qs,
            seg.qs + seg.qlen,
            if seg.rev { '-' } else { '+' },
            seqs[seg.rid as usize].name,
            seqs[seg.rid as usize].l_seq,
            seg.rs,
            seg.rs + seg.rlen,
            aln.mcnt,
            cols,
            (mapq / MAPQ_COEF).min(60),
            aln.score,
            nm
        )
    }

    fn write_blast6<W: Write>(
        &self,
        w: &mut W,
        seqs: &[RefSeq],
        rec: &SeqRecord,
        aln: &Alignment,
        seg: &Segment,
        si: usize,
    ) -> io::Result<()> {
        let cigar = Self::seg_cigar(aln, si);
        let cols: u32 = cigar.iter().map(|&(_, n)| n).sum();
        let gapopen = cigar
            .iter()
            .filter(|&&(op, _)| op == OP_DEL || op == OP_INS)
            .count();
        let mismatch = aln.dcnt - aln.mcnt;
        let bit = 1.85 * aln.score as f64;
        let evalue = (seqs[seg.rid as usize].l_seq as f64 * rec.seq.len() as f64)
            * 2f64.powf(-bit.min(1000.0));
        // 1-based, end-inclusive; reverse hits swap the query interval.
        let (qs, qe) = if seg.rev {
            (seg.qs + seg.qlen, seg.qs + 1)
        } else {
            (seg.qs + 1, seg.qs + seg.qlen)
        };
        writeln!(
            w,
            "{}\t{}\t{:.2}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.2e}\t{:.1}",
            rec.name,
            seqs[seg.rid as usize].name,
            100.0 * aln.identity,
            cols,
            mismatch,
            gapopen,
            qs,
            qe,
            seg.rs + 1,
            seg.rs + seg.rlen,
            evalue,
            bit
        )
    }

    fn write_maf<W: Write>(
        &self,
        w: &mut W,
        seqs: &[RefSeq],
        rec: &SeqRecord,
        aln: &Alignment,
        seg: &Segment,
        si: usize,
    ) -> io::Result<()> {
        let rref = &seqs[seg.rid as usize];
        let rbases = rref.bases();
        let cigar = Self::seg_cigar(aln, si);

        // Strand-oriented query codes covering this segment.
        let qcodes: Vec<u8> = if seg.rev {
            rec.seq.iter().rev().map(|&c| comp_code(c)).collect()
        } else {
            rec.seq.clone()
        };
        let qstart_view = if seg.rev {
            rec.seq.len() as u32 - seg.qs - seg.qlen
        } else {
            seg.qs
        };

        let mut rtext = String::new();
        let mut qtext = String::new();
        let mut ri = seg.rs as usize;
        let mut qi = qstart_view as usize;
        for (op, n) in cigar {
            for _ in 0..n {
                match op {
                    OP_DEL => {
                        rtext.push(code_to_base(rbases[ri]) as char);
                        qtext.push('-');
                        ri += 1;
                    }
                    OP_INS => {
                        rtext.push('-');
                        qtext.push(code_to_base(qcodes[qi]) as char);
                        qi += 1;
                    }
                    _ => {
                        rtext.push(code_to_base(rbases[ri]) as char);
                        qtext.push(code_to_base(qcodes[qi]) as char);
                        ri += 1;
                        qi += 1;
                    }
                }
            }
        }

        writeln!(w, "a score={}", aln.score)?;
        writeln!(
            w,
            "s {} {} {} + {} {}",
            rref.name, seg.rs, seg.rlen, rref.l_seq, rtext
        )?;
        writeln!(
            w,
            "s {} {} {} {} {} {}",
            rec.name,
            qstart_view,
            seg.qlen,
            if seg.rev { '-' } else { '+' },
            rec.seq.len(),
            qtext
        )?;
        writeln!(w)
    }
}
