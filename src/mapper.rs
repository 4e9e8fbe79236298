// nanomap/src/mapper.rs
//
// Query-side mapping pipeline: the source reads record batches on the
// calling thread, every worker owns a MapBuffer and maps its batch, and the
// in-order drain prints through the configured formatter. Output order
// therefore always matches input order, independent of thread count.

use std::io::{self, Write};
use std::path::Path;

use crate::format::Printer;
use crate::index::MiniIndex;
use crate::map::{AlignEngine, AlignmentSet, MapBuffer};
use crate::opt::MapOpt;
use crate::ptask::run_pipeline;
use crate::seq::{SeqBatch, SeqReader};
use crate::utils::{cputime, realtime};

struct MapTask {
    batch: SeqBatch,
    base_qid: u32,
    results: Vec<Option<AlignmentSet>>,
}

pub struct Mapper<'a> {
    engine: AlignEngine<'a>,
    opt: &'a MapOpt,
    printer: Printer,
}

impl<'a> Mapper<'a> {
    pub fn new(idx: &'a MiniIndex, opt: &'a MapOpt) -> Mapper<'a> {
        Mapper {
            engine: AlignEngine::new(idx, opt),
            opt,
            printer: Printer::new(opt),
        }
    }

    pub fn write_header<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.printer.write_header(out, self.engine.idx.seqs())
    }

    /// Map every record of `path`, emitting records in input order.
    /// `base_qid` is the id of the first record; the id of the next unread
    /// record is returned so several files share one id space.
    pub fn map_file<W: Write>(
        &self,
        path: &Path,
        out: &mut W,
        base_qid: u32,
    ) -> io::Result<u32> {
        let t0 = realtime();
        let c0 = cputime();
        let mut reader = SeqReader::open(path)?;
        let mut next_qid = base_qid;
        let mut n_reads = 0u64;
        let mut n_mapped = 0u64;
        let mut read_err: Option<io::Error> = None;
        let mut write_err: Option<io::Error> = None;

        {
            let reader = &mut reader;
            let next_qid = &mut next_qid;
            let read_err = &mut read_err;
            let write_err = &mut write_err;
            let n_reads = &mut n_reads;
            let n_mapped = &mut n_mapped;
            let engine = &self.engine;
            let printer = &self.printer;
            let batch_bases = self.opt.batch_bases;
            let seqs = engine.idx.seqs();
            let out = &mut *out;

            run_pipeline(
                self.opt.n_threads,
                move || match reader.read_batch(batch_bases) {
                    Ok(batch) if batch.is_empty() => None,
                    Ok(batch) => {
                        let base_qid = *next_qid;
                        *next_qid += batch.len() as u32;
                        Some(MapTask {
                            batch,
                            base_qid,
                            results: Vec::new(),
                        })
                    }
                    Err(e) => {
                        *read_err = Some(e);
                        None
                    }
                },
                |_tid| {
                    let engine = engine;
                    let mut buf = MapBuffer::default();
                    move |mut task: MapTask| {
                        task.results = task
                            .batch
                            .records
                            .iter()
                            .enumerate()
                            .map(|(i, rec)| {
                                engine.align(&mut buf, &rec.seq, task.base_qid + i as u32)
                            })
                            .collect();
                        task
                    }
                },
                |task: MapTask| {
                    if write_err.is_some() {
                        return;
                    }
                    for (rec, reg) in task.batch.records.iter().zip(task.results.iter()) {
                        *n_reads += 1;
                        *n_mapped += reg.is_some() as u64;
                        if let Err(e) = printer.write_mapped(out, seqs, rec, reg.as_ref()) {
                            *write_err = Some(e);
                            return;
                        }
                    }
                },
            );
        }
        if let Some(e) = read_err {
            return Err(e);
        }
        if let Some(e) = write_err {
            return Err(e);
        }

        log::info!(
            "mapped {} / {} reads from {} in {:.2} s ({:.2} s CPU)",
            n_mapped,
            n_reads,
            path.display(),
            realtime() - t0,
            cputime() - c0
        );
        Ok(next_qid)
    }
}
