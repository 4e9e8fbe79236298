// nanomap/src/ptask.rs
//
// Streaming pipeline over a fixed pool of worker threads. The source and the
// drain both run on the calling thread; workers pull batches from a bounded
// input queue and push results to a bounded output queue. Batches carry
// monotone ids and the drain reorders completions through a min-heap, so
// output order always equals source order regardless of worker scheduling.
//
// Backpressure: the source keeps the number of in-flight batches inside
// [2*nth, 8*nth]. When the window is full the calling thread drains finished
// batches and, if none are ready, steals one batch from the input queue and
// processes it locally.

use crossbeam_channel::{RecvTimeoutError, bounded};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

#[path = "ptask_test.rs"]
mod ptask_test;

/// Poll interval while a queue is empty.
const PT_BACKOFF: Duration = Duration::from_micros(512);

struct Seq<I> {
    id: u64,
    item: I,
}

impl<I> PartialEq for Seq<I> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl<I> Eq for Seq<I> {}
impl<I> PartialOrd for Seq<I> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<I> Ord for Seq<I> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

/// Run a source -> worker -> drain stream over `nth` threads.
///
/// `make_worker(tid)` is invoked once per worker thread (tid 1..=nth) and once
/// lazily on the calling thread (tid 0) when it has to process a batch
/// locally; the returned closure owns any thread-local buffers. With
/// `nth <= 1` everything runs inline on the calling thread.
pub fn run_pipeline<I, S, WF, W, D>(nth: usize, mut source: S, make_worker: WF, mut drain: D)
where
    I: Send,
    S: FnMut() -> Option<I>,
    WF: Fn(usize) -> W + Sync,
    W: FnMut(I) -> I,
    D: FnMut(I),
{
    if nth <= 1 {
        let mut work = make_worker(0);
        while let Some(item) = source() {
            drain(work(item));
        }
        return;
    }

    let lb = (2 * nth) as u64;
    let ub = (8 * nth) as u64;
    let (in_tx, in_rx) = bounded::<Seq<I>>(ub as usize);
    let (out_tx, out_rx) = bounded::<Seq<I>>(ub as usize);

    std::thread::scope(|scope| {
        for tid in 1..=nth {
            let in_rx = in_rx.clone();
            let out_tx = out_tx.clone();
            let make_worker = &make_worker;
            scope.spawn(move || {
                let mut work = make_worker(tid);
                while let Ok(task) = in_rx.recv() {
                    let done = Seq {
                        id: task.id,
                        item: work(task.item),
                    };
                    if out_tx.send(done).is_err() {
                        break;
                    }
                }
            });
        }
        drop(out_tx); // workers hold the remaining senders

        let mut heap: BinaryHeap<Reverse<Seq<I>>> = BinaryHeap::new();
        let mut local_work: Option<W> = None;
        let mut icnt = 0u64; // batches produced
        let mut ocnt = 0u64; // next id to emit
        let mut bal = 0u64; // in-flight batches

        while let Some(item) = source() {
            in_tx
                .send(Seq { id: icnt, item })
                .expect("pipeline input queue closed");
            icnt += 1;
            bal += 1;
            if bal < ub {
                continue;
            }

            // Window full: drain completions, processing locally if starved.
            while bal > lb {
                let mut progressed = false;
                while let Ok(done) = out_rx.try_recv() {
                    heap.push(Reverse(done));
                    progressed = true;
                }
                while heap.peek().map(|Reverse(s)| s.id) == Some(ocnt) {
                    let Reverse(done) = heap.pop().unwrap();
                    drain(done.item);
                    ocnt += 1;
                    bal -= 1;
                }
                if bal <= lb {
                    break;
                }
                if let Ok(task) = in_rx.try_recv() {
                    let work = local_work.get_or_insert_with(|| make_worker(0));
                    heap.push(Reverse(Seq {
                        id: task.id,
                        item: work(task.item),
                    }));
                    progressed = true;
                }
                if !progressed {
                    std::thread::sleep(PT_BACKOFF);
                }
            }
        }

        // Source depleted: close the input queue and flush the remainder.
        drop(in_tx);
        let mut disconnected = false;
        while bal > 0 {
            if !disconnected {
                match out_rx.recv_timeout(PT_BACKOFF) {
                    Ok(done) => heap.push(Reverse(done)),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => disconnected = true,
                }
            }
            while heap.peek().map(|Reverse(s)| s.id) == Some(ocnt) {
                let Reverse(done) = heap.pop().unwrap();
                drain(done.item);
                ocnt += 1;
                bal -= 1;
            }
            debug_assert!(!(disconnected && bal > 0 && heap.is_empty()));
        }
    });
}

/// Run `work(tid)` once on every thread of a pool of `nth` (tid 0 runs on the
/// calling thread). Used for bucket-parallel index passes where the work is
/// partitioned by thread id rather than streamed.
pub fn run_parallel<WF>(nth: usize, work: WF)
where
    WF: Fn(usize) + Sync,
{
    if nth <= 1 {
        work(0);
        return;
    }
    std::thread::scope(|scope| {
        for tid in 1..nth {
            let work = &work;
            scope.spawn(move || work(tid));
        }
        work(0);
    });
}
