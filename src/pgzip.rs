// nanomap/src/pgzip.rs
//
// Framed deflate stream used for prebuilt index files. The payload is cut
// into 1 MiB blocks, each stored as `PG00 | len[u32 le] | deflated bytes`;
// a length of 0xFFFFFFFF terminates the stream. Compression and
// decompression fan out over a small worker pool; blocks are re-sequenced by
// id on the serial side so the produced byte stream is identical for any
// worker count.

use crossbeam_channel::{Receiver, Sender, bounded};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io::{self, Read, Write};
use std::thread::JoinHandle;

#[path = "pgzip_test.rs"]
mod pgzip_test;

const PG_MAGIC: &[u8; 4] = b"PG00";
const PG_BLOCK_SIZE: usize = 1024 * 1024;
const PG_TERM: u32 = 0xffff_ffff;

struct Block {
    id: u64,
    buf: io::Result<Vec<u8>>,
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Block {}
impl PartialOrd for Block {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Block {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

fn deflate_block(raw: &[u8]) -> io::Result<Vec<u8>> {
    let mut enc = ZlibEncoder::new(
        Vec::with_capacity(raw.len() / 2 + 64),
        Compression::fast(),
    );
    enc.write_all(raw)?;
    enc.finish()
}

fn inflate_block(comp: &[u8]) -> io::Result<Vec<u8>> {
    let mut dec = ZlibDecoder::new(comp);
    let mut out = Vec::with_capacity(PG_BLOCK_SIZE);
    dec.read_to_end(&mut out).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidData, "corrupt deflate block")
    })?;
    Ok(out)
}

fn spawn_workers(
    nth: usize,
    compress: bool,
) -> (Sender<Block>, Receiver<Block>, Vec<JoinHandle<()>>) {
    let (in_tx, in_rx) = bounded::<Block>(3 * nth);
    let (out_tx, out_rx) = bounded::<Block>(3 * nth);
    let mut threads = Vec::with_capacity(nth);
    for _ in 0..nth {
        let in_rx = in_rx.clone();
        let out_tx = out_tx.clone();
        threads.push(std::thread::spawn(move || {
            while let Ok(block) = in_rx.recv() {
                let buf = match block.buf {
                    Ok(raw) => {
                        if compress {
                            deflate_block(&raw)
                        } else {
                            inflate_block(&raw)
                        }
                    }
                    Err(e) => Err(e),
                };
                if out_tx.send(Block { id: block.id, buf }).is_err() {
                    break;
                }
            }
        }));
    }
    (in_tx, out_rx, threads)
}

/// Parallel deflate writer. `finish` must be called to emit the terminator.
pub struct PgWriter<W: Write> {
    out: W,
    nth: usize,
    buf: Vec<u8>,
    icnt: u64,
    ocnt: u64,
    bal: usize,
    in_tx: Option<Sender<Block>>,
    out_rx: Option<Receiver<Block>>,
    heap: BinaryHeap<Reverse<Block>>,
    threads: Vec<JoinHandle<()>>,
}

impl<W: Write> PgWriter<W> {
    pub fn new(out: W, nth: usize) -> Self {
        let (in_tx, out_rx, threads) = if nth > 1 {
            let (tx, rx, th) = spawn_workers(nth, true);
            (Some(tx), Some(rx), th)
        } else {
            (None, None, Vec::new())
        };
        PgWriter {
            out,
            nth,
            buf: Vec::with_capacity(PG_BLOCK_SIZE),
            icnt: 0,
            ocnt: 0,
            bal: 0,
            in_tx,
            out_rx,
            heap: BinaryHeap::new(),
            threads,
        }
    }

    fn write_frame(out: &mut W, comp: &[u8]) -> io::Result<()> {
        out.write_all(PG_MAGIC)?;
        out.write_all(&(comp.len() as u32).to_le_bytes())?;
        out.write_all(comp)
    }

    /// Emit every heap block that is next in sequence.
    fn flush_ordered(&mut self) -> io::Result<()> {
        while self.heap.peek().map(|Reverse(b)| b.id) == Some(self.ocnt) {
            let Reverse(block) = self.heap.pop().expect("peeked");
            Self::write_frame(&mut self.out, &block.buf?)?;
            self.ocnt += 1;
            self.bal -= 1;
        }
        Ok(())
    }

    fn submit_block(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let raw = std::mem::replace(&mut self.buf, Vec::with_capacity(PG_BLOCK_SIZE));
        if self.nth <= 1 {
            let comp = deflate_block(&raw)?;
            return Self::write_frame(&mut self.out, &comp);
        }

        let id = self.icnt;
        self.icnt += 1;
        self.bal += 1;
        self.in_tx
            .as_ref()
            .expect("writer queues alive")
            .send(Block { id, buf: Ok(raw) })
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "compressor pool gone"))?;

        // Keep the in-flight window bounded; collect whatever is ready.
        let out_rx = self.out_rx.as_ref().expect("writer queues alive").clone();
        while let Ok(block) = out_rx.try_recv() {
            self.heap.push(Reverse(block));
        }
        while self.bal > 2 * self.nth {
            match out_rx.recv() {
                Ok(block) => self.heap.push(Reverse(block)),
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "compressor pool gone",
                    ));
                }
            }
            self.flush_ordered()?;
        }
        self.flush_ordered()
    }

    /// Compress and write everything buffered, emit the stream terminator and
    /// return the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.submit_block()?;
        drop(self.in_tx.take());
        if let Some(out_rx) = self.out_rx.take() {
            while self.bal > 0 {
                match out_rx.recv() {
                    Ok(block) => self.heap.push(Reverse(block)),
                    Err(_) => break,
                }
                self.flush_ordered()?;
            }
        }
        for th in self.threads.drain(..) {
            let _ = th.join();
        }
        self.out.write_all(PG_MAGIC)?;
        self.out.write_all(&PG_TERM.to_le_bytes())?;
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> Write for PgWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut rem = data;
        while !rem.is_empty() {
            let room = PG_BLOCK_SIZE - self.buf.len();
            let take = room.min(rem.len());
            self.buf.extend_from_slice(&rem[..take]);
            rem = &rem[take..];
            if self.buf.len() == PG_BLOCK_SIZE {
                self.submit_block()?;
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // Frames are only cut at block boundaries or at finish; nothing to do
        // here beyond passing the request down.
        self.out.flush()
    }
}

/// Parallel inflate reader over a `PG00` framed stream.
pub struct PgReader<R: Read> {
    inp: R,
    nth: usize,
    icnt: u64,
    ocnt: u64,
    bal: usize,
    in_tx: Option<Sender<Block>>,
    out_rx: Option<Receiver<Block>>,
    heap: BinaryHeap<Reverse<Block>>,
    cur: Vec<u8>,
    cur_pos: usize,
    term_seen: bool,
    threads: Vec<JoinHandle<()>>,
}

impl<R: Read> PgReader<R> {
    pub fn new(inp: R, nth: usize) -> Self {
        let (in_tx, out_rx, threads) = if nth > 1 {
            let (tx, rx, th) = spawn_workers(nth, false);
            (Some(tx), Some(rx), th)
        } else {
            (None, None, Vec::new())
        };
        PgReader {
            inp,
            nth,
            icnt: 0,
            ocnt: 0,
            bal: 0,
            in_tx,
            out_rx,
            heap: BinaryHeap::new(),
            cur: Vec::new(),
            cur_pos: 0,
            term_seen: false,
            threads,
        }
    }

    /// Read one frame; Ok(None) on the terminator.
    fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut magic = [0u8; 4];
        self.inp.read_exact(&mut magic)?;
        if &magic != PG_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad block magic in compressed stream",
            ));
        }
        let mut len_buf = [0u8; 4];
        self.inp.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf);
        if len == PG_TERM {
            return Ok(None);
        }
        let mut comp = vec![0u8; len as usize];
        self.inp.read_exact(&mut comp)?;
        Ok(Some(comp))
    }

    /// Fetch the next inflated block in stream order, or None at EOF.
    fn next_block(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.nth <= 1 {
            match self.read_frame()? {
                None => return Ok(None),
                Some(comp) => return inflate_block(&comp).map(Some),
            }
        }

        // Top up the prefetch window.
        while !self.term_seen && self.bal < 3 * self.nth {
            match self.read_frame()? {
                None => self.term_seen = true,
                Some(comp) => {
                    let id = self.icnt;
                    self.icnt += 1;
                    self.bal += 1;
                    self.in_tx
                        .as_ref()
                        .expect("reader queues alive")
                        .send(Block { id, buf: Ok(comp) })
                        .map_err(|_| {
                            io::Error::new(io::ErrorKind::BrokenPipe, "inflater pool gone")
                        })?;
                }
            }
        }
        if self.bal == 0 {
            return Ok(None);
        }

        // Wait for the next-in-order block.
        let out_rx = self.out_rx.as_ref().expect("reader queues alive").clone();
        loop {
            if self.heap.peek().map(|Reverse(b)| b.id) == Some(self.ocnt) {
                let Reverse(block) = self.heap.pop().expect("peeked");
                self.ocnt += 1;
                self.bal -= 1;
                return block.buf.map(Some);
            }
            match out_rx.recv() {
                Ok(block) => self.heap.push(Reverse(block)),
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "inflater pool gone",
                    ));
                }
            }
        }
    }
}

impl<R: Read> Read for PgReader<R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0usize;
        while filled < dst.len() {
            if self.cur_pos == self.cur.len() {
                match self.next_block()? {
                    None => break,
                    Some(block) => {
                        self.cur = block;
                        self.cur_pos = 0;
                    }
                }
            }
            let take = (dst.len() - filled).min(self.cur.len() - self.cur_pos);
            dst[filled..filled + take]
                .copy_from_slice(&self.cur[self.cur_pos..self.cur_pos + take]);
            filled += take;
            self.cur_pos += take;
        }
        Ok(filled)
    }
}

impl<R: Read> Drop for PgReader<R> {
    fn drop(&mut self) {
        drop(self.in_tx.take());
        drop(self.out_rx.take());
        for th in self.threads.drain(..) {
            let _ = th.join();
        }
    }
}
