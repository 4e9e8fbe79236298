// nanomap/src/utils.rs

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, stdin};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

#[path = "utils_test.rs"]
mod utils_test;

/// Process exit code for out-of-memory aborts; other fatal errors exit with 1.
pub const EX_OOM: i32 = 128;

/// Wall-clock seconds since the epoch.
pub fn realtime() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn rusage_self() -> libc::rusage {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::uninit();
    unsafe {
        libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr());
        usage.assume_init()
    }
}

/// User plus system CPU seconds consumed so far.
pub fn cputime() -> f64 {
    let usage = rusage_self();
    let secs = |tv: libc::timeval| tv.tv_sec as f64 + tv.tv_usec as f64 * 1e-6;
    secs(usage.ru_utime) + secs(usage.ru_stime)
}

/// Peak resident set size in bytes (ru_maxrss is in KiB on Linux).
pub fn peak_rss() -> u64 {
    (rusage_self().ru_maxrss as u64) * 1024
}

/// Log an unrecoverable error and terminate.
pub fn fatal<S: AsRef<str>>(msg: S) -> ! {
    log::error!("{}", msg.as_ref());
    std::process::exit(1);
}

/// Fatal allocation failure: log the requested size and peak RSS, then exit
/// with the OOM code.
pub fn oom_abort<S: AsRef<str>>(func: S, requested: usize) -> ! {
    log::error!(
        "[{}] out of memory, requested {} bytes, peak RSS {} bytes",
        func.as_ref(),
        requested,
        peak_rss()
    );
    std::process::exit(EX_OOM);
}

/// Grow a vector or die with the OOM exit code.
pub fn reserve_or_abort<T>(v: &mut Vec<T>, additional: usize, func: &str) {
    if v.try_reserve(additional).is_err() {
        oom_abort(func, additional * std::mem::size_of::<T>());
    }
}

/// Open an input file for reading, decompressing gzip transparently (the
/// format is sniffed from the two magic bytes, not the file name). "-" reads
/// standard input.
pub fn open_input(path: &Path) -> io::Result<Box<dyn Read>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(stdin().lock())); // already buffered
    }
    let mut file = BufReader::new(File::open(path)?);
    let head = file.fill_buf()?;
    if head.starts_with(&[0x1f, 0x8b]) {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// k-th smallest element (0-based) by in-place quickselect, used for the
/// occurrence-percentile thresholds. The slice is reordered.
pub fn ks_ksmall_u32(a: &mut [u32], k: usize) -> u32 {
    assert!(k < a.len());
    let (mut lo, mut hi) = (0isize, a.len() as isize - 1);
    while lo < hi {
        let pivot = a[((lo + hi) / 2) as usize];
        let (mut i, mut j) = (lo - 1, hi + 1);
        loop {
            i += 1;
            while a[i as usize] < pivot {
                i += 1;
            }
            j -= 1;
            while a[j as usize] > pivot {
                j -= 1;
            }
            if i >= j {
                break;
            }
            a.swap(i as usize, j as usize);
        }
        if (k as isize) <= j {
            hi = j;
        } else {
            lo = j + 1;
        }
    }
    a[k]
}
