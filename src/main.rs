use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use nanomap::index::MiniIndex;
use nanomap::mapper::Mapper;
use nanomap::opt::{IndexOpt, MapOpt, OutFormat};
use nanomap::pgzip::{PgReader, PgWriter};
use nanomap::seq::SeqReader;
use nanomap::utils::{fatal, realtime};

#[derive(Parser)]
#[command(name = "nanomap")]
#[command(about = "nanomap - minimizer-based long-read aligner for noisy PacBio/ONT reads", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a minimizer index for the reference
    Index {
        /// Input FASTA file
        #[arg(value_name = "REF.FA")]
        fasta: PathBuf,

        /// Output index file
        #[arg(short = 'o', long, value_name = "FILE", default_value = "ref.mai")]
        output: PathBuf,

        /// k-mer size
        #[arg(short = 'k', long, value_name = "INT", default_value = "15")]
        kmer: u32,

        /// Minimizer window size
        #[arg(short = 'w', long, value_name = "INT", default_value = "10")]
        window: u32,

        /// First-stage hash table bits
        #[arg(short = 'b', long, value_name = "INT", default_value = "14")]
        bucket_bits: u32,

        /// Occurrence-percentile fractions for the seed tiers
        #[arg(
            short = 'f',
            long,
            value_name = "FLOAT,...",
            default_value = "0.05,0.01,0.001"
        )]
        frq: String,

        /// Mark reference sequences circular (all when no names given)
        #[arg(short = 'L', long, value_name = "NAME", num_args = 0.., value_delimiter = ',')]
        circular: Option<Vec<String>>,

        /// Number of threads (default: all available cores)
        #[arg(short = 't', long, value_name = "INT")]
        threads: Option<usize>,

        /// Verbose level: 1=error, 2=warning, 3=message, 4+=debugging
        #[arg(short = 'v', long, value_name = "INT", default_value = "3")]
        verbosity: i32,
    },

    /// Map long reads onto an indexed or plain FASTA reference
    Map {
        /// Prebuilt index (.mai) or reference FASTA
        #[arg(value_name = "INDEX|REF.FA")]
        index: PathBuf,

        /// Input FASTA/FASTQ file(s)
        #[arg(value_name = "READS", required = true)]
        reads: Vec<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Output format: sam, maf, paf or blast6
        #[arg(short = 'O', long, value_name = "FMT", default_value = "sam")]
        format: String,

        /// All-versus-all overlap mode
        #[arg(short = 'X', long)]
        ava: bool,

        /// Omit secondary records from the output
        #[arg(short = 'Z', long)]
        omit_rep: bool,

        /// Minimum alignment score
        #[arg(short = 's', long, value_name = "INT", default_value = "50")]
        min_score: u32,

        /// Minimum score ratio against the best alignment
        #[arg(short = 'm', long, value_name = "FLOAT", default_value = "0.3")]
        min_ratio: f32,

        /// Match score
        #[arg(short = 'a', long, value_name = "INT", default_value = "1")]
        match_score: i8,

        /// Mismatch penalty
        #[arg(short = 'B', long, value_name = "INT", default_value = "1")]
        mismatch: i8,

        /// Gap open penalty
        #[arg(short = 'p', long, value_name = "INT", default_value = "1")]
        gap_open: i32,

        /// Gap extension penalty
        #[arg(short = 'q', long, value_name = "INT", default_value = "1")]
        gap_extend: i32,

        /// X-drop threshold
        #[arg(short = 'x', long, value_name = "INT", default_value = "50")]
        xdrop: i32,

        /// Chainable window edge length
        #[arg(short = 'W', long, value_name = "INT", default_value = "7000")]
        wlen: i32,

        /// Linkable gap length for in-chain rescue
        #[arg(short = 'G', long, value_name = "INT", default_value = "7000")]
        glen: i32,

        /// Read group header line such as '@RG\tID:foo\tSM:bar'
        #[arg(short = 'R', long, value_name = "STR")]
        read_group: Option<String>,

        /// k-mer size for on-the-fly index construction
        #[arg(short = 'k', long, value_name = "INT", default_value = "15")]
        kmer: u32,

        /// Minimizer window size for on-the-fly index construction
        #[arg(short = 'w', long, value_name = "INT", default_value = "10")]
        window: u32,

        /// Number of threads (default: all available cores)
        #[arg(short = 't', long, value_name = "INT")]
        threads: Option<usize>,

        /// Verbose level: 1=error, 2=warning, 3=message, 4+=debugging
        #[arg(short = 'v', long, value_name = "INT", default_value = "3")]
        verbosity: i32,
    },
}

fn init_logger(verbosity: i32) {
    let log_level = match verbosity {
        v if v <= 1 => log::LevelFilter::Error,
        2 => log::LevelFilter::Warn,
        3 => log::LevelFilter::Info,
        4 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn resolve_threads(threads: Option<usize>) -> usize {
    let mut nth = threads.unwrap_or_else(num_cpus::get);
    if nth < 1 {
        log::warn!("invalid thread count {}, using 1 thread", nth);
        nth = 1;
    }
    let max_threads = num_cpus::get() * 2;
    if nth > max_threads {
        log::warn!(
            "thread count {} exceeds recommended maximum {}, capping",
            nth,
            max_threads
        );
        nth = max_threads;
    }
    nth
}

fn parse_frq(s: &str) -> Result<Vec<f64>, String> {
    let vals: Result<Vec<f64>, _> = s.split(',').map(|t| t.trim().parse::<f64>()).collect();
    match vals {
        Ok(v) if !v.is_empty() && v.len() <= 7 => Ok(v),
        Ok(_) => Err("between 1 and 7 occurrence fractions required".to_string()),
        Err(e) => Err(format!("invalid occurrence fraction list: {}", e)),
    }
}

/// A prebuilt index starts with the block-stream magic.
fn is_prebuilt(path: &Path) -> io::Result<bool> {
    let mut f = File::open(path)?;
    let mut magic = [0u8; 4];
    if f.read_exact(&mut magic).is_err() {
        return Ok(false);
    }
    Ok(&magic == b"PG00")
}

fn load_or_build_index(
    path: &Path,
    iopt: &IndexOpt,
    nth: usize,
) -> io::Result<MiniIndex> {
    if is_prebuilt(path)? {
        log::info!("loading prebuilt index: {}", path.display());
        let file = BufReader::new(File::open(path)?);
        let mut pg = PgReader::new(file, nth);
        return MiniIndex::load(&mut pg);
    }
    log::info!("building index from reference: {}", path.display());
    let t0 = realtime();
    let mut reader = SeqReader::open(path)?;
    let idx = MiniIndex::build(iopt, &mut reader, nth)?;
    log::info!(
        "indexed {} sequences in {:.2} s",
        idx.n_seq(),
        realtime() - t0
    );
    Ok(idx)
}

fn run_index(
    fasta: &Path,
    output: &Path,
    iopt: &IndexOpt,
    nth: usize,
) -> io::Result<()> {
    let t0 = realtime();
    let mut reader = SeqReader::open(fasta)?;
    let idx = MiniIndex::build(iopt, &mut reader, nth)?;
    log::info!(
        "indexed {} sequences in {:.2} s",
        idx.n_seq(),
        realtime() - t0
    );

    let file = BufWriter::new(File::create(output)?);
    let mut pg = PgWriter::new(file, nth);
    idx.dump(&mut pg)?;
    pg.finish()?;
    log::info!("wrote index: {}", output.display());
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Index {
            fasta,
            output,
            kmer,
            window,
            bucket_bits,
            frq,
            circular,
            threads,
            verbosity,
        } => {
            init_logger(verbosity);
            let frq = parse_frq(&frq).unwrap_or_else(|e| fatal(e));
            let iopt = IndexOpt {
                k: kmer,
                w: window,
                b: bucket_bits,
                frq,
                circular,
            };
            let nth = resolve_threads(threads);
            if let Err(e) = run_index(&fasta, &output, &iopt, nth) {
                fatal(format!("index construction failed: {}", e));
            }
        }

        Commands::Map {
            index,
            reads,
            output,
            format,
            ava,
            omit_rep,
            min_score,
            min_ratio,
            match_score,
            mismatch,
            gap_open,
            gap_extend,
            xdrop,
            wlen,
            glen,
            read_group,
            kmer,
            window,
            threads,
            verbosity,
        } => {
            init_logger(verbosity);
            let format: OutFormat = format.parse().unwrap_or_else(|e| fatal(e));
            let nth = resolve_threads(threads);

            let iopt = IndexOpt {
                k: kmer,
                w: window,
                ..IndexOpt::default()
            };
            let idx = load_or_build_index(&index, &iopt, nth).unwrap_or_else(|e| {
                fatal(format!("failed to load index {}: {}", index.display(), e))
            });

            let opt = MapOpt {
                wlen,
                glen,
                min_score,
                min_ratio,
                match_score,
                mismatch,
                gi: gap_open,
                ge: gap_extend,
                xdrop,
                ava,
                omit_rep,
                format,
                n_threads: nth,
                read_group,
                verbosity,
                ..MapOpt::default()
            };

            let mut writer: Box<dyn Write> = match &output {
                Some(path) => {
                    let file = File::create(path).unwrap_or_else(|e| {
                        fatal(format!("cannot create {}: {}", path.display(), e))
                    });
                    Box::new(BufWriter::new(file))
                }
                None => Box::new(BufWriter::new(io::stdout())),
            };

            let mapper = Mapper::new(&idx, &opt);
            if let Err(e) = mapper.write_header(&mut writer) {
                fatal(format!("write error: {}", e));
            }
            let mut qid = 0u32;
            for path in &reads {
                qid = mapper.map_file(path, &mut writer, qid).unwrap_or_else(|e| {
                    fatal(format!("mapping {} failed: {}", path.display(), e))
                });
            }
            if let Err(e) = writer.flush() {
                fatal(format!("write error: {}", e));
            }
        }
    }
}
