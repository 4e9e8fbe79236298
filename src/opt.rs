// nanomap/src/opt.rs
//
// Option structures for index construction and mapping, with the long-read
// defaults applied when nothing is overridden on the command line.

use crate::dp::ScoreParams;

/// Output format selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutFormat {
    Sam,
    Maf,
    Paf,
    Blast6,
}

impl std::str::FromStr for OutFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sam" => Ok(OutFormat::Sam),
            "maf" => Ok(OutFormat::Maf),
            "paf" => Ok(OutFormat::Paf),
            "blast6" => Ok(OutFormat::Blast6),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

/// Index construction parameters.
#[derive(Debug, Clone)]
pub struct IndexOpt {
    pub k: u32,
    pub w: u32,
    /// First-stage bucket bits; clipped to 2k at build time.
    pub b: u32,
    /// Occurrence-percentile fractions, most permissive tier last.
    pub frq: Vec<f64>,
    /// Circular reference names; `Some(empty)` marks every sequence circular.
    pub circular: Option<Vec<String>>,
}

impl Default for IndexOpt {
    fn default() -> Self {
        IndexOpt {
            k: 15,
            w: 10,
            b: 14,
            frq: vec![0.05, 0.01, 0.001],
            circular: None,
        }
    }
}

/// Mapping parameters.
#[derive(Debug, Clone)]
pub struct MapOpt {
    // Chaining
    /// Linear chainable window; the (u,v)-space edge is twice this.
    pub wlen: i32,
    /// Linear linkable gap for the next-seed search.
    pub glen: i32,

    // Extension and filtering
    pub min_score: u32,
    pub min_ratio: f32,
    pub match_score: i8,
    pub mismatch: i8,
    pub gi: i32,
    pub ge: i32,
    pub xdrop: i32,

    // Modes
    /// All-versus-all overlap mode: skip seed pairs with ref id below the
    /// query id and switch the mapq estimator.
    pub ava: bool,
    /// Suppress secondary records at output time.
    pub omit_rep: bool,
    pub format: OutFormat,

    // Processing
    pub n_threads: usize,
    pub batch_bases: usize,

    // Output decoration
    pub read_group: Option<String>,
    pub verbosity: i32,
}

impl Default for MapOpt {
    fn default() -> Self {
        MapOpt {
            wlen: 7000,
            glen: 7000,
            min_score: 50,
            min_ratio: 0.3,
            match_score: 1,
            mismatch: 1,
            gi: 1,
            ge: 1,
            xdrop: 50,
            ava: false,
            omit_rep: false,
            format: OutFormat::Sam,
            n_threads: 1,
            batch_bases: 512 * 1024,
            read_group: None,
            verbosity: 3,
        }
    }
}

impl MapOpt {
    pub fn score_params(&self) -> ScoreParams {
        ScoreParams::simple(self.match_score, self.mismatch, self.gi, self.ge, self.xdrop)
    }
}
