pub mod chain;
pub mod dp;
pub mod format;
pub mod index;
pub mod khash;
pub mod map;
pub mod mapper;
pub mod opt;
pub mod pgzip; // framed parallel deflate stream for prebuilt indices
pub mod ptask; // source -> worker -> drain pipeline with in-order output
pub mod seq; // FASTA/FASTQ input and base code tables
pub mod sketch;
pub mod utils;
