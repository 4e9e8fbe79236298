// nanomap/src/index_test.rs

#[cfg(test)]
mod tests {
    use crate::index::*;
    use crate::opt::IndexOpt;
    use crate::seq::SeqReader;
    use crate::sketch::{MinimizerIter, sketch_all};
    use std::collections::HashMap;
    use std::fs;
    use std::io::Cursor;

    fn build_from_fasta(content: &str, opt: &IndexOpt, nth: usize) -> MiniIndex {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.fa");
        fs::write(&path, content).unwrap();
        let mut rd = SeqReader::open(&path).unwrap();
        MiniIndex::build(opt, &mut rd, nth).unwrap()
    }

    fn kmer_hash(kmer: &[u8], k: u32) -> u64 {
        let mask = (1u64 << (2 * k)) - 1;
        let mut fw = 0u64;
        let mut rv = 0u64;
        for (j, &b) in kmer.iter().enumerate() {
            let c = (crate::seq::base_to_code(b) & 3) as u64;
            fw = (fw << 2) | c;
            rv |= (3 ^ c) << (2 * j);
        }
        let km = fw.min(rv);
        (crc32fast::hash(&km.to_le_bytes()) as u64 ^ km) & mask
    }

    #[test]
    fn test_single_hit_lookup() {
        let opt = IndexOpt {
            k: 5,
            w: 1,
            ..IndexOpt::default()
        };
        let idx = build_from_fasta(">r\nAAAAACCCCCGGGGGTTTTT\n", &opt, 1);
        assert_eq!(idx.n_seq(), 1);
        assert_eq!(idx.seq(0).l_seq, 20);

        // ACCCC occurs at position 4 forward; its canonical twin GGGGT sits
        // at position 11 on the other strand.
        let h = kmer_hash(b"ACCCC", 5);
        let hits = idx.get(h);
        let got: Vec<(u32, u32, u32)> = hits
            .iter()
            .map(|v| (val_pos(v), val_rid_s(v) >> 1, val_rid_s(v) & 1))
            .collect();
        assert!(got.contains(&(4, 0, 0)), "hits: {:?}", got);
        for &(_, rid, _) in &got {
            assert_eq!(rid, 0);
        }
    }

    #[test]
    fn test_lookup_counts_match_sketch() {
        // Invariant: for every minimizer of the reference that survives the
        // occurrence filter, lookup returns its true hit count.
        let seq = b"ATTTAGCGGGCAATTCGCATCAGCATTTTTGGGCACGATTACGCGCTTTAGAGAGACAATTGCCGCAT";
        let opt = IndexOpt {
            k: 7,
            w: 4,
            ..IndexOpt::default()
        };
        let idx = build_from_fasta(&format!(">r\n{}\n", std::str::from_utf8(seq).unwrap()), &opt, 1);

        let codes = crate::seq::encode_seq(seq);
        let mins = sketch_all(&codes, 4, 7);
        let mut truth: HashMap<u64, Vec<u32>> = HashMap::new();
        for m in MinimizerIter::new(&mins, 4) {
            truth.entry(m.hash).or_default().push(m.pos);
        }
        for (hash, posns) in &truth {
            if posns.len() as u32 > idx.max_occ() {
                continue;
            }
            let hits = idx.get(*hash);
            assert_eq!(hits.len(), posns.len(), "hash {:#x}", hash);
            let mut got: Vec<u32> = hits.iter().map(val_pos).collect();
            got.sort_unstable();
            let mut want = posns.clone();
            want.sort_unstable();
            assert_eq!(got, want);
        }
    }

    #[test]
    fn test_multi_sequence_ids() {
        let opt = IndexOpt {
            k: 5,
            w: 2,
            ..IndexOpt::default()
        };
        let idx = build_from_fasta(
            ">a\nACGGATCGGCATTTAGCGCAT\n>b\nTTGCACGGATAACCGCGGCAA\n",
            &opt,
            2,
        );
        assert_eq!(idx.n_seq(), 2);
        assert_eq!(idx.seq(0).name, "a");
        assert_eq!(idx.seq(1).name, "b");
        assert!(!idx.seq(0).circular);

        // Every stored hit must reference one of the two sequences and lie
        // inside it.
        for rid in 0..2u32 {
            let s = idx.seq(rid);
            assert_eq!(s.bases().len(), s.l_seq as usize);
        }
    }

    #[test]
    fn test_circular_flag_and_wrap_minimizers() {
        let opt = IndexOpt {
            k: 5,
            w: 3,
            circular: Some(vec!["c".to_string()]),
            ..IndexOpt::default()
        };
        let idx = build_from_fasta(
            ">c\nACGGATCGGCATTTAGCGCATCCGGATTACA\n>l\nACGGATCGGCATTTAGCGCATCCGGATTACA\n",
            &opt,
            1,
        );
        assert!(idx.seq(0).circular);
        assert!(!idx.seq(1).circular);

        // The circular copy indexes strictly more positions (wrap windows).
        // Count indexed hits per sequence via its own sketch.
        let count = |rid: u32| -> usize {
            let mut n = 0;
            let codes = idx.seq(rid).bases().to_vec();
            let mins = sketch_all(&codes, 3, 5);
            let mut seen = std::collections::HashSet::new();
            for m in MinimizerIter::new(&mins, 3) {
                seen.insert(m.hash);
            }
            for hsh in seen {
                for v in idx.get(hsh).iter() {
                    if val_rid_s(v) >> 1 == rid {
                        n += 1;
                    }
                }
            }
            n
        };
        assert!(count(0) >= count(1));
    }

    #[test]
    fn test_occurrence_filter_drops_repetitive() {
        // A heavy repeat over a unique background: the repeat keys sit far
        // above the occurrence percentile and must be dropped from the table.
        let opt = IndexOpt {
            k: 5,
            w: 1,
            frq: vec![0.05],
            ..IndexOpt::default()
        };
        let background = "ATTTAGCGGGCAATTCGCATCAGCATTTTTGGGCACGATTACGCGCTTTAGAGAGAC\
                          AATTGCCGCATGGATCCTTAGCACGTACGTACCAGTTTACCGGCATAATTCGCATAT";
        let repeat = "ACGGT".repeat(40);
        let idx = build_from_fasta(&format!(">r\n{}{}\n", background, repeat), &opt, 1);

        // Interior repeat minimizers occur ~40x each; every one of them must
        // have been filtered out of the index.
        let codes = crate::seq::encode_seq("ACGGT".repeat(10).as_bytes());
        let mins = sketch_all(&codes, 1, 5);
        let mut kept = 0usize;
        let mut seen = std::collections::HashSet::new();
        for m in MinimizerIter::new(&mins, 1) {
            if seen.insert(m.hash) {
                kept += idx.get(m.hash).len();
            }
        }
        assert!(kept < 10, "kept {} repeat hits", kept);

        // The unique background is still indexed.
        let bcodes = crate::seq::encode_seq(&background.as_bytes()[..40]);
        let bmins = sketch_all(&bcodes, 1, 5);
        let found = MinimizerIter::new(&bmins, 1).any(|m| !idx.get(m.hash).is_empty());
        assert!(found);
    }

    #[test]
    fn test_dump_load_roundtrip() {
        let opt = IndexOpt {
            k: 7,
            w: 4,
            ..IndexOpt::default()
        };
        let fasta = ">a\nATTTAGCGGGCAATTCGCATCAGCATTTTTGGGCACGATTACGCGCTTTAGAGAGAC\n>b\nGGATCCTTAGCACGTACGTACCAGTTTACCGGCATAATTCGCAT\n";
        let idx = build_from_fasta(fasta, &opt, 2);

        let mut buf = Vec::new();
        idx.dump(&mut buf).unwrap();
        let idx2 = MiniIndex::load(&mut Cursor::new(&buf)).unwrap();

        assert_eq!(idx2.n_seq(), idx.n_seq());
        assert_eq!((idx2.b, idx2.w, idx2.k), (idx.b, idx.w, idx.k));
        assert_eq!(idx2.occ, idx.occ);
        for rid in 0..idx.n_seq() as u32 {
            assert_eq!(idx2.seq(rid).name, idx.seq(rid).name);
            assert_eq!(idx2.seq(rid).bases(), idx.seq(rid).bases());
            assert_eq!(idx2.seq(rid).circular, idx.seq(rid).circular);
        }

        // Every lookup agrees as a multiset.
        for rid in 0..idx.n_seq() as u32 {
            let codes = idx.seq(rid).bases().to_vec();
            let mins = sketch_all(&codes, idx.w, idx.k);
            for m in MinimizerIter::new(&mins, idx.w) {
                let mut a: Vec<u64> = idx.get(m.hash).iter().collect();
                let mut b: Vec<u64> = idx2.get(m.hash).iter().collect();
                a.sort_unstable();
                b.sort_unstable();
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_load_rejects_bad_magic() {
        let mut buf = vec![0u8; 64];
        buf[0] = 0xde;
        let err = MiniIndex::load(&mut Cursor::new(&buf)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_load_rejects_truncation() {
        let opt = IndexOpt {
            k: 5,
            w: 2,
            ..IndexOpt::default()
        };
        let idx = build_from_fasta(">a\nACGGATCGGCATTTAGCGCAT\n", &opt, 1);
        let mut buf = Vec::new();
        idx.dump(&mut buf).unwrap();
        buf.truncate(buf.len() / 3);
        assert!(MiniIndex::load(&mut Cursor::new(&buf)).is_err());
    }

    #[test]
    fn test_parallel_build_is_deterministic() {
        let opt = IndexOpt {
            k: 7,
            w: 3,
            ..IndexOpt::default()
        };
        let fasta = ">a\nATTTAGCGGGCAATTCGCATCAGCATTTTTGGGCACGATTACGCGC\n>b\nGGATCCTTAGCACGTACGTACCAGTTTACC\n>c\nTTTACCGGCATAATTCGCATGGATCC\n";
        let i1 = build_from_fasta(fasta, &opt, 1);
        let i4 = build_from_fasta(fasta, &opt, 4);

        let mut b1 = Vec::new();
        let mut b4 = Vec::new();
        i1.dump(&mut b1).unwrap();
        i4.dump(&mut b4).unwrap();
        assert_eq!(b1, b4, "index bytes must not depend on worker count");
    }
}
