// nanomap/src/map_test.rs

#[cfg(test)]
mod tests {
    use crate::index::MiniIndex;
    use crate::map::{AlignEngine, MapBuffer, MAPQ_COEF};
    use crate::opt::{IndexOpt, MapOpt};
    use crate::seq::{SeqReader, encode_seq, revcomp_codes};
    use std::fs;

    fn random_bases(len: usize, seed: u64) -> Vec<u8> {
        let mut state = seed | 1;
        (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                ((state >> 33) & 3) as u8
            })
            .collect()
    }

    fn bases_to_ascii(codes: &[u8]) -> String {
        codes
            .iter()
            .map(|&c| crate::seq::code_to_base(c) as char)
            .collect()
    }

    fn build_index(refs: &[(&str, &[u8])], opt: &IndexOpt) -> MiniIndex {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.fa");
        let mut fasta = String::new();
        for (name, codes) in refs {
            fasta.push_str(&format!(">{}\n{}\n", name, bases_to_ascii(codes)));
        }
        fs::write(&path, fasta).unwrap();
        let mut rd = SeqReader::open(&path).unwrap();
        MiniIndex::build(opt, &mut rd, 1).unwrap()
    }

    fn small_opt() -> IndexOpt {
        IndexOpt {
            k: 11,
            w: 4,
            ..IndexOpt::default()
        }
    }

    #[test]
    fn test_exact_read_maps_at_planted_locus() {
        let rbases = random_bases(500, 42);
        let idx = build_index(&[("chr", &rbases)], &small_opt());
        let engine = AlignEngine::new(&idx, &MapOpt::default());
        let mut buf = MapBuffer::default();

        let query = rbases[100..300].to_vec();
        let set = engine.align(&mut buf, &query, 0).expect("mapped");

        assert_eq!(set.alns.len(), 1, "exact read must yield one alignment");
        let e = &set.alns[0];
        assert_eq!(e.aid, 0);
        assert_eq!(e.aln.segs.len(), 1);
        let seg = &e.aln.segs[0];
        assert_eq!(seg.rid, 0);
        assert_eq!(seg.rs, 100);
        assert_eq!(seg.rlen, 200);
        assert_eq!(seg.qs, 0);
        assert_eq!(seg.qlen, 200);
        assert!(!seg.rev);
        assert_eq!(e.aln.score, 200);
        assert!((e.aln.identity - 1.0).abs() < 1e-9);
        assert_eq!(e.aln.plen, 400);
    }

    #[test]
    fn test_mapq_saturates_for_unique_hit() {
        let rbases = random_bases(500, 7);
        let idx = build_index(&[("chr", &rbases)], &small_opt());
        let engine = AlignEngine::new(&idx, &MapOpt::default());
        let mut buf = MapBuffer::default();

        let query = rbases[50..350].to_vec();
        let set = engine.align(&mut buf, &query, 0).expect("mapped");
        assert_eq!(set.n_uniq, set.alns.len() as u32);
        // score far above min_score and no second best: mapq pegs at 60
        assert_eq!(set.alns[0].mapq, 60 * MAPQ_COEF);
    }

    #[test]
    fn test_reverse_complement_read() {
        let rbases = random_bases(600, 99);
        let idx = build_index(&[("chr", &rbases)], &small_opt());
        let engine = AlignEngine::new(&idx, &MapOpt::default());
        let mut buf = MapBuffer::default();

        let query = revcomp_codes(&rbases[200..400]);
        let set = engine.align(&mut buf, &query, 0).expect("mapped");
        let seg = &set.alns[0].aln.segs[0];
        assert!(seg.rev);
        assert_eq!(seg.rs, 200);
        assert_eq!(seg.rlen, 200);
        assert_eq!(seg.qs, 0);
        assert_eq!(seg.qlen, 200);
        assert_eq!(set.alns[0].aln.score, 200);
    }

    #[test]
    fn test_noisy_read_still_maps() {
        let rbases = random_bases(800, 3);
        let idx = build_index(&[("chr", &rbases)], &small_opt());
        let engine = AlignEngine::new(&idx, &MapOpt::default());
        let mut buf = MapBuffer::default();

        // ~4% substitutions
        let mut query = rbases[150..550].to_vec();
        for i in (0..query.len()).step_by(25) {
            query[i] = (query[i] + 1) & 3;
        }
        let set = engine.align(&mut buf, &query, 0).expect("mapped");
        let e = &set.alns[0];
        let seg = &e.aln.segs[0];
        assert_eq!(seg.rid, 0);
        // The alignment may clip a mutated edge base but must cover the bulk.
        assert!(seg.rs >= 148 && seg.rs <= 152, "rs={}", seg.rs);
        assert!(seg.rlen >= 390);
        assert!(e.aln.identity > 0.9 && e.aln.identity < 1.0);
    }

    #[test]
    fn test_unrelated_read_is_unmapped() {
        let rbases = random_bases(500, 5);
        let idx = build_index(&[("chr", &rbases)], &small_opt());
        let engine = AlignEngine::new(&idx, &MapOpt::default());
        let mut buf = MapBuffer::default();

        let query = random_bases(200, 123456789);
        assert!(engine.align(&mut buf, &query, 0).is_none());
    }

    #[test]
    fn test_short_or_trivial_query_skipped() {
        let rbases = random_bases(500, 11);
        let idx = build_index(&[("chr", &rbases)], &small_opt());
        let engine = AlignEngine::new(&idx, &MapOpt::default());
        let mut buf = MapBuffer::default();

        assert!(engine.align(&mut buf, &encode_seq(b"ACGT"), 0).is_none());
        // 40 bases cannot reach min_score 50 even error-free
        assert!(engine.align(&mut buf, &rbases[0..40].to_vec(), 0).is_none());
    }

    #[test]
    fn test_duplicated_region_yields_secondary() {
        let seg = random_bases(220, 17);
        let mut rbases = random_bases(300, 18);
        rbases.extend_from_slice(&seg);
        rbases.extend(random_bases(300, 19));
        rbases.extend_from_slice(&seg);
        rbases.extend(random_bases(100, 20));
        let idx = build_index(&[("chr", &rbases)], &small_opt());
        let engine = AlignEngine::new(&idx, &MapOpt::default());
        let mut buf = MapBuffer::default();

        let set = engine.align(&mut buf, &seg, 0).expect("mapped");
        assert!(set.alns.len() >= 2, "both copies must be reported");
        assert_eq!(set.n_uniq, 1, "second copy is secondary");

        // Descending score order and distinct start positions.
        for pair in set.alns.windows(2) {
            assert!(pair[0].aln.score >= pair[1].aln.score);
        }
        let starts: std::collections::HashSet<(u32, u32)> = set
            .alns
            .iter()
            .map(|e| (e.aln.segs[0].rs, e.aln.segs[0].qs))
            .collect();
        assert_eq!(starts.len(), set.alns.len(), "dedup by start positions");
        let mut rss: Vec<u32> = set.alns.iter().map(|e| e.aln.segs[0].rs).collect();
        rss.sort_unstable();
        assert_eq!(rss, vec![300, 820]);

        // Secondary mapq is low, primary mapq is low too (ambiguous hit).
        assert!(set.alns[0].mapq < 20 * MAPQ_COEF);
    }

    #[test]
    fn test_circular_junction_reports_one_alignment() {
        let rbases = random_bases(600, 31);
        let opt = IndexOpt {
            circular: Some(vec!["plasmid".to_string()]),
            ..small_opt()
        };
        let idx = build_index(&[("plasmid", &rbases)], &opt);
        assert!(idx.seq(0).circular);
        let engine = AlignEngine::new(&idx, &MapOpt::default());
        let mut buf = MapBuffer::default();

        // Read across the origin: last 150 bases then first 150.
        let mut query = rbases[450..].to_vec();
        query.extend_from_slice(&rbases[..150]);
        let set = engine.align(&mut buf, &query, 0).expect("mapped");

        assert_eq!(set.alns.len(), 1, "junction must not split into two records");
        let aln = &set.alns[0].aln;
        assert_eq!(aln.score, 300);
        assert_eq!(aln.plen, 600, "joined path spans both chain halves");
        assert_eq!(aln.segs.len(), 2);
        assert_eq!(aln.segs[0].rs, 450);
        assert_eq!(aln.segs[0].rlen, 150);
        assert_eq!(aln.segs[0].qs, 0);
        assert_eq!(aln.segs[1].rs, 0);
        assert_eq!(aln.segs[1].rlen, 150);
        assert_eq!(aln.segs[1].qs, 150);
        assert_eq!(set.alns[0].mapq, 60 * MAPQ_COEF);
    }

    #[test]
    fn test_ava_filter_skips_lower_triangle() {
        let a = random_bases(400, 61);
        let idx = build_index(&[("r0", &a), ("r1", &a)], &small_opt());
        let mut opt = MapOpt::default();
        opt.ava = true;
        let engine = AlignEngine::new(&idx, &opt);
        let mut buf = MapBuffer::default();

        // Query id 1 only sees references with id >= 1.
        let set = engine.align(&mut buf, &a[50..250].to_vec(), 1).expect("mapped");
        for e in &set.alns {
            assert!(e.aln.segs[0].rid >= 1);
        }
        // Query id 0 sees both copies.
        let set0 = engine.align(&mut buf, &a[50..250].to_vec(), 0).expect("mapped");
        let rids: std::collections::HashSet<u32> =
            set0.alns.iter().map(|e| e.aln.segs[0].rid).collect();
        assert!(rids.contains(&0));
    }

    #[test]
    fn test_multi_reference_hit_targets_right_sequence() {
        let r0 = random_bases(400, 71);
        let r1 = random_bases(400, 72);
        let idx = build_index(&[("r0", &r0), ("r1", &r1)], &small_opt());
        let engine = AlignEngine::new(&idx, &MapOpt::default());
        let mut buf = MapBuffer::default();

        let set = engine.align(&mut buf, &r1[120..320].to_vec(), 0).expect("mapped");
        let seg = &set.alns[0].aln.segs[0];
        assert_eq!(seg.rid, 1);
        assert_eq!(seg.rs, 120);
    }
}
