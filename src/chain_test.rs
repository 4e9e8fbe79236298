// nanomap/src/chain_test.rs

#[cfg(test)]
mod tests {
    use crate::chain::*;
    use crate::index::RefSeq;

    /// Install raw (u,v,rid) seeds, sort and add the sentinel the way
    /// seed_round does.
    fn install(buf: &mut ChainBuf, seeds: &[(u32, u32, u32)]) {
        buf.clear();
        for &(u, v, rid) in seeds {
            buf.seeds.push(Seed {
                rid,
                v,
                u,
                lid: UNCHAINED,
            });
        }
        buf.n_seed = buf.seeds.len();
        buf.seeds.push(Seed {
            rid: u32::MAX,
            v: u32::MAX,
            u: u32::MAX,
            lid: UNCHAINED,
        });
        buf.seeds.sort_unstable_by_key(|s| (s.rid, s.v, s.u));
    }

    fn chain_members(buf: &ChainBuf, lid: u32) -> Vec<usize> {
        (0..buf.n_seed)
            .filter(|&i| buf.seeds[i].lid == lid)
            .collect()
    }

    #[test]
    fn test_collinear_seeds_form_one_chain() {
        // Three nearby collinear seeds plus one far outlier: the first three
        // chain, the outlier stays out (window 2*100).
        let mut buf = ChainBuf::default();
        install(
            &mut buf,
            &[(10, 10, 0), (20, 20, 0), (30, 30, 0), (1000, 1000, 0)],
        );
        let n = buf.chain(200);
        assert_eq!(n, 1);

        let lid = buf.chains[0].lid;
        let members = chain_members(&buf, lid);
        assert_eq!(members.len(), 3);
        let outlier = buf
            .seeds
            .iter()
            .position(|s| s.u == 1000 && s.rid == 0)
            .unwrap();
        assert_ne!(buf.seeds[outlier].lid, lid);

        // plen = (1 - 1/3) * ((30+30) - (10+10))
        assert_eq!(buf.chains[0].plen, 26);
    }

    #[test]
    fn test_chain_is_monotone_in_u_and_v() {
        let mut buf = ChainBuf::default();
        let mut seeds = Vec::new();
        // A noisy diagonal with some off-diagonal decoys.
        for i in 0..20u32 {
            seeds.push((1000 + 13 * i, 1000 + 11 * i, 0));
        }
        seeds.push((1500, 900, 0));
        seeds.push((900, 1500, 0));
        install(&mut buf, &seeds);
        buf.chain(100);

        for lid in 0..buf.leaves.len() as u32 {
            let members = chain_members(&buf, lid);
            for pair in members.windows(2) {
                let (a, b) = (buf.seeds[pair[0]], buf.seeds[pair[1]]);
                assert!(a.u <= b.u, "u not monotone within chain");
                assert!(a.v <= b.v, "v not monotone within chain");
            }
        }
    }

    #[test]
    fn test_seeds_on_different_refs_never_chain() {
        let mut buf = ChainBuf::default();
        install(&mut buf, &[(10, 10, 0), (20, 20, 1), (30, 30, 0)]);
        buf.chain(200);
        for lid in 0..buf.leaves.len() as u32 {
            let members = chain_members(&buf, lid);
            let rids: std::collections::HashSet<u32> =
                members.iter().map(|&i| buf.seeds[i].rid).collect();
            assert!(rids.len() <= 1);
        }
    }

    #[test]
    fn test_merging_branches_share_chain_id() {
        // Two branches converging on one tail: the second branch must adopt
        // the first one's chain id instead of opening a new chain.
        let mut buf = ChainBuf::default();
        install(
            &mut buf,
            &[
                (10, 10, 0),
                (35, 35, 0),
                (60, 60, 0),
                (85, 85, 0),
                // off-path root converging on the chained (60,60)
                (50, 34, 0),
            ],
        );
        buf.chain(30);
        assert!(
            buf.leaves.len() >= 2,
            "expected at least two leaves, got {}",
            buf.leaves.len()
        );
        // All finalized leaves on this diagonal share a single chain.
        let cids: std::collections::HashSet<u32> = buf
            .leaves
            .iter()
            .filter(|l| l.cid != UNCHAINED)
            .map(|l| l.cid)
            .collect();
        assert_eq!(cids.len(), 1);
        assert_eq!(buf.chains.len(), 1);
    }

    #[test]
    fn test_chains_sorted_by_path_length() {
        let mut buf = ChainBuf::default();
        let mut seeds = Vec::new();
        for i in 0..3u32 {
            seeds.push((100 + 10 * i, 100 + 10 * i, 0)); // short chain
        }
        for i in 0..10u32 {
            seeds.push((5000 + 10 * i, 5000 + 10 * i, 0)); // long chain
        }
        install(&mut buf, &seeds);
        buf.chain(100);
        buf.finish_chains();
        assert_eq!(buf.chains.len(), 2);
        assert!(buf.chains[0].plen >= buf.chains[1].plen);
    }

    fn uv(r: i64, q: i64) -> (u32, u32) {
        let s = Seed::new(r, q, 0);
        (s.u, s.v)
    }

    #[test]
    fn test_circular_link_joins_tail_to_head() {
        // A chain ending near the origin of a circular reference links to a
        // chain starting right after it; the pair reports as one chain with
        // the combined path length.
        let refs = vec![RefSeq::from_codes("c".into(), &vec![0u8; 1000], true)];
        let mut buf = ChainBuf::default();
        let mut seeds = Vec::new();
        for i in 0..4i64 {
            let (u, v) = uv(950 + 10 * i, 10 + 10 * i);
            seeds.push((u, v, 0));
        }
        for i in 0..4i64 {
            let (u, v) = uv(10 * i, 60 + 10 * i);
            seeds.push((u, v, 0));
        }
        install(&mut buf, &seeds);
        buf.chain(200);
        assert_eq!(buf.chains.len(), 2);
        let plens: Vec<u32> = buf.chains.iter().map(|c| c.plen).collect();

        buf.circularize(&refs, 100, 200);
        buf.finish_chains();
        assert_eq!(buf.chains.len(), 1, "junction chains must merge");
        assert_eq!(buf.chains[0].plen, plens[0] + plens[1]);

        // The surviving chain's leaf now spans from the pre-origin root to
        // the post-origin tail.
        let leaf = buf.leaves[buf.chains[0].lid as usize];
        let root = buf.seeds[leaf.root_sid as usize];
        let tail = buf.seeds[leaf.tail_sid as usize];
        assert!(root.apos() >= 900);
        assert!(tail.apos() <= 60);
    }

    #[test]
    fn test_linear_reference_never_circularizes() {
        let refs = vec![RefSeq::from_codes("l".into(), &vec![0u8; 1000], false)];
        let mut buf = ChainBuf::default();
        let mut seeds = Vec::new();
        for i in 0..4i64 {
            let (u, v) = uv(950 + 10 * i, 10 + 10 * i);
            seeds.push((u, v, 0));
        }
        for i in 0..4i64 {
            let (u, v) = uv(10 * i, 60 + 10 * i);
            seeds.push((u, v, 0));
        }
        install(&mut buf, &seeds);
        buf.chain(200);
        buf.circularize(&refs, 100, 200);
        buf.finish_chains();
        assert_eq!(buf.chains.len(), 2);
    }

    #[test]
    fn test_uv_projection_roundtrip() {
        for &(r, q) in &[(0i64, 0i64), (100, 50), (5, 400), (1 << 20, 3)] {
            let s = Seed::new(r, q, 7);
            assert_eq!(s.apos(), r);
            assert_eq!(s.bpos(), q);
        }
        // Reverse-strand anchors project to negative query coordinates.
        let s = Seed::new(100, !(50i64), 0);
        assert!(s.bpos() < 0);
    }
}
