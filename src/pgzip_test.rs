// nanomap/src/pgzip_test.rs

#[cfg(test)]
mod tests {
    use crate::pgzip::{PgReader, PgWriter};
    use std::io::{Cursor, Read, Write};

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    fn roundtrip(data: &[u8], nth_w: usize, nth_r: usize) -> Vec<u8> {
        let mut pg = PgWriter::new(Vec::new(), nth_w);
        pg.write_all(data).unwrap();
        let stream = pg.finish().unwrap();

        let mut out = Vec::new();
        let mut rd = PgReader::new(Cursor::new(stream), nth_r);
        rd.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_roundtrip_empty() {
        assert!(roundtrip(&[], 1, 1).is_empty());
        assert!(roundtrip(&[], 4, 4).is_empty());
    }

    #[test]
    fn test_roundtrip_small_single() {
        let data = b"the quick brown fox jumps over the lazy dog";
        assert_eq!(roundtrip(data, 1, 1), data);
    }

    #[test]
    fn test_roundtrip_multi_block() {
        // Spans several 1 MiB blocks so reordering actually happens.
        let data = patterned(5 * 1024 * 1024 + 12345);
        assert_eq!(roundtrip(&data, 4, 4), data);
        assert_eq!(roundtrip(&data, 1, 4), data);
        assert_eq!(roundtrip(&data, 4, 1), data);
    }

    #[test]
    fn test_stream_bytes_identical_across_worker_counts() {
        let data = patterned(3 * 1024 * 1024 + 7);
        let mut pg1 = PgWriter::new(Vec::new(), 1);
        pg1.write_all(&data).unwrap();
        let s1 = pg1.finish().unwrap();

        let mut pg4 = PgWriter::new(Vec::new(), 4);
        pg4.write_all(&data).unwrap();
        let s4 = pg4.finish().unwrap();

        assert_eq!(s1, s4);
    }

    #[test]
    fn test_terminator_present() {
        let pg = PgWriter::new(Vec::new(), 1);
        let stream = pg.finish().unwrap();
        assert_eq!(&stream[..4], b"PG00");
        assert_eq!(&stream[4..8], &0xffff_ffffu32.to_le_bytes());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut rd = PgReader::new(Cursor::new(b"XX00\x00\x00\x00\x00".to_vec()), 1);
        let mut out = Vec::new();
        let err = rd.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let mut pg = PgWriter::new(Vec::new(), 1);
        pg.write_all(&patterned(2048)).unwrap();
        let mut stream = pg.finish().unwrap();
        stream.truncate(stream.len() - 10); // cut into the terminator frame

        let mut rd = PgReader::new(Cursor::new(stream), 1);
        let mut out = Vec::new();
        assert!(rd.read_to_end(&mut out).is_err());
    }

    #[test]
    fn test_interleaved_writes() {
        let data = patterned(2_500_000);
        let mut pg = PgWriter::new(Vec::new(), 2);
        for chunk in data.chunks(777) {
            pg.write_all(chunk).unwrap();
        }
        let stream = pg.finish().unwrap();
        let mut rd = PgReader::new(Cursor::new(stream), 2);
        let mut out = Vec::new();
        rd.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}
