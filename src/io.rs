// FASTA input and graph construction.
//
// Sequences come from one FASTA file, plain or gzipped. Every window of k
// consecutive unambiguous bases contributes the k-mer and its reverse
// complement, so the graph is closed under strand reversal the way the
// search expects. Ambiguous bases reset the window.

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use rayon::prelude::*;
use seq_io::fasta::Reader as FastaReader;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::graph::{base_code, revcomp, Graph};

fn open_reader(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;
    let is_gz = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if is_gz {
        Ok(Box::new(MultiGzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Read all record sequences of a FASTA file (plain or .gz).
pub fn read_fasta_sequences(path: &Path) -> Result<Vec<Vec<u8>>> {
    let mut reader = FastaReader::new(open_reader(path)?);
    let mut seqs: Vec<Vec<u8>> = Vec::new();
    while let Some(record) = reader.next() {
        let record = record.with_context(|| format!("read {:?}", path))?;
        seqs.push(record.full_seq().into_owned());
    }
    Ok(seqs)
}

/// All k-mers of `seq` on both strands, rolling over unambiguous windows.
fn scan_kmers(seq: &[u8], k: usize) -> Vec<u64> {
    let mask = if k >= 32 {
        u64::MAX
    } else {
        (1u64 << (2 * k)) - 1
    };
    let mut out = Vec::new();
    let mut cur = 0u64;
    let mut valid = 0usize;
    for &b in seq {
        match base_code(b) {
            Some(c) => {
                cur = ((cur << 2) | c as u64) & mask;
                valid += 1;
                if valid >= k {
                    out.push(cur);
                    out.push(revcomp(cur, k));
                }
            }
            None => valid = 0,
        }
    }
    out
}

/// Build the de Bruijn graph of one FASTA file.
pub fn build_graph_from_fasta(path: &Path, k: usize) -> Result<Graph> {
    let seqs = read_fasta_sequences(path)?;
    let kmers: Vec<u64> = seqs.par_iter().flat_map_iter(|s| scan_kmers(s, k)).collect();
    Ok(Graph::new(k, kmers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::encode;
    use std::io::Write;

    #[test]
    fn scan_inserts_both_strands() {
        let kmers = scan_kmers(b"AAAACA", 5);
        // AAAAC + GTTTT, AAACA + TGTTT
        assert_eq!(kmers.len(), 4);
        assert!(kmers.contains(&encode(b"AAAAC").unwrap()));
        assert!(kmers.contains(&encode(b"GTTTT").unwrap()));
        assert!(kmers.contains(&encode(b"AAACA").unwrap()));
        assert!(kmers.contains(&encode(b"TGTTT").unwrap()));
    }

    #[test]
    fn ambiguous_bases_reset_the_window() {
        assert!(scan_kmers(b"AANACAT", 5).is_empty());
        let kmers = scan_kmers(b"AANACATG", 5);
        // only ACATG after the N, plus its reverse complement
        assert_eq!(kmers.len(), 2);
        assert!(kmers.contains(&encode(b"ACATG").unwrap()));
        assert!(kmers.contains(&encode(b"CATGT").unwrap()));
    }

    #[test]
    fn lowercase_input_is_accepted() {
        let kmers = scan_kmers(b"aaaac", 5);
        assert!(kmers.contains(&encode(b"AAAAC").unwrap()));
    }

    #[test]
    fn graph_from_plain_fasta() {
        let dir = Path::new("target/test_io");
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join("tiny.fa");
        let mut f = File::create(&path).unwrap();
        writeln!(f, ">r1\nAAAACA\n>r2\nAANAC").unwrap();
        drop(f);

        let g = build_graph_from_fasta(&path, 5).unwrap();
        assert_eq!(g.len(), 4);
        assert!(g.contains(encode(b"AAAAC").unwrap()));
        assert!(g.contains(encode(b"TGTTT").unwrap()));
    }

    #[test]
    fn graph_from_gzipped_fasta() {
        let dir = Path::new("target/test_io");
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join("tiny.fa.gz");
        let f = File::create(&path).unwrap();
        let mut gz = flate2::write::GzEncoder::new(f, flate2::Compression::default());
        gz.write_all(b">r1\nAAAACA\n").unwrap();
        gz.finish().unwrap();

        let g = build_graph_from_fasta(&path, 5).unwrap();
        assert_eq!(g.len(), 4);
    }
}
