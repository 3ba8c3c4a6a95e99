// Output sequences, sinks, and the state shared between search workers.
//
// Bubble indices are issued by an atomic fetch-add outside any lock, so two
// workers may obtain adjacent indices and insert in either order: the output
// file is a multiset keyed by index, not sorted by it. Everything else that
// is mutable (the sink and the statistics) lives behind one mutex.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One rendered allele path: FASTA comment plus ASCII sequence data.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sequence {
    pub comment: String,
    pub data: Vec<u8>,
}

pub trait SequenceSink: Send {
    fn insert(&mut self, seq: &Sequence) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes one single-line FASTA record per sequence.
pub struct FastaSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> FastaSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> SequenceSink for FastaSink<W> {
    fn insert(&mut self, seq: &Sequence) -> Result<()> {
        self.writer
            .write_all(b">")
            .and_then(|_| self.writer.write_all(seq.comment.as_bytes()))
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.write_all(&seq.data))
            .and_then(|_| self.writer.write_all(b"\n"))
            .context("write FASTA record")
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("flush output")
    }
}

/// Collects sequences in memory through a shared handle; the handle cloned
/// before the run keeps access to everything inserted.
#[derive(Clone, Default)]
pub struct MemorySink(pub Arc<Mutex<Vec<Sequence>>>);

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequences(&self) -> Vec<Sequence> {
        self.0.lock().clone()
    }
}

impl SequenceSink for MemorySink {
    fn insert(&mut self, seq: &Sequence) -> Result<()> {
        self.0.lock().push(seq.clone());
        Ok(())
    }
}

/// Counters updated inside the sink critical section.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub nb_high: u64,
    pub nb_low: u64,
    /// Indexed by closure flags: none, left only, right only, both.
    pub by_closure: [u64; 4],
}

struct SinkState {
    sink: Box<dyn SequenceSink>,
    stats: Stats,
}

/// The only state shared between workers besides the read-only graph.
pub struct SharedOutput {
    nb_bubbles: AtomicU64,
    state: Mutex<SinkState>,
}

impl SharedOutput {
    pub fn new(sink: Box<dyn SequenceSink>) -> Self {
        Self {
            nb_bubbles: AtomicU64::new(0),
            state: Mutex::new(SinkState {
                sink,
                stats: Stats::default(),
            }),
        }
    }

    /// Issue the next bubble index. Linearizable; issued indices are dense
    /// starting at 1.
    #[inline]
    pub fn next_index(&self) -> u64 {
        self.nb_bubbles.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[inline]
    pub fn nb_bubbles(&self) -> u64 {
        self.nb_bubbles.load(Ordering::SeqCst)
    }

    /// Insert the two allele sequences (higher first) and update statistics,
    /// all under the sink lock.
    pub fn push_pair(
        &self,
        seq1: &Sequence,
        seq2: &Sequence,
        closure_flags: u8,
        high_complexity: bool,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.sink.insert(seq1)?;
        state.sink.insert(seq2)?;
        state.stats.by_closure[closure_flags as usize] += 1;
        if high_complexity {
            state.stats.nb_high += 1;
        } else {
            state.stats.nb_low += 1;
        }
        Ok(())
    }

    pub fn stats(&self) -> Stats {
        self.state.lock().stats
    }

    /// Flush the sink and return (total bubbles, stats).
    pub fn finish(self) -> Result<(u64, Stats)> {
        let total = self.nb_bubbles.into_inner();
        let mut state = self.state.into_inner();
        state.sink.flush()?;
        Ok((total, state.stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(comment: &str, data: &str) -> Sequence {
        Sequence {
            comment: comment.to_string(),
            data: data.as_bytes().to_vec(),
        }
    }

    #[test]
    fn fasta_sink_layout() {
        let mut buf = Vec::new();
        {
            let mut sink = FastaSink::new(&mut buf);
            sink.insert(&seq("SNP_higher_path_1|high", "AAAACATGT")).unwrap();
            sink.insert(&seq("SNP_lower_path_1|high", "AAAAGATGT")).unwrap();
            sink.flush().unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            ">SNP_higher_path_1|high\nAAAACATGT\n>SNP_lower_path_1|high\nAAAAGATGT\n"
        );
    }

    #[test]
    fn indices_are_dense_and_start_at_one() {
        let out = SharedOutput::new(Box::new(MemorySink::new()));
        assert_eq!(out.next_index(), 1);
        assert_eq!(out.next_index(), 2);
        assert_eq!(out.nb_bubbles(), 2);
    }

    #[test]
    fn stats_follow_insertions() {
        let mem = MemorySink::new();
        let out = SharedOutput::new(Box::new(mem.clone()));
        out.push_pair(&seq("a", "A"), &seq("b", "C"), 1, true).unwrap();
        out.push_pair(&seq("c", "G"), &seq("d", "T"), 3, false).unwrap();
        let stats = out.stats();
        assert_eq!(stats.nb_high, 1);
        assert_eq!(stats.nb_low, 1);
        assert_eq!(stats.by_closure, [0, 1, 0, 1]);
        assert_eq!(mem.sequences().len(), 4);
        // seq1 precedes seq2 within a pair
        assert_eq!(mem.sequences()[0].comment, "a");
        assert_eq!(mem.sequences()[1].comment, "b");
    }
}
