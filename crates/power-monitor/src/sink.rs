use crate::{RegisterError, TelemetryKind, TelemetryRecord};
use serde::Serialize;
use std::io::{self, Write};

/// Destination for decoded samples and per-read failures.
pub trait TelemetrySink {
    fn record(&mut self, rec: &TelemetryRecord) -> io::Result<()>;

    fn read_failed(&mut self, kind: TelemetryKind, seq: u64, error: &RegisterError)
        -> io::Result<()>;
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for Box<S> {
    fn record(&mut self, rec: &TelemetryRecord) -> io::Result<()> {
        (**self).record(rec)
    }

    fn read_failed(
        &mut self,
        kind: TelemetryKind,
        seq: u64,
        error: &RegisterError,
    ) -> io::Result<()> {
        (**self).read_failed(kind, seq, error)
    }
}

/// Fan out to every sink; the first error wins but all sinks are tried.
impl TelemetrySink for Vec<Box<dyn TelemetrySink>> {
    fn record(&mut self, rec: &TelemetryRecord) -> io::Result<()> {
        let mut out = Ok(());
        for sink in self.iter_mut() {
            let res = sink.record(rec);
            if out.is_ok() {
                out = res;
            }
        }
        out
    }

    fn read_failed(
        &mut self,
        kind: TelemetryKind,
        seq: u64,
        error: &RegisterError,
    ) -> io::Result<()> {
        let mut out = Ok(());
        for sink in self.iter_mut() {
            let res = sink.read_failed(kind, seq, error);
            if out.is_ok() {
                out = res;
            }
        }
        out
    }
}

/// Tab-separated human-readable lines.
pub struct LineSink<W: Write> {
    out: W,
}

impl<W: Write> LineSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> TelemetrySink for LineSink<W> {
    fn record(&mut self, rec: &TelemetryRecord) -> io::Result<()> {
        writeln!(
            self.out,
            "{kind}\t{value} {unit}\traw={raw}\tseq={seq}\t{ts}",
            kind = rec.kind,
            value = rec.value,
            unit = rec.unit,
            raw = rec.raw,
            seq = rec.seq,
            ts = rec.ts.as_deref().unwrap_or(""),
        )
    }

    fn read_failed(
        &mut self,
        kind: TelemetryKind,
        seq: u64,
        error: &RegisterError,
    ) -> io::Result<()> {
        writeln!(self.out, "{kind}\tERROR {error}\tseq={seq}")
    }
}

#[derive(Serialize)]
struct FailureLine {
    kind: TelemetryKind,
    seq: u64,
    error: String,
}

/// One JSON object per line (NDJSON).
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_json<T: Serialize>(&mut self, value: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, value)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

impl<W: Write> TelemetrySink for JsonLinesSink<W> {
    fn record(&mut self, rec: &TelemetryRecord) -> io::Result<()> {
        self.write_json(rec)
    }

    fn read_failed(
        &mut self,
        kind: TelemetryKind,
        seq: u64,
        error: &RegisterError,
    ) -> io::Result<()> {
        self.write_json(&FailureLine {
            kind,
            seq,
            error: error.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub enum SinkEvent {
    Record(TelemetryRecord),
    Failure {
        kind: TelemetryKind,
        seq: u64,
        error: String,
    },
}

/// Keeps everything in memory, for tests and one-shot commands.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub events: Vec<SinkEvent>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> impl Iterator<Item = &TelemetryRecord> {
        self.events.iter().filter_map(|e| match e {
            SinkEvent::Record(r) => Some(r),
            SinkEvent::Failure { .. } => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (TelemetryKind, u64)> + '_ {
        self.events.iter().filter_map(|e| match e {
            SinkEvent::Failure { kind, seq, .. } => Some((*kind, *seq)),
            SinkEvent::Record(_) => None,
        })
    }
}

impl TelemetrySink for MemorySink {
    fn record(&mut self, rec: &TelemetryRecord) -> io::Result<()> {
        self.events.push(SinkEvent::Record(rec.clone()));
        Ok(())
    }

    fn read_failed(
        &mut self,
        kind: TelemetryKind,
        seq: u64,
        error: &RegisterError,
    ) -> io::Result<()> {
        self.events.push(SinkEvent::Failure {
            kind,
            seq,
            error: error.to_string(),
        });
        Ok(())
    }
}
