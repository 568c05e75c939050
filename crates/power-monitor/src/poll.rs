use crate::{
    Clock, ExpectedIdentity, Identity, Ina260, InitError, MetricsHub, TelemetryKind,
    TelemetryRecord, TelemetrySink,
};
use i2c_transport::I2cBus;
use std::convert::Infallible;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Startup,
    Polling,
}

/// Running totals since the loop was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub iterations: u64,
    pub emitted: u64,
    pub failed: u64,
}

/// Drives one device: a startup phase, then current, bus voltage and power every interval.
///
/// Only startup can fail. Once polling, a failed read is logged and reported to the sink,
/// and the loop moves on to the next register.
pub struct PollLoop<B, C, S> {
    device: Ina260<B>,
    clock: C,
    sink: S,
    interval: Duration,
    expect: Option<ExpectedIdentity>,
    metrics: Option<MetricsHub>,
    state: PollState,
    seq: u64,
    stats: PollStats,
}

impl<B, C, S> PollLoop<B, C, S>
where
    B: I2cBus,
    C: Clock,
    S: TelemetrySink,
{
    pub fn new(device: Ina260<B>, clock: C, sink: S) -> Self {
        Self {
            device,
            clock,
            sink,
            interval: DEFAULT_INTERVAL,
            expect: None,
            metrics: None,
            state: PollState::Startup,
            seq: 0,
            stats: PollStats::default(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_expected_identity(mut self, expect: ExpectedIdentity) -> Self {
        self.expect = Some(expect);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsHub) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn stats(&self) -> PollStats {
        self.stats
    }

    pub fn device(&self) -> &Ina260<B> {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Ina260<B> {
        &mut self.device
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Bring the device up: initialize, identify, take one baseline round.
    pub fn startup(&mut self) -> Result<(), InitError> {
        info!(
            bus = self.device.bus_name(),
            address = %self.device.address(),
            "starting power monitor"
        );
        self.device.initialize(&mut self.clock)?;
        if !self.device.is_configured() {
            if let Some(m) = &self.metrics {
                m.mon.config_write_failures.inc();
            }
        }

        let identity = self.log_identification();
        if let Some(expected) = self.expect {
            match identity {
                Some(id) => {
                    id.check(&expected)?;
                    info!("device identity verified");
                }
                None => warn!("identity not verified; identification reads failed"),
            }
        }
        self.log_baseline();

        self.state = PollState::Polling;
        Ok(())
    }

    fn log_identification(&mut self) -> Option<Identity> {
        match self.device.identify() {
            Ok(id) => {
                let cfg = id.config();
                info!(
                    manufacturer_id = %format!("0x{:04X}", id.manufacturer_id),
                    die_id = %format!("0x{:04X}", id.die_id),
                    config = %format!("0x{:04X}", id.config_word),
                    averaging = cfg.averaging.count(),
                    bus_us = cfg.bus_conversion_us.micros(),
                    current_us = cfg.current_conversion_us.micros(),
                    mode = ?cfg.mode,
                    "identification"
                );
                Some(id)
            }
            Err(e) => {
                warn!(register = %e.register(), error = %e, "identification read failed");
                None
            }
        }
    }

    fn log_baseline(&mut self) {
        for kind in TelemetryKind::POLL_ORDER {
            match self.device.sample(kind) {
                Ok((raw, reading)) => {
                    info!(%kind, word = %format!("0x{:04X}", raw.word()), value = %reading.value(), "baseline")
                }
                Err(e) => warn!(%kind, error = %e, "baseline read failed"),
            }
        }
    }

    fn poll_round(&mut self) {
        self.seq += 1;
        let seq = self.seq;
        for kind in TelemetryKind::POLL_ORDER {
            match self.device.sample(kind) {
                Ok((raw, reading)) => {
                    let rec = TelemetryRecord::new(
                        kind,
                        &raw,
                        reading,
                        seq,
                        self.clock.elapsed(),
                        Some(OffsetDateTime::now_utc()),
                    );
                    debug!(%kind, seq, value = %rec.value, unit = kind.unit(), "sample");
                    if let Some(m) = &self.metrics {
                        m.observe(&reading);
                    }
                    if let Err(e) = self.sink.record(&rec) {
                        warn!(%kind, seq, error = %e, "telemetry sink rejected record");
                    }
                    self.stats.emitted += 1;
                }
                Err(e) => {
                    warn!(%kind, seq, error = %e, "telemetry read failed");
                    if let Some(m) = &self.metrics {
                        m.read_failed();
                    }
                    if let Err(io) = self.sink.read_failed(kind, seq, &e) {
                        warn!(%kind, seq, error = %io, "telemetry sink rejected failure");
                    }
                    self.stats.failed += 1;
                }
            }
        }
        self.stats.iterations += 1;
        if let Some(m) = &self.metrics {
            m.mon.poll_iterations.inc();
        }
    }

    /// Run startup if needed, then `iterations` rounds, each followed by the poll interval.
    pub fn run_for(&mut self, iterations: u64) -> Result<PollStats, InitError> {
        if self.state == PollState::Startup {
            self.startup()?;
        }
        for _ in 0..iterations {
            self.poll_round();
            self.clock.sleep(self.interval);
        }
        Ok(self.stats)
    }

    /// Run until the process is terminated. Returns only if startup fails.
    pub fn run(&mut self) -> Result<Infallible, InitError> {
        if self.state == PollState::Startup {
            self.startup()?;
        }
        loop {
            self.poll_round();
            self.clock.sleep(self.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ManualClock, MemorySink, Register, TelemetryValue, DEFAULT_ADDRESS};
    use i2c_transport::{BusAddress, MockBus, Transaction};

    fn addr() -> BusAddress {
        BusAddress::new(DEFAULT_ADDRESS).unwrap()
    }

    fn seeded_bus() -> MockBus {
        let mut bus = MockBus::new("mock0");
        bus.set_register(addr(), 0xFE, &[0x54, 0x49]);
        bus.set_register(addr(), 0xFF, &[0x22, 0x70]);
        bus.set_register(addr(), 0x01, &[0x00, 0x0A]);
        bus.set_register(addr(), 0x02, &[0x01, 0x00]);
        bus.set_register(addr(), 0x03, &[0x00, 0x05]);
        bus
    }

    fn poll_loop(bus: MockBus) -> PollLoop<MockBus, ManualClock, MemorySink> {
        let device = Ina260::new(bus, "mock0", addr());
        PollLoop::new(device, ManualClock::new(), MemorySink::new())
    }

    fn values(sink: &MemorySink, seq: u64) -> Vec<(TelemetryKind, TelemetryValue)> {
        sink.records()
            .filter(|r| r.seq == seq)
            .map(|r| (r.kind, r.value))
            .collect()
    }

    #[test]
    fn test_end_to_end_values() {
        let mut lp = poll_loop(seeded_bus());
        let stats = lp.run_for(1).unwrap();

        assert_eq!(lp.state(), PollState::Polling);
        assert_eq!(
            values(lp.sink(), 1),
            vec![
                (TelemetryKind::Current, TelemetryValue::F64(12.5)),
                (TelemetryKind::BusVoltage, TelemetryValue::F64(320.0)),
                (TelemetryKind::Power, TelemetryValue::U32(50)),
            ]
        );
        assert_eq!(
            stats,
            PollStats {
                iterations: 1,
                emitted: 3,
                failed: 0
            }
        );
    }

    #[test]
    fn test_bus_not_ready_stops_before_any_write() {
        let mut bus = seeded_bus();
        bus.set_ready(false);
        let mut lp = poll_loop(bus);

        let err = lp.run_for(5).unwrap_err();
        assert!(matches!(err, InitError::BusNotReady { .. }));
        assert_eq!(lp.state(), PollState::Startup);
        assert!(lp.device().bus().transactions().is_empty());
        assert!(lp.sink().events.is_empty());
        assert!(lp.clock().sleeps().is_empty());
    }

    #[test]
    fn test_power_failure_is_isolated_to_one_round() {
        let mut lp = poll_loop(seeded_bus());
        lp.startup().unwrap();
        lp.device_mut().bus_mut().inject_fault(addr(), 0x03);

        let stats = lp.run_for(2).unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.emitted, 5);

        let first: Vec<TelemetryKind> = values(lp.sink(), 1).into_iter().map(|(k, _)| k).collect();
        assert_eq!(first, vec![TelemetryKind::Current, TelemetryKind::BusVoltage]);
        assert_eq!(
            lp.sink().failures().collect::<Vec<_>>(),
            vec![(TelemetryKind::Power, 1)]
        );
        assert_eq!(values(lp.sink(), 2).len(), 3);
    }

    #[test]
    fn test_current_failure_does_not_skip_later_reads() {
        let mut lp = poll_loop(seeded_bus());
        lp.startup().unwrap();
        lp.device_mut().bus_mut().inject_fault(addr(), 0x01);
        lp.device_mut().bus_mut().clear_transactions();

        lp.run_for(1).unwrap();
        let reads: Vec<Vec<u8>> = lp
            .device()
            .bus()
            .transactions()
            .iter()
            .filter_map(|t| match t {
                Transaction::WriteRead { out, .. } => Some(out.clone()),
                Transaction::Write { .. } => None,
            })
            .collect();
        assert_eq!(reads, vec![vec![0x01], vec![0x02], vec![0x03]]);
        assert_eq!(values(lp.sink(), 1).len(), 2);
    }

    #[test]
    fn test_cadence_uses_injected_clock() {
        let mut lp = poll_loop(seeded_bus()).with_interval(Duration::from_millis(250));
        lp.run_for(3).unwrap();

        let ms: Vec<u128> = lp.clock().sleeps().iter().map(|d| d.as_millis()).collect();
        assert_eq!(ms, vec![500, 250, 250, 250]);

        let stamps: Vec<u64> = lp
            .sink()
            .records()
            .filter(|r| r.kind == TelemetryKind::Current)
            .map(|r| r.elapsed_ms)
            .collect();
        assert_eq!(stamps, vec![500, 750, 1000]);
    }

    #[test]
    fn test_startup_runs_once() {
        let mut lp = poll_loop(seeded_bus());
        lp.run_for(1).unwrap();
        lp.run_for(1).unwrap();

        let config_writes = lp
            .device()
            .bus()
            .transactions()
            .iter()
            .filter(|t| matches!(t, Transaction::Write { .. }))
            .count();
        assert_eq!(config_writes, 1);
        assert_eq!(lp.stats().iterations, 2);
        assert_eq!(values(lp.sink(), 2).len(), 3);
    }

    #[test]
    fn test_identity_mismatch_is_fatal_when_expected() {
        let mut bus = seeded_bus();
        bus.set_register(addr(), 0xFF, &[0x22, 0x60]);
        let mut lp = poll_loop(bus).with_expected_identity(ExpectedIdentity::default());

        let err = lp.run_for(1).unwrap_err();
        assert!(matches!(
            err,
            InitError::IdentityMismatch {
                register: Register::DieId,
                ..
            }
        ));
        assert!(lp.sink().events.is_empty());
    }

    #[test]
    fn test_failed_id_read_is_not_fatal_with_expectation() {
        let mut bus = seeded_bus();
        bus.inject_fault(addr(), 0xFE);
        let mut lp = poll_loop(bus).with_expected_identity(ExpectedIdentity::default());

        let stats = lp.run_for(2).unwrap();
        assert_eq!(lp.state(), PollState::Polling);
        assert_eq!(stats.emitted, 6);
        assert_eq!(values(lp.sink(), 1).len(), 3);
    }

    #[test]
    fn test_startup_reads_identification_once() {
        let mut lp = poll_loop(seeded_bus()).with_expected_identity(ExpectedIdentity::default());
        lp.startup().unwrap();

        let id_reads = lp
            .device()
            .bus()
            .transactions()
            .iter()
            .filter(|t| matches!(t, Transaction::WriteRead { out, .. } if out[..] == [0xFE]))
            .count();
        assert_eq!(id_reads, 1);
    }

    #[test]
    fn test_identity_mismatch_ignored_without_expectation() {
        let mut bus = seeded_bus();
        bus.set_register(addr(), 0xFE, &[0x00, 0x00]);
        let mut lp = poll_loop(bus);
        assert!(lp.run_for(1).is_ok());
    }

    #[test]
    fn test_metrics_follow_the_loop() {
        let mut bus = seeded_bus();
        bus.inject_fault(addr(), 0x00);
        let hub = MetricsHub::new().unwrap();
        let mut lp = poll_loop(bus).with_metrics(hub.clone());
        lp.startup().unwrap();
        lp.device_mut().bus_mut().inject_fault(addr(), 0x02);
        lp.run_for(2).unwrap();

        assert_eq!(hub.mon.config_write_failures.get(), 1);
        assert_eq!(hub.mon.poll_iterations.get(), 2);
        assert_eq!(hub.mon.reads.get(), 5);
        assert_eq!(hub.mon.read_failures.get(), 1);
        assert_eq!(hub.mon.bus_voltage_mv.get(), 320.0);
    }
}
