use crate::Reading;
use prometheus::{Encoder, Gauge, IntCounter, Registry, TextEncoder};

#[derive(Clone)]
pub struct MonitorMetrics {
    pub reads: IntCounter,
    pub read_failures: IntCounter,
    pub poll_iterations: IntCounter,
    pub config_write_failures: IntCounter,
    pub current_ma: Gauge,
    pub bus_voltage_mv: Gauge,
    pub power_mw: Gauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub mon: MonitorMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| {
            IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
        };
        let gauge = |name: &str, help: &str| {
            Gauge::new(name, help).map_err(|e| format!("metrics init error: {e}"))
        };
        let mon = MonitorMetrics {
            reads: counter("pm_reads_total", "Successful telemetry register reads")?,
            read_failures: counter("pm_read_failures_total", "Failed telemetry register reads")?,
            poll_iterations: counter("pm_poll_iterations_total", "Completed poll rounds")?,
            config_write_failures: counter(
                "pm_config_write_failures_total",
                "Failed configuration register writes",
            )?,
            current_ma: gauge("pm_current_ma", "Last decoded current in mA")?,
            bus_voltage_mv: gauge("pm_bus_voltage_mv", "Last decoded bus voltage in mV")?,
            power_mw: gauge("pm_power_mw", "Last decoded power in mW")?,
        };
        let _ = registry.register(Box::new(mon.reads.clone()));
        let _ = registry.register(Box::new(mon.read_failures.clone()));
        let _ = registry.register(Box::new(mon.poll_iterations.clone()));
        let _ = registry.register(Box::new(mon.config_write_failures.clone()));
        let _ = registry.register(Box::new(mon.current_ma.clone()));
        let _ = registry.register(Box::new(mon.bus_voltage_mv.clone()));
        let _ = registry.register(Box::new(mon.power_mw.clone()));
        Ok(Self { registry, mon })
    }

    pub fn observe(&self, reading: &Reading) {
        self.mon.reads.inc();
        match *reading {
            Reading::CurrentMilliAmps(v) => self.mon.current_ma.set(v),
            Reading::BusVoltageMilliVolts(v) => self.mon.bus_voltage_mv.set(v),
            Reading::PowerMilliWatts(v) => self.mon.power_mw.set(f64::from(v)),
            _ => {}
        }
    }

    pub fn read_failed(&self) {
        self.mon.read_failures.inc();
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_updates_gauges() {
        let hub = MetricsHub::new().unwrap();
        hub.observe(&Reading::CurrentMilliAmps(12.5));
        hub.observe(&Reading::PowerMilliWatts(50));
        hub.read_failed();

        assert_eq!(hub.mon.reads.get(), 2);
        assert_eq!(hub.mon.read_failures.get(), 1);
        assert_eq!(hub.mon.current_ma.get(), 12.5);
        assert_eq!(hub.mon.power_mw.get(), 50.0);

        let text = hub.encode_text();
        assert!(text.contains("pm_reads_total 2"));
        assert!(text.contains("pm_power_mw 50"));
    }
}
