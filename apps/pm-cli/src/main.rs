use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter};
use tracing::info;

use i2c_transport as i2c;
use i2c_transport::{BusAddress, I2cBus};
use power_monitor as pm;
use power_monitor::TelemetrySink;

#[derive(Parser, Debug)]
#[command(
    name = "pm",
    version,
    about = "INA260 power monitor CLI",
    disable_help_subcommand = true
)]
struct Cli {
    /// Bus backend
    #[arg(long, value_enum, default_value_t = Backend::Mock, global = true)]
    backend: Backend,
    /// Bus name (e.g., /dev/i2c-1 or mock0); overrides the config file
    #[arg(long, global = true)]
    device: Option<String>,
    /// 7-bit device address (e.g., 0x40); overrides the config file
    #[arg(long, global = true, value_parser = parse_address)]
    address: Option<u8>,
    /// YAML monitor config
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    Mock,
    Rppal,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available I2C buses
    BusList,
    /// Read one register and print its decoded value
    Read {
        /// Register name or address (current, bus_voltage, power, configuration, 0xFE, ...)
        #[arg(long)]
        register: String,
    },
    /// Decode register bytes without touching a bus
    Decode {
        /// Register name or address
        #[arg(long)]
        register: String,
        /// Two data bytes as hex, space-separated (e.g., "00 0A")
        #[arg(long, value_delimiter = ' ')]
        data: Vec<String>,
    },
    /// Read and check the identification registers
    Identify,
    /// Configure the device and poll current, bus voltage and power
    Poll {
        /// Stop after this many rounds (default: run until killed)
        #[arg(long)]
        count: Option<u64>,
        /// Milliseconds between rounds
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Milliseconds to wait after configuring
        #[arg(long)]
        settle_ms: Option<u64>,
        /// Print NDJSON instead of tab-separated lines
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
        /// Also append NDJSON records to this file (created if missing)
        #[arg(long)]
        to: Option<String>,
        /// Print Prometheus metrics when --count rounds are done
        #[arg(long, action = ArgAction::SetTrue)]
        metrics: bool,
        /// Abort startup unless the device identifies as an INA260
        #[arg(long, action = ArgAction::SetTrue)]
        verify: bool,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    let cfg = resolve_config(&cli)?;

    match cli.command {
        Commands::BusList => bus_list(cli.backend),
        Commands::Read { register } => read_backend(cli.backend, &cfg, &register),
        Commands::Decode { register, data } => decode_offline(&register, &data),
        Commands::Identify => identify_backend(cli.backend, &cfg),
        Commands::Poll {
            count,
            interval_ms,
            settle_ms,
            json,
            to,
            metrics,
            verify,
        } => {
            let mut cfg = cfg;
            if let Some(ms) = interval_ms {
                cfg.interval_ms = ms;
            }
            if let Some(ms) = settle_ms {
                cfg.settle_ms = ms;
            }
            if verify && cfg.expect.is_none() {
                cfg.expect = Some(pm::ExpectedIdentity::default());
            }
            let opts = PollOpts {
                count,
                json,
                to,
                metrics,
            };
            poll_backend(cli.backend, &cfg, &opts)
        }
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init();
}

fn resolve_config(cli: &Cli) -> Result<pm::MonitorConfig> {
    let mut cfg = match &cli.config {
        Some(path) => pm::load_config_file(path)?,
        None => pm::MonitorConfig::default(),
    };
    if let Some(dev) = &cli.device {
        cfg.bus = dev.clone();
    }
    if let Some(addr) = cli.address {
        cfg.address = addr;
    }
    Ok(cfg)
}

fn parse_address(s: &str) -> Result<u8, String> {
    let t = s.trim();
    let parsed = match t.strip_prefix("0x") {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => t.parse::<u8>(),
    }
    .map_err(|e| format!("invalid address '{t}': {e}"))?;
    BusAddress::new(parsed)
        .map(|a| a.raw())
        .ok_or_else(|| format!("address 0x{parsed:02X} is not a 7-bit I2C address"))
}

fn bus_address(cfg: &pm::MonitorConfig) -> Result<BusAddress> {
    BusAddress::new(cfg.address)
        .ok_or_else(|| anyhow::anyhow!("invalid I2C address: 0x{:02X}", cfg.address))
}

/// Mock bus with an INA260 that reads 250 mA at 12 V.
fn simulated_bus(name: &str, addr: BusAddress) -> i2c::MockBus {
    use pm::Register;

    let mut bus = i2c::MockBus::new(name);
    let id = pm::TI_MANUFACTURER_ID.to_be_bytes();
    bus.set_register(addr, Register::ManufacturerId.addr(), &id);
    let die = pm::INA260_DIE_ID.to_be_bytes();
    bus.set_register(addr, Register::DieId.addr(), &die);
    // Power-on default configuration until `poll` writes its own
    bus.set_register(addr, Register::Configuration.addr(), &[0x61, 0x27]);
    bus.set_register(addr, Register::Current.addr(), &[0x00, 0xC8]);
    bus.set_register(addr, Register::BusVoltage.addr(), &[0x25, 0x80]);
    bus.set_register(addr, Register::Power.addr(), &[0x01, 0x2C]);
    bus
}

#[cfg(feature = "rppal")]
type HwBus = i2c::RppalBus;

#[cfg(not(feature = "rppal"))]
type HwBus = NoHardwareBus;

fn open_hw_bus(cfg: &pm::MonitorConfig) -> Result<HwBus> {
    if cfg.bus.starts_with("mock") {
        anyhow::bail!("--backend rppal needs a real bus; pass --device /dev/i2c-N");
    }
    Ok(HwBus::open(&cfg.bus)?)
}

/// Stand-in for the hardware backend when built without the `rppal` feature.
#[cfg(not(feature = "rppal"))]
#[allow(dead_code)]
struct NoHardwareBus;

#[cfg(not(feature = "rppal"))]
impl I2cBus for NoHardwareBus {
    fn open(_name: &str) -> i2c::Result<Self> {
        Err(i2c::TransportError::Unsupported(
            "built without rppal support; rebuild with --features rppal",
        ))
    }

    fn list() -> i2c::Result<Vec<i2c::BusInfo>> {
        Self::open("").map(|_| Vec::new())
    }

    fn is_ready(&self) -> bool {
        false
    }

    fn write(&mut self, _addr: BusAddress, _bytes: &[u8]) -> i2c::Result<()> {
        Err(i2c::TransportError::Unsupported("no hardware backend"))
    }

    fn write_read(
        &mut self,
        _addr: BusAddress,
        _out: &[u8],
        _input: &mut [u8],
    ) -> i2c::Result<()> {
        Err(i2c::TransportError::Unsupported("no hardware backend"))
    }
}

fn bus_list(backend: Backend) -> Result<()> {
    let buses = match backend {
        Backend::Mock => i2c::MockBus::list()?,
        Backend::Rppal => HwBus::list()?,
    };
    for bus in buses {
        println!("{}\t{}", bus.name, bus.driver);
    }
    Ok(())
}

fn device_for<B: I2cBus>(bus: B, cfg: &pm::MonitorConfig) -> Result<pm::Ina260<B>> {
    Ok(pm::Ina260::new(bus, cfg.bus.clone(), bus_address(cfg)?)
        .with_config(cfg.conversion)
        .with_settle_delay(cfg.settle()))
}

fn read_backend(backend: Backend, cfg: &pm::MonitorConfig, register: &str) -> Result<()> {
    let register = pm::Register::parse(register)
        .ok_or_else(|| anyhow::anyhow!("unknown register: {register}"))?;
    match backend {
        Backend::Mock => {
            let bus = simulated_bus(&cfg.bus, bus_address(cfg)?);
            read_one(device_for(bus, cfg)?, register)
        }
        Backend::Rppal => {
            let bus = open_hw_bus(cfg)?;
            read_one(device_for(bus, cfg)?, register)
        }
    }
}

fn read_one<B: I2cBus>(mut dev: pm::Ina260<B>, register: pm::Register) -> Result<()> {
    let is_telemetry = matches!(
        register,
        pm::Register::Current | pm::Register::BusVoltage | pm::Register::Power
    );
    if is_telemetry {
        dev.initialize(&mut pm::SystemClock::new())?;
    } else if !dev.bus().is_ready() {
        return Err(pm::InitError::BusNotReady {
            bus: dev.bus_name().to_string(),
        }
        .into());
    }
    let raw = dev.read_register(register)?;
    print_decoded(&raw);
    Ok(())
}

#[derive(Serialize)]
struct DecodeOutput {
    register: pm::Register,
    raw: String,
    value: pm::TelemetryValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<&'static str>,
}

fn print_decoded(raw: &pm::RawRegisterValue) {
    let reading = pm::decode(raw);
    let kind = reading.kind();
    match kind {
        Some(k) => println!(
            "{}\t0x{:04X}\t{} {}",
            raw.register(),
            raw.word(),
            reading.value(),
            k.unit()
        ),
        None => println!("{}\t0x{:04X}", raw.register(), raw.word()),
    }
}

fn decode_offline(register: &str, data_hex: &[String]) -> Result<()> {
    let register = pm::Register::parse(register)
        .ok_or_else(|| anyhow::anyhow!("unknown register: {register}"))?;
    let bytes = parse_hex_bytes(data_hex)?;
    let bytes: [u8; pm::REGISTER_WIDTH] = bytes.as_slice().try_into().map_err(|_| {
        anyhow::anyhow!(
            "expected {} data bytes, got {}",
            pm::REGISTER_WIDTH,
            bytes.len()
        )
    })?;
    let raw = pm::RawRegisterValue::from_bytes(register, bytes);
    let reading = pm::decode(&raw);
    let out = DecodeOutput {
        register,
        raw: format!("{:04X}", raw.word()),
        value: reading.value(),
        unit: reading.kind().map(|k| k.unit()),
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn parse_hex_bytes(items: &[String]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(items.len());
    for s in items {
        let t = s.trim();
        if t.is_empty() {
            continue;
        }
        let no_prefix = t.strip_prefix("0x").unwrap_or(t);
        let b = u8::from_str_radix(no_prefix, 16)
            .map_err(|e| anyhow::anyhow!("invalid hex byte '{t}': {e}"))?;
        out.push(b);
    }
    Ok(out)
}

fn identify_backend(backend: Backend, cfg: &pm::MonitorConfig) -> Result<()> {
    match backend {
        Backend::Mock => {
            let bus = simulated_bus(&cfg.bus, bus_address(cfg)?);
            identify(device_for(bus, cfg)?, cfg)
        }
        Backend::Rppal => {
            let bus = open_hw_bus(cfg)?;
            identify(device_for(bus, cfg)?, cfg)
        }
    }
}

fn identify<B: I2cBus>(mut dev: pm::Ina260<B>, cfg: &pm::MonitorConfig) -> Result<()> {
    if !dev.bus().is_ready() {
        return Err(pm::InitError::BusNotReady {
            bus: dev.bus_name().to_string(),
        }
        .into());
    }
    println!("device: {} @ {}", dev.bus_name(), dev.address());
    let id = dev.identify()?;
    println!("manufacturer_id\t0x{:04X}", id.manufacturer_id);
    println!("die_id\t0x{:04X}", id.die_id);
    let conv = id.config();
    println!(
        "configuration\t0x{:04X}\taveraging={} bus_ct={}us current_ct={}us mode={:?}",
        id.config_word,
        conv.averaging.count(),
        conv.bus_conversion_us.micros(),
        conv.current_conversion_us.micros(),
        conv.mode
    );
    id.check(&cfg.expect.unwrap_or_default())?;
    println!("identity: ok");
    Ok(())
}

fn open_append(path: &str) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {path}"))
}

struct PollOpts {
    count: Option<u64>,
    json: bool,
    to: Option<String>,
    metrics: bool,
}

fn poll_backend(backend: Backend, cfg: &pm::MonitorConfig, opts: &PollOpts) -> Result<()> {
    match backend {
        Backend::Mock => {
            let bus = simulated_bus(&cfg.bus, bus_address(cfg)?);
            poll(device_for(bus, cfg)?, cfg, opts)
        }
        Backend::Rppal => {
            let bus = open_hw_bus(cfg)?;
            poll(device_for(bus, cfg)?, cfg, opts)
        }
    }
}

fn poll<B: I2cBus>(dev: pm::Ina260<B>, cfg: &pm::MonitorConfig, opts: &PollOpts) -> Result<()> {
    let mut sinks: Vec<Box<dyn TelemetrySink>> = Vec::new();
    if opts.json {
        sinks.push(Box::new(pm::JsonLinesSink::new(io::stdout())));
    } else {
        sinks.push(Box::new(pm::LineSink::new(io::stdout())));
    }
    if let Some(path) = &opts.to {
        let file = open_append(path)?;
        sinks.push(Box::new(pm::JsonLinesSink::new(BufWriter::new(file))));
    }

    let hub = pm::MetricsHub::new().map_err(|e| anyhow::anyhow!(e))?;
    let mut lp = pm::PollLoop::new(dev, pm::SystemClock::new(), sinks)
        .with_interval(cfg.interval())
        .with_metrics(hub.clone());
    if let Some(expected) = cfg.expect {
        lp = lp.with_expected_identity(expected);
    }

    match opts.count {
        Some(n) => {
            let stats = lp.run_for(n)?;
            info!(
                iterations = stats.iterations,
                emitted = stats.emitted,
                failed = stats.failed,
                "poll finished"
            );
            if opts.metrics {
                print!("{}", hub.encode_text());
            }
            Ok(())
        }
        None => {
            let never = lp.run()?;
            match never {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_ndjson_file_is_appended_not_truncated() {
        let name = format!("pm-cli-append-{}.ndjson", std::process::id());
        let path = std::env::temp_dir().join(name);
        let path_str = path.to_str().unwrap().to_string();
        let _ = std::fs::remove_file(&path);

        writeln!(open_append(&path_str).unwrap(), "{{\"seq\":1}}").unwrap();
        writeln!(open_append(&path_str).unwrap(), "{{\"seq\":2}}").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x40"), Ok(0x40));
        assert_eq!(parse_address("65"), Ok(65));
        assert!(parse_address("0x90").is_err());
    }
}
