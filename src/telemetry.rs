//! Device memory telemetry for diagnostic logging around operator applications.
//!
//! A [`Telemetry`] handle owns an initialized [`MemoryMonitor`] backend and shuts it down when
//! dropped, so the backend can never be queried outside of that window. Failures of the backend
//! never propagate into numerical code: a failed query only suppresses the corresponding log line.
use log::{info, warn};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Categories of device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    Vram,
    VisibleVram,
    Gtt,
}

impl MemoryKind {
    pub const ALL: [MemoryKind; 3] = [MemoryKind::Vram, MemoryKind::VisibleVram, MemoryKind::Gtt];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Vram => "VRAM memory",
            Self::VisibleVram => "Visible VRAM memory",
            Self::Gtt => "GTT memory",
        }
    }

    fn sysfs_stem(&self) -> &'static str {
        match self {
            Self::Vram => "vram",
            Self::VisibleVram => "vis_vram",
            Self::Gtt => "gtt",
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum TelemetryError {
    /// The monitoring facility is not available on this system.
    Unavailable(String),
    Io { path: PathBuf, source: io::Error },
    Parse { path: PathBuf, content: String },
    DeviceOutOfRange { device: usize, count: usize },
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(reason) => write!(f, "Device monitoring unavailable: {}", reason),
            Self::Io { path, source } => write!(f, "Failed to read {}: {}", path.display(), source),
            Self::Parse { path, content } => {
                write!(f, "Unexpected content {:?} in {}", content, path.display())
            }
            Self::DeviceOutOfRange { device, count } => {
                write!(f, "Device {} out of range ({} devices monitored)", device, count)
            }
        }
    }
}

impl std::error::Error for TelemetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A backend that can query device memory statistics.
///
/// Queries are only issued by [`Telemetry`] between a successful `initialize` and `shutdown`.
pub trait MemoryMonitor {
    fn initialize(&mut self) -> Result<(), TelemetryError>;

    fn shutdown(&mut self) -> Result<(), TelemetryError>;

    fn device_count(&self) -> usize;

    /// Percentage of time the device memory was busy.
    fn memory_busy_percent(&self, device: usize) -> Result<u64, TelemetryError>;

    /// Memory in use, in bytes.
    fn memory_used(&self, device: usize, kind: MemoryKind) -> Result<u64, TelemetryError>;

    /// Total memory, in bytes.
    fn memory_total(&self, device: usize, kind: MemoryKind) -> Result<u64, TelemetryError>;
}

/// A monitor for systems without device monitoring. Initialization always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMonitor;

impl MemoryMonitor for NullMonitor {
    fn initialize(&mut self) -> Result<(), TelemetryError> {
        Err(TelemetryError::Unavailable("no monitoring backend".to_string()))
    }

    fn shutdown(&mut self) -> Result<(), TelemetryError> {
        Ok(())
    }

    fn device_count(&self) -> usize {
        0
    }

    fn memory_busy_percent(&self, device: usize) -> Result<u64, TelemetryError> {
        Err(TelemetryError::DeviceOutOfRange { device, count: 0 })
    }

    fn memory_used(&self, device: usize, _kind: MemoryKind) -> Result<u64, TelemetryError> {
        Err(TelemetryError::DeviceOutOfRange { device, count: 0 })
    }

    fn memory_total(&self, device: usize, _kind: MemoryKind) -> Result<u64, TelemetryError> {
        Err(TelemetryError::DeviceOutOfRange { device, count: 0 })
    }
}

/// Reads memory statistics of GPUs exposed by the Linux DRM subsystem.
///
/// Devices are the `card<N>` entries of the DRM class directory whose `device` subdirectory
/// provides `mem_info_vram_total`, ordered by `N`.
#[derive(Debug, Clone)]
pub struct SysfsMonitor {
    root: PathBuf,
    devices: Vec<PathBuf>,
}

impl Default for SysfsMonitor {
    fn default() -> Self {
        Self::with_root("/sys/class/drm")
    }
}

impl SysfsMonitor {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            devices: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn device_dir(&self, device: usize) -> Result<&Path, TelemetryError> {
        self.devices
            .get(device)
            .map(PathBuf::as_path)
            .ok_or(TelemetryError::DeviceOutOfRange {
                device,
                count: self.devices.len(),
            })
    }

    fn read_value(&self, device: usize, file_name: &str) -> Result<u64, TelemetryError> {
        let path = self.device_dir(device)?.join(file_name);
        let content = fs::read_to_string(&path).map_err(|source| TelemetryError::Io {
            path: path.clone(),
            source,
        })?;
        content
            .trim()
            .parse()
            .map_err(|_| TelemetryError::Parse { path, content })
    }
}

fn card_number(name: &str) -> Option<u32> {
    name.strip_prefix("card")?.parse().ok()
}

impl MemoryMonitor for SysfsMonitor {
    fn initialize(&mut self) -> Result<(), TelemetryError> {
        let entries = fs::read_dir(&self.root).map_err(|source| TelemetryError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut cards: Vec<(u32, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let number = card_number(entry.file_name().to_str()?)?;
                let device_dir = entry.path().join("device");
                device_dir
                    .join("mem_info_vram_total")
                    .is_file()
                    .then(|| (number, device_dir))
            })
            .collect();
        cards.sort_by_key(|(number, _)| *number);

        if cards.is_empty() {
            return Err(TelemetryError::Unavailable(format!(
                "no devices with memory info found in {}",
                self.root.display()
            )));
        }
        self.devices = cards.into_iter().map(|(_, dir)| dir).collect();
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), TelemetryError> {
        self.devices.clear();
        Ok(())
    }

    fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn memory_busy_percent(&self, device: usize) -> Result<u64, TelemetryError> {
        self.read_value(device, "mem_busy_percent")
    }

    fn memory_used(&self, device: usize, kind: MemoryKind) -> Result<u64, TelemetryError> {
        self.read_value(device, &format!("mem_info_{}_used", kind.sysfs_stem()))
    }

    fn memory_total(&self, device: usize, kind: MemoryKind) -> Result<u64, TelemetryError> {
        self.read_value(device, &format!("mem_info_{}_total", kind.sysfs_stem()))
    }
}

const NOT_INITIALISED: &str = "device monitoring not initialised";

/// A scoped handle to an initialized memory monitor.
///
/// Reports are produced per device, tagged with a caller-supplied label and the rank of the
/// process. A disabled handle produces a single line stating that monitoring is not initialised.
#[derive(Debug)]
pub struct Telemetry<M: MemoryMonitor> {
    monitor: Option<M>,
    rank: usize,
}

impl<M: MemoryMonitor> Telemetry<M> {
    /// Initializes the monitor and takes ownership of it.
    pub fn initialize(mut monitor: M, rank: usize) -> Result<Self, TelemetryError> {
        monitor.initialize()?;
        Ok(Self {
            monitor: Some(monitor),
            rank,
        })
    }

    /// Like [`initialize`](Self::initialize), but returns a disabled handle on failure.
    pub fn initialize_or_disabled(monitor: M, rank: usize) -> Self {
        Self::initialize(monitor, rank).unwrap_or_else(|err| {
            warn!("{}", err);
            Self::disabled(rank)
        })
    }

    pub fn disabled(rank: usize) -> Self {
        Self { monitor: None, rank }
    }

    pub fn is_enabled(&self) -> bool {
        self.monitor.is_some()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn device_count(&self) -> usize {
        self.monitor.as_ref().map_or(0, |m| m.device_count())
    }

    /// Builds one line per device with `line`. Devices for which `line` fails are skipped.
    fn report(
        &self,
        label: &str,
        what: &str,
        line: impl Fn(&M, usize) -> Result<String, TelemetryError>,
    ) -> Vec<String> {
        let monitor = match &self.monitor {
            Some(monitor) => monitor,
            None => return vec![NOT_INITIALISED.to_string()],
        };
        (0..monitor.device_count())
            .filter_map(|device| match line(monitor, device) {
                Ok(values) => Some(format!("{} rank {} device {} {}:{}", label, self.rank, device, what, values)),
                Err(err) => {
                    warn!("Skipping {} of device {}: {}", what, device, err);
                    None
                }
            })
            .collect()
    }

    fn per_kind(
        monitor: &M,
        device: usize,
        value: impl Fn(&M, usize, MemoryKind) -> Result<String, TelemetryError>,
    ) -> Result<String, TelemetryError> {
        let mut line = String::new();
        for kind in MemoryKind::ALL {
            line.push_str(&format!(" {} {}", kind.name(), value(monitor, device, kind)?));
        }
        Ok(line)
    }

    pub fn memory_busy_report(&self, label: &str) -> Vec<String> {
        self.report(label, "memory busy %", |m, device| {
            Ok(format!(" {}", m.memory_busy_percent(device)?))
        })
    }

    pub fn memory_used_report(&self, label: &str) -> Vec<String> {
        self.report(label, "memory used", |m, device| {
            Self::per_kind(m, device, |m, device, kind| Ok(m.memory_used(device, kind)?.to_string()))
        })
    }

    pub fn memory_total_report(&self, label: &str) -> Vec<String> {
        self.report(label, "total memory", |m, device| {
            Self::per_kind(m, device, |m, device, kind| Ok(m.memory_total(device, kind)?.to_string()))
        })
    }

    /// Percentage of used memory per kind. A kind with zero total memory reports `0`.
    pub fn memory_percentage_used_report(&self, label: &str) -> Vec<String> {
        self.report(label, "% memory used", |m, device| {
            Self::per_kind(m, device, |m, device, kind| {
                let total = m.memory_total(device, kind)?;
                let used = m.memory_used(device, kind)?;
                let percentage = if total == 0 {
                    0.0
                } else {
                    used as f64 * 100.0 / total as f64
                };
                Ok(format!("{:.2}", percentage))
            })
        })
    }

    pub fn log_memory_busy(&self, label: &str) {
        self.memory_busy_report(label).iter().for_each(|line| info!("{}", line));
    }

    pub fn log_memory_used(&self, label: &str) {
        self.memory_used_report(label).iter().for_each(|line| info!("{}", line));
    }

    pub fn log_memory_total(&self, label: &str) {
        self.memory_total_report(label).iter().for_each(|line| info!("{}", line));
    }

    pub fn log_memory_percentage_used(&self, label: &str) {
        self.memory_percentage_used_report(label)
            .iter()
            .for_each(|line| info!("{}", line));
    }
}

impl<M: MemoryMonitor> Drop for Telemetry<M> {
    fn drop(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            if let Err(err) = monitor.shutdown() {
                warn!("Failed to shut down device monitoring: {}", err);
            }
        }
    }
}
