//! Device and kernel capability queries used by the work-group planner.
//!
//! The planner never talks to a driver directly. It consumes the
//! [`DeviceQuery`] and [`KernelQuery`] traits, which the dispatch layer
//! implements on top of its own device objects. [`DeviceLimits`] is a plain
//! value implementation with vendor presets so planning can run (and be
//! tested) without real hardware.

use std::path::Path;
use std::{fmt, fs};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Registers a single work-item may use when the kernel's real usage is
/// unknown (the CUDA per-thread maximum of 32-bit registers).
pub const DEFAULT_REGISTERS_PER_WORK_ITEM: usize = 255;

// ── DeviceClass ─────────────────────────────────────────────────────

/// Broad device category, used to pick the preferred-size policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Cpu,
    #[default]
    Gpu,
    #[serde(alias = "acc")]
    Accelerator,
    Other,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu => write!(f, "gpu"),
            Self::Accelerator => write!(f, "accelerator"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for DeviceClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            "acc" | "accelerator" => Ok(Self::Accelerator),
            "other" => Ok(Self::Other),
            other => Err(ConfigError::UnknownDeviceClass(other.to_string())),
        }
    }
}

// ── Backend ─────────────────────────────────────────────────────────

/// Runtime backend a device is driven through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    #[serde(alias = "l0", alias = "level-zero")]
    LevelZero,
    #[serde(rename = "opencl", alias = "ocl", alias = "open_cl")]
    OpenCl,
    Cuda,
    #[serde(alias = "rocm")]
    Hip,
    NativeCpu,
    Other,
}

impl Backend {
    /// Every backend, in declaration order.
    pub const ALL: [Self; 6] =
        [Self::LevelZero, Self::OpenCl, Self::Cuda, Self::Hip, Self::NativeCpu, Self::Other];
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LevelZero => write!(f, "level_zero"),
            Self::OpenCl => write!(f, "opencl"),
            Self::Cuda => write!(f, "cuda"),
            Self::Hip => write!(f, "hip"),
            Self::NativeCpu => write!(f, "native_cpu"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "level_zero" | "l0" => Ok(Self::LevelZero),
            "opencl" | "ocl" => Ok(Self::OpenCl),
            "cuda" => Ok(Self::Cuda),
            "hip" | "rocm" => Ok(Self::Hip),
            "native_cpu" => Ok(Self::NativeCpu),
            "other" => Ok(Self::Other),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

// ── Query traits ────────────────────────────────────────────────────

/// Capability queries the planner issues against a device.
///
/// Implementations are expected to be cheap; the planner may call the same
/// query several times while planning one submission.
pub trait DeviceQuery {
    /// Maximum number of work-items in one work-group.
    fn max_work_group_size(&self) -> usize;

    /// Local (shared) memory available to one work-group, in bytes.
    fn local_memory_bytes(&self) -> usize;

    /// Number of compute units (SMs / EUs / CUs).
    fn compute_units(&self) -> u32;

    fn device_class(&self) -> DeviceClass;

    fn backend(&self) -> Backend;

    /// Register file available to one work-group, when the architecture
    /// exposes a fixed budget.
    fn max_registers_per_group(&self) -> Option<usize> {
        None
    }

    /// Registers assumed per work-item for the register-budget clamp.
    fn registers_per_work_item(&self) -> usize {
        DEFAULT_REGISTERS_PER_WORK_ITEM
    }

    /// Device shares physical memory with the host (integrated GPUs).
    fn host_unified_memory(&self) -> bool {
        false
    }
}

/// Per-kernel work-group limit, as reported once a kernel is compiled for a
/// specific device.
pub trait KernelQuery {
    /// Kernel name, for diagnostics.
    fn name(&self) -> &str;

    /// Maximum work-group size for this kernel on `device`.
    ///
    /// Backends that do not implement the query report `0`.
    fn work_group_size(&self, device: &dyn DeviceQuery) -> usize;
}

/// A kernel whose work-group limit is already known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedKernelLimit {
    pub name: String,
    /// `0` means the backend could not answer.
    pub work_group_size: usize,
}

impl FixedKernelLimit {
    pub fn new(name: impl Into<String>, work_group_size: usize) -> Self {
        Self { name: name.into(), work_group_size }
    }

    /// A kernel whose backend does not implement the per-kernel query.
    pub fn unsupported(name: impl Into<String>) -> Self {
        Self::new(name, 0)
    }
}

impl KernelQuery for FixedKernelLimit {
    fn name(&self) -> &str {
        &self.name
    }

    fn work_group_size(&self, _device: &dyn DeviceQuery) -> usize {
        self.work_group_size
    }
}

// ── DeviceLimits ────────────────────────────────────────────────────

/// Static device description.
///
/// Can be built from a preset, deserialized from a `[device]` TOML table,
/// or filled in by the dispatch layer from live driver queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceLimits {
    pub name: String,
    pub class: DeviceClass,
    pub backend: Backend,
    pub max_work_group_size: usize,
    pub local_memory_bytes: usize,
    pub compute_units: u32,
    pub max_registers_per_group: Option<usize>,
    pub registers_per_work_item: usize,
    pub host_unified_memory: bool,
}

#[derive(Debug, Deserialize)]
struct DeviceFile {
    device: DeviceLimits,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self::generic()
    }
}

impl DeviceLimits {
    /// NVIDIA discrete GPU through CUDA (64K registers per block).
    #[must_use]
    pub fn nvidia() -> Self {
        Self {
            name: "nvidia".into(),
            class: DeviceClass::Gpu,
            backend: Backend::Cuda,
            max_work_group_size: 1024,
            local_memory_bytes: 49152,
            compute_units: 128,
            max_registers_per_group: Some(65536),
            registers_per_work_item: DEFAULT_REGISTERS_PER_WORK_ITEM,
            host_unified_memory: false,
        }
    }

    /// AMD discrete GPU through HIP.
    #[must_use]
    pub fn amd() -> Self {
        Self {
            name: "amd".into(),
            class: DeviceClass::Gpu,
            backend: Backend::Hip,
            max_work_group_size: 1024,
            local_memory_bytes: 65536,
            compute_units: 120,
            max_registers_per_group: None,
            registers_per_work_item: DEFAULT_REGISTERS_PER_WORK_ITEM,
            host_unified_memory: false,
        }
    }

    /// Intel Arc discrete GPU through Level Zero.
    #[must_use]
    pub fn intel_arc() -> Self {
        Self {
            name: "intel-arc".into(),
            class: DeviceClass::Gpu,
            backend: Backend::LevelZero,
            max_work_group_size: 1024,
            local_memory_bytes: 65536,
            compute_units: 512,
            max_registers_per_group: None,
            registers_per_work_item: DEFAULT_REGISTERS_PER_WORK_ITEM,
            host_unified_memory: false,
        }
    }

    /// Intel integrated graphics (shares memory with the host).
    #[must_use]
    pub fn intel_integrated() -> Self {
        Self {
            name: "intel-integrated".into(),
            class: DeviceClass::Gpu,
            backend: Backend::LevelZero,
            max_work_group_size: 512,
            local_memory_bytes: 65536,
            compute_units: 96,
            max_registers_per_group: None,
            registers_per_work_item: DEFAULT_REGISTERS_PER_WORK_ITEM,
            host_unified_memory: true,
        }
    }

    /// Multi-core host CPU through OpenCL.
    #[must_use]
    pub fn cpu() -> Self {
        Self {
            name: "cpu".into(),
            class: DeviceClass::Cpu,
            backend: Backend::OpenCl,
            max_work_group_size: 8192,
            local_memory_bytes: 262_144,
            compute_units: 16,
            max_registers_per_group: None,
            registers_per_work_item: DEFAULT_REGISTERS_PER_WORK_ITEM,
            host_unified_memory: true,
        }
    }

    /// FPGA-style accelerator.
    #[must_use]
    pub fn accelerator() -> Self {
        Self {
            name: "accelerator".into(),
            class: DeviceClass::Accelerator,
            backend: Backend::OpenCl,
            max_work_group_size: 8192,
            local_memory_bytes: 65536,
            compute_units: 1,
            max_registers_per_group: None,
            registers_per_work_item: DEFAULT_REGISTERS_PER_WORK_ITEM,
            host_unified_memory: false,
        }
    }

    /// Generic fallback with conservative limits.
    #[must_use]
    pub fn generic() -> Self {
        Self {
            name: "generic".into(),
            class: DeviceClass::Gpu,
            backend: Backend::OpenCl,
            max_work_group_size: 256,
            local_memory_bytes: 32768,
            compute_units: 16,
            max_registers_per_group: None,
            registers_per_work_item: DEFAULT_REGISTERS_PER_WORK_ITEM,
            host_unified_memory: false,
        }
    }

    /// Names accepted by [`DeviceLimits::preset`].
    pub const PRESETS: [&'static str; 7] =
        ["nvidia", "amd", "intel-arc", "intel-integrated", "cpu", "accelerator", "generic"];

    /// Parse a `[device]` table.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let wrapper: DeviceFile = toml::from_str(text)?;
        let limits = wrapper.device;
        if limits.max_work_group_size == 0 {
            return Err(ConfigError::Validation("max_work_group_size must be > 0".into()));
        }
        Ok(limits)
    }

    /// Load a device description from a TOML file with a `[device]` table.
    pub fn from_toml(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "nvidia" | "cuda" => Some(Self::nvidia()),
            "amd" | "hip" => Some(Self::amd()),
            "intel-arc" | "arc" => Some(Self::intel_arc()),
            "intel-integrated" | "igpu" => Some(Self::intel_integrated()),
            "cpu" => Some(Self::cpu()),
            "accelerator" | "acc" => Some(Self::accelerator()),
            "generic" => Some(Self::generic()),
            _ => None,
        }
    }
}

impl DeviceQuery for DeviceLimits {
    fn max_work_group_size(&self) -> usize {
        self.max_work_group_size
    }

    fn local_memory_bytes(&self) -> usize {
        self.local_memory_bytes
    }

    fn compute_units(&self) -> u32 {
        self.compute_units
    }

    fn device_class(&self) -> DeviceClass {
        self.class
    }

    fn backend(&self) -> Backend {
        self.backend
    }

    fn max_registers_per_group(&self) -> Option<usize> {
        self.max_registers_per_group
    }

    fn registers_per_work_item(&self) -> usize {
        self.registers_per_work_item
    }

    fn host_unified_memory(&self) -> bool {
        self.host_unified_memory
    }
}
