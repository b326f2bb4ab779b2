//! Reduction tuning configuration with TOML, environment variable, and
//! default config sources.
//!
//! Environment variables:
//!
//! | Variable | Format | Example |
//! |---|---|---|
//! | `BITNET_REDUCTION_PREFERRED_WG_SIZE` | `class:size` list, `*` for all | `cpu:32,gpu:256` |
//! | `BITNET_REDUCTION_KERNEL_BUNDLES` | backend list, `all` or `none` | `cuda,level_zero` |
//! | `BITNET_REDUCTION_REGISTER_CLAMP` | bool | `0` |

use std::path::Path;
use std::{env, fmt, fs};

use serde::{Deserialize, Serialize};

use crate::device::{Backend, DeviceClass};

pub const ENV_PREFERRED_WG_SIZE: &str = "BITNET_REDUCTION_PREFERRED_WG_SIZE";
pub const ENV_KERNEL_BUNDLES: &str = "BITNET_REDUCTION_KERNEL_BUNDLES";
pub const ENV_REGISTER_CLAMP: &str = "BITNET_REDUCTION_REGISTER_CLAMP";

// ── Errors ──────────────────────────────────────────────────────────

/// Errors produced by configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("unknown device class: {0}")]
    UnknownDeviceClass(String),

    #[error("invalid work-group size entry: {0}")]
    InvalidSizeEntry(String),

    #[error("invalid environment variable value for {key}: {value}")]
    InvalidEnvVar { key: String, value: String },
}

// ── OverrideLookup ──────────────────────────────────────────────────

/// Source of user-configured preferred work-group sizes.
///
/// Injected into the planner instead of read from process-wide state, so
/// callers can supply a closure, a parsed config, or nothing at all.
pub trait OverrideLookup {
    /// Configured size for `class`, if any. `Some(0)` is treated as unset.
    fn preferred_work_group_size(&self, class: DeviceClass) -> Option<usize>;
}

impl<F> OverrideLookup for F
where
    F: Fn(DeviceClass) -> Option<usize>,
{
    fn preferred_work_group_size(&self, class: DeviceClass) -> Option<usize> {
        self(class)
    }
}

// ── PreferredSizeOverrides ──────────────────────────────────────────

/// Per-class preferred work-group sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PreferredSizeOverrides {
    pub cpu: Option<usize>,
    pub gpu: Option<usize>,
    #[serde(alias = "acc")]
    pub accelerator: Option<usize>,
}

impl PreferredSizeOverrides {
    #[must_use]
    pub const fn get(&self, class: DeviceClass) -> Option<usize> {
        match class {
            DeviceClass::Cpu => self.cpu,
            DeviceClass::Gpu => self.gpu,
            DeviceClass::Accelerator => self.accelerator,
            DeviceClass::Other => None,
        }
    }

    pub fn set(&mut self, class: DeviceClass, size: usize) {
        match class {
            DeviceClass::Cpu => self.cpu = Some(size),
            DeviceClass::Gpu => self.gpu = Some(size),
            DeviceClass::Accelerator => self.accelerator = Some(size),
            DeviceClass::Other => {}
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.gpu.is_none() && self.accelerator.is_none()
    }

    /// Entries from `other` win over entries in `self`.
    #[must_use]
    pub fn merge_with(&self, other: &Self) -> Self {
        Self {
            cpu: other.cpu.or(self.cpu),
            gpu: other.gpu.or(self.gpu),
            accelerator: other.accelerator.or(self.accelerator),
        }
    }
}

impl std::str::FromStr for PreferredSizeOverrides {
    type Err = ConfigError;

    /// Parse `cpu:16,gpu:256,acc:64`. `*:N` sets every class; later entries
    /// override earlier ones.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut overrides = Self::default();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (class, size) = entry
                .split_once(':')
                .ok_or_else(|| ConfigError::InvalidSizeEntry(entry.to_string()))?;
            let size = size
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| ConfigError::InvalidSizeEntry(entry.to_string()))?;
            if class.trim() == "*" {
                overrides = Self { cpu: Some(size), gpu: Some(size), accelerator: Some(size) };
            } else {
                overrides.set(class.parse()?, size);
            }
        }
        Ok(overrides)
    }
}

impl OverrideLookup for PreferredSizeOverrides {
    fn preferred_work_group_size(&self, class: DeviceClass) -> Option<usize> {
        self.get(class)
    }
}

// ── KernelBundlePolicy ──────────────────────────────────────────────

/// Which backends should plan against precompiled kernels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum KernelBundlePolicy {
    #[default]
    Disabled,
    All,
    Backends(Vec<Backend>),
}

impl KernelBundlePolicy {
    #[must_use]
    pub fn enabled_for(&self, backend: Backend) -> bool {
        match self {
            Self::Disabled => false,
            Self::All => true,
            Self::Backends(list) => list.contains(&backend),
        }
    }
}

impl fmt::Display for KernelBundlePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "none"),
            Self::All => write!(f, "all"),
            Self::Backends(list) => {
                let names: Vec<String> = list.iter().map(ToString::to_string).collect();
                write!(f, "{}", names.join(","))
            }
        }
    }
}

impl std::str::FromStr for KernelBundlePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "0" | "false" | "off" => Ok(Self::Disabled),
            "all" | "*" | "1" | "true" | "on" => Ok(Self::All),
            list => {
                let mut backends = Vec::new();
                for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                    let backend: Backend = name.parse()?;
                    if !backends.contains(&backend) {
                        backends.push(backend);
                    }
                }
                Ok(Self::Backends(backends))
            }
        }
    }
}

impl TryFrom<String> for KernelBundlePolicy {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KernelBundlePolicy> for String {
    fn from(policy: KernelBundlePolicy) -> Self {
        policy.to_string()
    }
}

// ── EnvOverrides ────────────────────────────────────────────────────

/// Values read from `BITNET_REDUCTION_*` variables. `None` means the
/// variable is not set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvOverrides {
    pub preferred_work_group_size: Option<PreferredSizeOverrides>,
    pub kernel_bundles: Option<KernelBundlePolicy>,
    pub register_clamp: Option<bool>,
}

impl EnvOverrides {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut overrides = Self::default();

        if let Ok(v) = env::var(ENV_PREFERRED_WG_SIZE) {
            overrides.preferred_work_group_size =
                Some(v.parse().map_err(|_| ConfigError::InvalidEnvVar {
                    key: ENV_PREFERRED_WG_SIZE.to_string(),
                    value: v.clone(),
                })?);
        }
        if let Ok(v) = env::var(ENV_KERNEL_BUNDLES) {
            overrides.kernel_bundles = Some(v.parse().map_err(|_| ConfigError::InvalidEnvVar {
                key: ENV_KERNEL_BUNDLES.to_string(),
                value: v.clone(),
            })?);
        }
        if let Ok(v) = env::var(ENV_REGISTER_CLAMP) {
            overrides.register_clamp =
                Some(ReductionConfig::parse_env_bool(ENV_REGISTER_CLAMP, &v)?);
        }

        Ok(overrides)
    }

    /// Replace every field of `base` whose variable is set. Size lists merge
    /// per class, so `gpu:256` keeps a file-configured CPU size.
    #[must_use]
    pub fn apply(self, base: ReductionConfig) -> ReductionConfig {
        ReductionConfig {
            preferred_work_group_size: match self.preferred_work_group_size {
                Some(sizes) => base.preferred_work_group_size.merge_with(&sizes),
                None => base.preferred_work_group_size,
            },
            kernel_bundles: self.kernel_bundles.unwrap_or(base.kernel_bundles),
            register_clamp: self.register_clamp.unwrap_or(base.register_clamp),
        }
    }
}

// ── TOML wrapper ────────────────────────────────────────────────────

/// Wrapper used for the `[reduction]` table in TOML files.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TomlWrapper {
    reduction: ReductionConfig,
}

// ── ReductionConfig ─────────────────────────────────────────────────

/// Tuning knobs for reduction work-group planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    pub preferred_work_group_size: PreferredSizeOverrides,
    pub kernel_bundles: KernelBundlePolicy,
    /// Apply the register-budget clamp on devices that report a budget.
    /// Off by default; when on, sizes on budgeted devices shrink to a power
    /// of two.
    pub register_clamp: bool,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            preferred_work_group_size: PreferredSizeOverrides::default(),
            kernel_bundles: KernelBundlePolicy::Disabled,
            register_clamp: false,
        }
    }
}

impl ReductionConfig {
    // ── Constructors ────────────────────────────────────────────

    /// Load configuration from a TOML file at `path`.
    ///
    /// The file is expected to contain a `[reduction]` table. If the file
    /// does not exist, returns `Ok(Self::default())`.
    pub fn from_toml(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "reduction config file not found; using defaults"
            );
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let wrapper: TomlWrapper = toml::from_str(text)?;
        Ok(wrapper.reduction)
    }

    /// Serialize to a TOML string (wrapped in `[reduction]`).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let wrapper = TomlWrapper { reduction: self.clone() };
        Ok(toml::to_string_pretty(&wrapper)?)
    }

    /// Build a config from `BITNET_REDUCTION_*` environment vars on top of
    /// `Self::default()`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(EnvOverrides::from_env()?.apply(Self::default()))
    }

    /// File config with environment overrides on top.
    ///
    /// Every variable that is set replaces the file value, including values
    /// equal to the default (`BITNET_REDUCTION_KERNEL_BUNDLES=none` disables
    /// bundles the file enabled).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(p) => Self::from_toml(p)?,
            None => Self::default(),
        };
        let merged = EnvOverrides::from_env()?.apply(base);
        merged.validate()?;
        Ok(merged)
    }

    // ── Validation ──────────────────────────────────────────────

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes = &self.preferred_work_group_size;
        for (class, size) in [
            (DeviceClass::Cpu, sizes.cpu),
            (DeviceClass::Gpu, sizes.gpu),
            (DeviceClass::Accelerator, sizes.accelerator),
        ] {
            if size == Some(0) {
                return Err(ConfigError::Validation(format!(
                    "preferred work-group size for {class} must be > 0 when set"
                )));
            }
        }
        match &self.kernel_bundles {
            KernelBundlePolicy::Backends(list) if list.is_empty() => Err(ConfigError::Validation(
                "kernel bundle backend list is empty; use \"none\" to disable".into(),
            )),
            _ => Ok(()),
        }
    }

    // ── Merge ───────────────────────────────────────────────────

    /// Overlay `other` on top of `self`. Fields in `other` that differ
    /// from the default take precedence.
    #[must_use]
    pub fn merge_with(&self, other: &Self) -> Self {
        let d = Self::default();
        Self {
            preferred_work_group_size: self
                .preferred_work_group_size
                .merge_with(&other.preferred_work_group_size),
            kernel_bundles: if other.kernel_bundles == d.kernel_bundles {
                self.kernel_bundles.clone()
            } else {
                other.kernel_bundles.clone()
            },
            register_clamp: if other.register_clamp == d.register_clamp {
                self.register_clamp
            } else {
                other.register_clamp
            },
        }
    }

    // ── Helpers ─────────────────────────────────────────────────

    fn parse_env_bool(key: &str, val: &str) -> Result<bool, ConfigError> {
        match val.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidEnvVar { key: key.to_string(), value: val.to_string() }),
        }
    }
}

impl OverrideLookup for ReductionConfig {
    fn preferred_work_group_size(&self, class: DeviceClass) -> Option<usize> {
        self.preferred_work_group_size.get(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let cfg = ReductionConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(!cfg.register_clamp);
        assert!(cfg.preferred_work_group_size.is_empty());
    }

    #[test]
    fn parse_overrides_list() {
        let o: PreferredSizeOverrides = "cpu:32, gpu:256,acc:64".parse().unwrap();
        assert_eq!(o.cpu, Some(32));
        assert_eq!(o.gpu, Some(256));
        assert_eq!(o.accelerator, Some(64));
        assert_eq!(o.get(DeviceClass::Other), None);
    }

    #[test]
    fn parse_overrides_wildcard_then_specific() {
        let o: PreferredSizeOverrides = "*:64,gpu:128".parse().unwrap();
        assert_eq!(
            o,
            PreferredSizeOverrides { cpu: Some(64), gpu: Some(128), accelerator: Some(64) }
        );
    }

    #[test]
    fn parse_overrides_rejects_garbage() {
        assert!("cpu".parse::<PreferredSizeOverrides>().is_err());
        assert!("cpu:abc".parse::<PreferredSizeOverrides>().is_err());
        assert!("cpu:0".parse::<PreferredSizeOverrides>().is_err());
        assert!("tpu:16".parse::<PreferredSizeOverrides>().is_err());
    }

    #[test]
    fn parse_overrides_empty_string_is_empty() {
        let o: PreferredSizeOverrides = "".parse().unwrap();
        assert!(o.is_empty());
    }

    #[test]
    fn kernel_bundle_policy_parsing() {
        assert_eq!("none".parse::<KernelBundlePolicy>().unwrap(), KernelBundlePolicy::Disabled);
        assert_eq!("ALL".parse::<KernelBundlePolicy>().unwrap(), KernelBundlePolicy::All);
        let p: KernelBundlePolicy = "cuda, level_zero, cuda".parse().unwrap();
        assert_eq!(p, KernelBundlePolicy::Backends(vec![Backend::Cuda, Backend::LevelZero]));
        assert!(p.enabled_for(Backend::Cuda));
        assert!(!p.enabled_for(Backend::OpenCl));
        assert!("cuda,metal".parse::<KernelBundlePolicy>().is_err());
    }

    #[test]
    fn kernel_bundle_policy_display_roundtrip() {
        for p in [
            KernelBundlePolicy::Disabled,
            KernelBundlePolicy::All,
            KernelBundlePolicy::Backends(vec![Backend::Hip, Backend::OpenCl]),
        ] {
            let parsed: KernelBundlePolicy = p.to_string().parse().unwrap();
            assert_eq!(p, parsed);
        }
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = ReductionConfig {
            preferred_work_group_size: PreferredSizeOverrides {
                cpu: Some(8),
                gpu: None,
                accelerator: Some(128),
            },
            kernel_bundles: KernelBundlePolicy::Backends(vec![Backend::Cuda]),
            register_clamp: false,
        };
        let text = cfg.to_toml().unwrap();
        assert!(text.contains("[reduction]"));
        let back = ReductionConfig::from_toml_str(&text).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn toml_partial_table_uses_defaults() {
        let cfg = ReductionConfig::from_toml_str(
            r#"
            [reduction]
            kernel_bundles = "cuda"

            [reduction.preferred_work_group_size]
            gpu = 512
            "#,
        )
        .unwrap();
        assert_eq!(cfg.preferred_work_group_size.gpu, Some(512));
        assert!(!cfg.register_clamp);
        assert!(cfg.kernel_bundles.enabled_for(Backend::Cuda));
    }

    #[test]
    fn toml_bad_backend_is_error() {
        let r = ReductionConfig::from_toml_str("[reduction]\nkernel_bundles = \"metal\"\n");
        assert!(r.is_err());
    }

    #[test]
    fn validate_rejects_zero_override() {
        let mut cfg = ReductionConfig::default();
        cfg.preferred_work_group_size.gpu = Some(0);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("gpu"));
    }

    #[test]
    fn validate_rejects_empty_backend_list() {
        let cfg = ReductionConfig {
            kernel_bundles: KernelBundlePolicy::Backends(vec![]),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn merge_prefers_non_default_other() {
        let base = ReductionConfig {
            preferred_work_group_size: PreferredSizeOverrides {
                cpu: Some(8),
                gpu: Some(64),
                accelerator: None,
            },
            kernel_bundles: KernelBundlePolicy::All,
            register_clamp: false,
        };
        let overlay = ReductionConfig {
            preferred_work_group_size: PreferredSizeOverrides {
                cpu: None,
                gpu: Some(256),
                accelerator: None,
            },
            ..Default::default()
        };
        let merged = base.merge_with(&overlay);
        assert_eq!(merged.preferred_work_group_size.cpu, Some(8));
        assert_eq!(merged.preferred_work_group_size.gpu, Some(256));
        assert_eq!(merged.kernel_bundles, KernelBundlePolicy::All);
        assert!(!merged.register_clamp);
    }

    #[test]
    fn env_overrides_replace_set_fields_even_when_default() {
        let file = ReductionConfig {
            preferred_work_group_size: PreferredSizeOverrides {
                cpu: Some(8),
                gpu: Some(64),
                accelerator: None,
            },
            kernel_bundles: KernelBundlePolicy::All,
            register_clamp: true,
        };
        let env = EnvOverrides {
            preferred_work_group_size: Some(PreferredSizeOverrides {
                gpu: Some(256),
                ..Default::default()
            }),
            kernel_bundles: Some(KernelBundlePolicy::Disabled),
            register_clamp: Some(false),
        };
        let cfg = env.apply(file);
        assert_eq!(cfg.preferred_work_group_size.cpu, Some(8));
        assert_eq!(cfg.preferred_work_group_size.gpu, Some(256));
        assert_eq!(cfg.kernel_bundles, KernelBundlePolicy::Disabled);
        assert!(!cfg.register_clamp);
    }

    #[test]
    fn unset_env_overrides_keep_base() {
        let file = ReductionConfig {
            kernel_bundles: KernelBundlePolicy::All,
            register_clamp: true,
            ..Default::default()
        };
        assert_eq!(EnvOverrides::default().apply(file.clone()), file);
    }

    #[test]
    fn closures_are_override_lookups() {
        let lookup = |class: DeviceClass| (class == DeviceClass::Gpu).then_some(128);
        assert_eq!(lookup.preferred_work_group_size(DeviceClass::Gpu), Some(128));
        assert_eq!(lookup.preferred_work_group_size(DeviceClass::Cpu), None);
    }
}
