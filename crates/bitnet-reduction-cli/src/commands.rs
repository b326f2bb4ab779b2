//! Subcommand implementations.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::Serialize;

use bitnet_reduction_planner::{
    DeviceLimits, DeviceQuery, FixedKernelLimit, KernelQuery, LaunchPlan, ReductionConfig,
    ReductionPlanner,
};

use crate::output::{OutputFormat, emit};

/// Device selection shared by every sizing command.
#[derive(Args, Debug)]
pub struct DeviceArgs {
    /// Device preset (see `presets`); defaults to `generic`
    #[arg(short, long, value_name = "PRESET", conflicts_with_all = ["device_file", "no_device"])]
    pub device: Option<String>,

    /// TOML file with a [device] table
    #[arg(long, value_name = "PATH", conflicts_with = "no_device")]
    pub device_file: Option<PathBuf>,

    /// Plan with no bound device (deferred graph construction)
    #[arg(long)]
    pub no_device: bool,
}

impl DeviceArgs {
    pub fn resolve(&self) -> Result<Option<DeviceLimits>> {
        if self.no_device {
            return Ok(None);
        }
        if let Some(path) = &self.device_file {
            let limits = DeviceLimits::from_toml(path)
                .with_context(|| format!("Failed to load device file {}", path.display()))?;
            return Ok(Some(limits));
        }
        let name = self.device.as_deref().unwrap_or("generic");
        match DeviceLimits::preset(name) {
            Some(limits) => Ok(Some(limits)),
            None => bail!(
                "unknown device preset '{name}' (known: {})",
                DeviceLimits::PRESETS.join(", ")
            ),
        }
    }
}

fn planner_for<'a>(
    device: Option<&'a DeviceLimits>,
    config: &ReductionConfig,
) -> ReductionPlanner<'a> {
    match device {
        Some(d) => ReductionPlanner::new(d, config.clone()),
        None => ReductionPlanner::deferred(config.clone()),
    }
}

fn device_name(device: Option<&DeviceLimits>) -> String {
    device.map_or_else(|| "none".to_string(), |d| d.name.clone())
}

// ── plan ────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct PlanCommand {
    /// Number of work-items to reduce
    #[arg(short = 'n', long, value_name = "N")]
    pub work_items: usize,

    /// Local memory bytes each work-item needs
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    pub local_mem_per_item: usize,

    /// Kernel-reported work-group limit (0 = backend cannot answer)
    #[arg(long, value_name = "N")]
    pub kernel_wg_size: Option<usize>,

    #[command(flatten)]
    pub device: DeviceArgs,
}

#[derive(Serialize)]
struct PlanReport {
    device: String,
    #[serde(flatten)]
    plan: LaunchPlan,
    global_size: usize,
    uniform: bool,
}

impl PlanCommand {
    pub fn execute(&self, config: &ReductionConfig, format: OutputFormat) -> Result<()> {
        if self.work_items == 0 {
            bail!("--work-items must be greater than zero");
        }
        let device = self.device.resolve()?;
        let planner = planner_for(device.as_ref(), config);
        let kernel = self.kernel_wg_size.map(|n| FixedKernelLimit::new("cli-kernel", n));
        let plan = planner.plan(
            self.work_items,
            self.local_mem_per_item,
            kernel.as_ref().map(|k| k as &dyn KernelQuery),
        );

        let report = PlanReport {
            device: device_name(device.as_ref()),
            plan,
            global_size: plan.global_size(),
            uniform: plan.sizing().is_uniform(plan.work_items),
        };
        emit(format, &report, |r| {
            format!(
                "device:               {}\n\
                 work-items:           {}\n\
                 work-group size:      {}\n\
                 work-group count:     {}\n\
                 global size:          {}{}\n\
                 max work-group size:  {}\n\
                 concurrent groups:    {}\n\
                 kernel bundle:        {}",
                r.device,
                r.plan.work_items,
                r.plan.work_group_size,
                r.plan.work_group_count,
                r.global_size,
                if r.uniform { "" } else { " (last group partial)" },
                r.plan.max_work_group_size,
                r.plan.max_concurrent_work_groups,
                if r.plan.use_kernel_bundle { "yes" } else { "no" },
            )
        })
    }
}

// ── max / preferred ─────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct SizeCommand {
    /// Local memory bytes each work-item needs
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    pub local_mem_per_item: usize,

    #[command(flatten)]
    pub device: DeviceArgs,
}

#[derive(Serialize)]
struct SizeReport {
    device: String,
    local_mem_bytes_per_work_item: usize,
    work_group_size: usize,
}

impl SizeCommand {
    pub fn execute_max(&self, config: &ReductionConfig, format: OutputFormat) -> Result<()> {
        self.report(config, format, |p, bytes| p.max_work_group_size(bytes))
    }

    pub fn execute_preferred(&self, config: &ReductionConfig, format: OutputFormat) -> Result<()> {
        self.report(config, format, |p, bytes| p.preferred_work_group_size(bytes))
    }

    fn report(
        &self,
        config: &ReductionConfig,
        format: OutputFormat,
        size: impl FnOnce(&ReductionPlanner<'_>, usize) -> usize,
    ) -> Result<()> {
        let device = self.device.resolve()?;
        let planner = planner_for(device.as_ref(), config);
        let report = SizeReport {
            device: device_name(device.as_ref()),
            local_mem_bytes_per_work_item: self.local_mem_per_item,
            work_group_size: size(&planner, self.local_mem_per_item),
        };
        emit(format, &report, |r| r.work_group_size.to_string())
    }
}

// ── presets ─────────────────────────────────────────────────────────

pub fn list_presets(format: OutputFormat) -> Result<()> {
    let presets: Vec<DeviceLimits> =
        DeviceLimits::PRESETS.iter().filter_map(|name| DeviceLimits::preset(name)).collect();
    emit(format, &presets, |list| {
        list.iter()
            .map(|d| {
                format!(
                    "{:<18} {:<12} {:<11} max_wg={:<5} local_mem={:<7} cus={}",
                    d.name,
                    d.device_class().to_string(),
                    d.backend().to_string(),
                    d.max_work_group_size,
                    d.local_memory_bytes,
                    d.compute_units,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}
