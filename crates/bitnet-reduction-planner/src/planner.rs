//! Reduction launch planning.
//!
//! [`ReductionPlanner`] ties a (possibly absent) device, a
//! [`ReductionConfig`] and an override lookup together and produces a
//! [`LaunchPlan`] per submission. The plan is handed to a
//! [`KernelLauncher`], which owns the actual kernel launch and any
//! out-of-resources failure it reports.

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{OverrideLookup, ReductionConfig};
use crate::device::{DeviceQuery, KernelQuery};
use crate::sizing::{
    NO_DEVICE_PREFERRED_WORK_GROUP_SIZE, REGISTER_CLAMP_REFINEMENTS, SizeRefinement,
    WorkGroupSizing,
    compute_max_work_group_size_for_kernel, compute_max_work_group_size_with,
    compute_preferred_work_group_size_with, compute_work_group_size, max_concurrent_work_groups,
    should_use_kernel_bundle,
};

/// Everything the dispatch layer needs to launch one reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LaunchPlan {
    pub work_items: usize,
    pub work_group_size: usize,
    pub work_group_count: usize,
    /// Upper bound the limit came from (kernel, preferred or fallback size).
    pub max_work_group_size: usize,
    pub max_concurrent_work_groups: u32,
    pub use_kernel_bundle: bool,
}

impl LaunchPlan {
    #[must_use]
    pub const fn sizing(&self) -> WorkGroupSizing {
        WorkGroupSizing {
            work_group_size: self.work_group_size,
            work_group_count: self.work_group_count,
        }
    }

    /// Global range to launch (`size * count`).
    #[must_use]
    pub const fn global_size(&self) -> usize {
        self.sizing().covered_work_items()
    }
}

/// The kernel-launch entry point the planner feeds.
pub trait KernelLauncher {
    type Error;

    fn launch(&mut self, plan: &LaunchPlan) -> Result<(), Self::Error>;
}

/// Plans work-group sizes for reduction submissions.
///
/// A planner without a device (see [`ReductionPlanner::deferred`]) is valid
/// and yields the fixed fallback sizes; this is the state during deferred
/// graph construction, before a queue is bound.
pub struct ReductionPlanner<'a> {
    device: Option<&'a dyn DeviceQuery>,
    config: ReductionConfig,
    overrides: Option<&'a dyn OverrideLookup>,
}

impl<'a> ReductionPlanner<'a> {
    pub fn new(device: &'a dyn DeviceQuery, config: ReductionConfig) -> Self {
        Self { device: Some(device), config, overrides: None }
    }

    /// Planner with no bound device.
    pub fn deferred(config: ReductionConfig) -> Self {
        Self { device: None, config, overrides: None }
    }

    /// Use `lookup` for preferred sizes instead of the config's table.
    #[must_use]
    pub fn with_override_lookup(mut self, lookup: &'a dyn OverrideLookup) -> Self {
        self.overrides = Some(lookup);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ReductionConfig {
        &self.config
    }

    #[must_use]
    pub fn device(&self) -> Option<&'a dyn DeviceQuery> {
        self.device
    }

    fn refinements(&self) -> &'static [&'static dyn SizeRefinement] {
        if self.config.register_clamp { REGISTER_CLAMP_REFINEMENTS } else { &[] }
    }

    fn override_lookup(&self) -> &dyn OverrideLookup {
        match self.overrides {
            Some(lookup) => lookup,
            None => &self.config as &dyn OverrideLookup,
        }
    }

    /// Device-level maximum usable work-group size.
    #[must_use]
    pub fn max_work_group_size(&self, local_mem_bytes_per_work_item: usize) -> usize {
        match self.device {
            Some(device) => compute_max_work_group_size_with(
                device,
                local_mem_bytes_per_work_item,
                self.refinements(),
            ),
            None => NO_DEVICE_PREFERRED_WORK_GROUP_SIZE,
        }
    }

    #[must_use]
    pub fn preferred_work_group_size(&self, local_mem_bytes_per_work_item: usize) -> usize {
        compute_preferred_work_group_size_with(
            self.device,
            self.override_lookup(),
            local_mem_bytes_per_work_item,
            self.refinements(),
        )
    }

    #[must_use]
    pub fn max_concurrent_work_groups(&self) -> u32 {
        max_concurrent_work_groups(self.device)
    }

    #[must_use]
    pub fn use_kernel_bundle(&self) -> bool {
        should_use_kernel_bundle(self.device, &self.config.kernel_bundles)
    }

    /// Plan one reduction over `work_items`.
    ///
    /// The kernel's own limit is consulted only when a kernel is supplied
    /// and the kernel-bundle policy covers this backend; otherwise the
    /// preferred size bounds the split.
    #[must_use]
    pub fn plan(
        &self,
        work_items: usize,
        local_mem_bytes_per_work_item: usize,
        kernel: Option<&dyn KernelQuery>,
    ) -> LaunchPlan {
        let use_kernel_bundle = self.use_kernel_bundle();
        let max_work_group_size = match (self.device, kernel) {
            (Some(device), Some(kernel)) if use_kernel_bundle => {
                compute_max_work_group_size_for_kernel(
                    device,
                    kernel,
                    local_mem_bytes_per_work_item,
                    self.refinements(),
                )
            }
            _ => self.preferred_work_group_size(local_mem_bytes_per_work_item),
        };

        let sizing = compute_work_group_size(work_items, max_work_group_size);
        let plan = LaunchPlan {
            work_items,
            work_group_size: sizing.work_group_size,
            work_group_count: sizing.work_group_count,
            max_work_group_size,
            max_concurrent_work_groups: self.max_concurrent_work_groups(),
            use_kernel_bundle,
        };
        debug!(?plan, "planned reduction launch");
        plan
    }

    /// Plan and hand the result to `launcher`.
    pub fn submit<L: KernelLauncher>(
        &self,
        launcher: &mut L,
        work_items: usize,
        local_mem_bytes_per_work_item: usize,
        kernel: Option<&dyn KernelQuery>,
    ) -> Result<LaunchPlan, L::Error> {
        let plan = self.plan(work_items, local_mem_bytes_per_work_item, kernel);
        info!(
            work_items,
            work_group_size = plan.work_group_size,
            work_group_count = plan.work_group_count,
            "submitting reduction"
        );
        launcher.launch(&plan)?;
        Ok(plan)
    }
}
