//! Work-group sizing heuristics for reduction kernels.
//!
//! Every function here is pure: it reads device queries and returns a
//! size. Missing device context and degenerate inputs resolve to fixed
//! conservative values rather than errors.

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::config::{KernelBundlePolicy, OverrideLookup};
use crate::device::{DeviceClass, DeviceQuery, KernelQuery};

/// Preferred work-group size when no device is bound yet (deferred graph
/// construction). A conservative fallback.
pub const NO_DEVICE_PREFERRED_WORK_GROUP_SIZE: usize = 32;

/// Concurrent work-group estimate when no device is bound yet.
pub const NO_DEVICE_CONCURRENT_WORK_GROUPS: u32 = 8;

/// Preferred work-group size on CPUs, where one thread runs a whole group
/// and larger groups only add accumulators.
pub const CPU_PREFERRED_WORK_GROUP_SIZE: usize = 16;

/// Hardware threads assumed per compute unit on integrated GPUs.
pub const INTEGRATED_GPU_THREADS_PER_COMPUTE_UNIT: u32 = 8;

// ── WorkGroupSizing ─────────────────────────────────────────────────

/// A work-group size and the number of groups needed to cover a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WorkGroupSizing {
    pub work_group_size: usize,
    pub work_group_count: usize,
}

impl WorkGroupSizing {
    /// Work-items launched, including idle items in a partial last group.
    #[must_use]
    pub const fn covered_work_items(&self) -> usize {
        self.work_group_size.saturating_mul(self.work_group_count)
    }

    /// All groups are full for `work_items`.
    #[must_use]
    pub const fn is_uniform(&self, work_items: usize) -> bool {
        self.covered_work_items() == work_items
    }
}

/// Split `work_items` into work-groups no larger than `max_work_group_size`.
///
/// Prefers uniform groups: when a max-size split leaves a remainder that
/// evenly divides the range, the remainder becomes the group size (160 items
/// with a 128 limit become 5 groups of 32, not 128 + 32). Otherwise one
/// extra, partially filled group covers the tail.
///
/// Zero inputs are treated as 1.
#[must_use]
pub fn compute_work_group_size(work_items: usize, max_work_group_size: usize) -> WorkGroupSizing {
    let max = max_work_group_size.max(1);
    let work_items = work_items.max(1);

    if work_items <= max {
        return WorkGroupSizing { work_group_size: work_items, work_group_count: 1 };
    }

    let count = work_items / max;
    let rem = work_items % max;
    let sizing = if rem == 0 {
        WorkGroupSizing { work_group_size: max, work_group_count: count }
    } else {
        let alt_count = work_items / rem;
        let alt_rem = work_items % rem;
        // alt_count <= max keeps the group count launchable in one pass.
        if alt_rem == 0 && alt_count <= max {
            WorkGroupSizing { work_group_size: rem, work_group_count: alt_count }
        } else {
            WorkGroupSizing { work_group_size: max, work_group_count: count + 1 }
        }
    };

    trace!(
        work_items,
        max_work_group_size = max,
        work_group_size = sizing.work_group_size,
        work_group_count = sizing.work_group_count,
        "computed work-group split"
    );
    sizing
}

// ── Refinements ─────────────────────────────────────────────────────

/// An architecture-specific adjustment applied after the memory-based
/// candidate has been chosen.
pub trait SizeRefinement {
    fn name(&self) -> &'static str;

    /// Return a candidate no larger than `candidate`.
    fn refine(&self, candidate: usize, device: &dyn DeviceQuery) -> usize;
}

/// Clamp to the largest power of two whose register demand fits the
/// per-group register file.
///
/// Only applies to devices that report a register budget. Assumes every
/// work-item uses [`DeviceQuery::registers_per_work_item`] registers, which
/// over-estimates most kernels.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterBudgetClamp;

impl SizeRefinement for RegisterBudgetClamp {
    fn name(&self) -> &'static str {
        "register-budget"
    }

    fn refine(&self, candidate: usize, device: &dyn DeviceQuery) -> usize {
        let Some(budget) = device.max_registers_per_group() else {
            return candidate;
        };
        let per_item = device.registers_per_work_item();
        if per_item == 0 || candidate == 0 {
            return candidate;
        }
        let bound = candidate.min(budget / per_item);
        if bound == 0 {
            warn!(budget, per_item, "register budget cannot fit a single work-item");
            return 1;
        }
        prev_power_of_two(bound)
    }
}

/// Opt-in register clamp, for the `_with` functions. The plain
/// [`compute_max_work_group_size`] applies no refinements.
pub const REGISTER_CLAMP_REFINEMENTS: &[&dyn SizeRefinement] = &[&RegisterBudgetClamp];

/// `n & (n - 1) == 0`; unlike [`usize::is_power_of_two`] this accepts zero.
const fn is_power_of_two_or_zero(n: usize) -> bool {
    n & n.wrapping_sub(1) == 0
}

/// Largest power of two `<= n`, for `n > 0`.
const fn prev_power_of_two(n: usize) -> usize {
    1 << (usize::BITS - 1 - n.leading_zeros())
}

// ── Max work-group size ─────────────────────────────────────────────

/// Work-items whose local-memory footprint fits the device.
///
/// Non-power-of-two group sizes need one extra local slot in the reduction
/// tree, so such bounds are reduced by one.
#[must_use]
pub const fn memory_bound_work_group_size(
    local_memory_bytes: usize,
    local_mem_bytes_per_work_item: usize,
) -> usize {
    if local_mem_bytes_per_work_item == 0 {
        return usize::MAX;
    }
    let bound = local_memory_bytes / local_mem_bytes_per_work_item;
    if is_power_of_two_or_zero(bound) { bound } else { bound - 1 }
}

/// Device-level maximum usable work-group size for a reduction.
///
/// With no local memory per item this is the device maximum.
#[must_use]
pub fn compute_max_work_group_size(
    device: &dyn DeviceQuery,
    local_mem_bytes_per_work_item: usize,
) -> usize {
    compute_max_work_group_size_with(device, local_mem_bytes_per_work_item, &[])
}

/// Device-level maximum usable work-group size with explicit refinements.
///
/// When the kernel is limited by local memory rather than by the device
/// maximum, the candidate is halved to leave local memory for barriers and
/// built-ins the per-item estimate does not include.
#[must_use]
pub fn compute_max_work_group_size_with(
    device: &dyn DeviceQuery,
    local_mem_bytes_per_work_item: usize,
    refinements: &[&dyn SizeRefinement],
) -> usize {
    let max = device.max_work_group_size().max(1);
    let occupancy_limit = max.saturating_mul(2);

    let mut per_mem = occupancy_limit;
    let mut size = max;
    if local_mem_bytes_per_work_item != 0 {
        per_mem = memory_bound_work_group_size(
            device.local_memory_bytes(),
            local_mem_bytes_per_work_item,
        );
        size = size.min(per_mem);
    }

    if size >= 4 && per_mem < occupancy_limit {
        size /= 2;
    }

    for refinement in refinements {
        let refined = refinement.refine(size, device);
        if refined != size {
            debug!(
                refinement = refinement.name(),
                before = size,
                after = refined,
                "refined work-group size"
            );
        }
        size = refined.min(size);
    }

    if size == 0 {
        warn!(
            local_memory_bytes = device.local_memory_bytes(),
            local_mem_bytes_per_work_item,
            "local memory cannot hold one work-item; falling back to a single-item group"
        );
    }
    let size = size.clamp(1, max);
    debug!(
        device_max = max,
        local_mem_bytes_per_work_item,
        work_group_size = size,
        "max work-group size from device query"
    );
    size
}

/// Kernel-specific maximum work-group size.
///
/// Falls back to [`compute_max_work_group_size_with`] when the backend
/// reports `0` for the kernel query.
#[must_use]
pub fn compute_max_work_group_size_for_kernel(
    device: &dyn DeviceQuery,
    kernel: &dyn KernelQuery,
    local_mem_bytes_per_work_item: usize,
    refinements: &[&dyn SizeRefinement],
) -> usize {
    let size = kernel.work_group_size(device);
    if size == 0 {
        debug!(
            kernel = kernel.name(),
            "kernel work-group query unsupported; using device limits"
        );
        return compute_max_work_group_size_with(device, local_mem_bytes_per_work_item, refinements);
    }
    debug!(
        kernel = kernel.name(),
        work_group_size = size,
        "max work-group size from kernel query"
    );
    size
}

// ── Preferred work-group size ───────────────────────────────────────

/// Preferred work-group size for a reduction, without refinements.
#[must_use]
pub fn compute_preferred_work_group_size(
    device: Option<&dyn DeviceQuery>,
    overrides: &dyn OverrideLookup,
    local_mem_bytes_per_work_item: usize,
) -> usize {
    compute_preferred_work_group_size_with(device, overrides, local_mem_bytes_per_work_item, &[])
}

/// Preferred work-group size with explicit refinements.
///
/// - no device: [`NO_DEVICE_PREFERRED_WORK_GROUP_SIZE`]
/// - CPU: the configured size or [`CPU_PREFERRED_WORK_GROUP_SIZE`]
/// - GPU / accelerator with a configured size: that size
/// - otherwise: [`compute_max_work_group_size_with`]
///
/// Configured sizes are clamped to the device maximum.
#[must_use]
pub fn compute_preferred_work_group_size_with(
    device: Option<&dyn DeviceQuery>,
    overrides: &dyn OverrideLookup,
    local_mem_bytes_per_work_item: usize,
    refinements: &[&dyn SizeRefinement],
) -> usize {
    let Some(device) = device else {
        debug!(
            work_group_size = NO_DEVICE_PREFERRED_WORK_GROUP_SIZE,
            "no device bound; using fallback preferred work-group size"
        );
        return NO_DEVICE_PREFERRED_WORK_GROUP_SIZE;
    };

    let class = device.device_class();
    let device_max = device.max_work_group_size().max(1);
    let configured = overrides.preferred_work_group_size(class).filter(|&n| n > 0);

    match (class, configured) {
        (DeviceClass::Cpu, configured) => {
            configured.unwrap_or(CPU_PREFERRED_WORK_GROUP_SIZE).min(device_max)
        }
        (DeviceClass::Gpu | DeviceClass::Accelerator, Some(size)) => {
            debug!(
                %class,
                configured = size,
                device_max,
                "using configured preferred work-group size"
            );
            size.min(device_max)
        }
        _ => compute_max_work_group_size_with(device, local_mem_bytes_per_work_item, refinements),
    }
}

// ── Concurrency and kernel bundles ──────────────────────────────────

/// Estimated number of work-groups the device runs at once.
///
/// Integrated GPUs report few compute units but run several hardware
/// threads on each.
#[must_use]
pub fn max_concurrent_work_groups(device: Option<&dyn DeviceQuery>) -> u32 {
    let Some(device) = device else {
        return NO_DEVICE_CONCURRENT_WORK_GROUPS;
    };
    let units = device.compute_units().max(1);
    if device.device_class() == DeviceClass::Gpu && device.host_unified_memory() {
        units.saturating_mul(INTEGRATED_GPU_THREADS_PER_COMPUTE_UNIT)
    } else {
        units
    }
}

/// Whether to size against a precompiled kernel on this device's backend.
#[must_use]
pub fn should_use_kernel_bundle(
    device: Option<&dyn DeviceQuery>,
    policy: &KernelBundlePolicy,
) -> bool {
    device.is_some_and(|d| policy.enabled_for(d.backend()))
}
