//! `bitnet-reduction-planner`: work-group sizing for data-parallel
//! reduction kernels.
//!
//! Given the number of work-items in a reduction and a description of the
//! target device, the planner picks a work-group size and count that the
//! dispatch layer can launch directly:
//!
//! | Operation | Function |
//! |---|---|
//! | Split a range into groups | [`compute_work_group_size`] |
//! | Device-level usable maximum | [`compute_max_work_group_size`] |
//! | Per-kernel maximum (with fallback) | [`compute_max_work_group_size_for_kernel`] |
//! | Preferred size per device class | [`compute_preferred_work_group_size`] |
//! | Concurrent work-group estimate | [`max_concurrent_work_groups`] |
//! | Kernel-bundle policy check | [`should_use_kernel_bundle`] |
//!
//! [`ReductionPlanner`] wraps these into a single [`LaunchPlan`] per
//! submission.
//!
//! # Usage
//!
//! ```rust
//! use bitnet_reduction_planner::{DeviceLimits, ReductionConfig, ReductionPlanner};
//!
//! let device = DeviceLimits::generic();
//! let planner = ReductionPlanner::new(&device, ReductionConfig::default());
//! let plan = planner.plan(160, 0, None);
//! assert!(plan.work_group_size <= device.max_work_group_size);
//! assert!(plan.global_size() >= 160);
//! ```

pub mod config;
pub mod device;
pub mod planner;
pub mod sizing;

pub use config::{
    ConfigError, EnvOverrides, KernelBundlePolicy, OverrideLookup, PreferredSizeOverrides,
    ReductionConfig,
};
pub use device::{
    Backend, DEFAULT_REGISTERS_PER_WORK_ITEM, DeviceClass, DeviceLimits, DeviceQuery,
    FixedKernelLimit, KernelQuery,
};
pub use planner::{KernelLauncher, LaunchPlan, ReductionPlanner};
pub use sizing::{
    CPU_PREFERRED_WORK_GROUP_SIZE, NO_DEVICE_CONCURRENT_WORK_GROUPS,
    NO_DEVICE_PREFERRED_WORK_GROUP_SIZE, REGISTER_CLAMP_REFINEMENTS, RegisterBudgetClamp,
    SizeRefinement, WorkGroupSizing,
    compute_max_work_group_size, compute_max_work_group_size_for_kernel,
    compute_max_work_group_size_with, compute_preferred_work_group_size,
    compute_preferred_work_group_size_with, compute_work_group_size, max_concurrent_work_groups,
    memory_bound_work_group_size, should_use_kernel_bundle,
};
