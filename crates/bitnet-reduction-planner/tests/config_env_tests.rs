//! Environment and file driven configuration tests.
//!
//! Every test touching `BITNET_REDUCTION_*` runs under the same serial key
//! so parallel test threads never observe each other's variables.

use std::io::Write;

use bitnet_reduction_planner::config::{
    ENV_KERNEL_BUNDLES, ENV_PREFERRED_WG_SIZE, ENV_REGISTER_CLAMP,
};
use bitnet_reduction_planner::{
    Backend, ConfigError, DeviceLimits, KernelBundlePolicy, ReductionConfig, ReductionPlanner,
};
use serial_test::serial;

fn without_reduction_env<R>(f: impl FnOnce() -> R) -> R {
    temp_env::with_vars_unset([ENV_PREFERRED_WG_SIZE, ENV_KERNEL_BUNDLES, ENV_REGISTER_CLAMP], f)
}

#[test]
#[serial(bitnet_env)]
fn from_env_without_vars_is_default() {
    without_reduction_env(|| {
        assert_eq!(ReductionConfig::from_env().unwrap(), ReductionConfig::default());
    });
}

#[test]
#[serial(bitnet_env)]
fn from_env_reads_all_vars() {
    temp_env::with_vars(
        [
            (ENV_PREFERRED_WG_SIZE, Some("cpu:8,gpu:128")),
            (ENV_KERNEL_BUNDLES, Some("cuda,hip")),
            (ENV_REGISTER_CLAMP, Some("on")),
        ],
        || {
            let cfg = ReductionConfig::from_env().unwrap();
            assert_eq!(cfg.preferred_work_group_size.cpu, Some(8));
            assert_eq!(cfg.preferred_work_group_size.gpu, Some(128));
            assert_eq!(
                cfg.kernel_bundles,
                KernelBundlePolicy::Backends(vec![Backend::Cuda, Backend::Hip])
            );
            assert!(cfg.register_clamp);
        },
    );
}

#[test]
#[serial(bitnet_env)]
fn from_env_rejects_bad_size_list() {
    temp_env::with_var(ENV_PREFERRED_WG_SIZE, Some("gpu=128"), || {
        let err = ReductionConfig::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnvVar { ref key, .. } if key == ENV_PREFERRED_WG_SIZE
        ));
    });
}

#[test]
#[serial(bitnet_env)]
fn from_env_rejects_bad_bool() {
    temp_env::with_var(ENV_REGISTER_CLAMP, Some("maybe"), || {
        assert!(ReductionConfig::from_env().is_err());
    });
}

#[test]
#[serial(bitnet_env)]
fn load_missing_file_is_default() {
    without_reduction_env(|| {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ReductionConfig::load(Some(dir.path().join("absent.toml").as_path())).unwrap();
        assert_eq!(cfg, ReductionConfig::default());
    });
}

#[test]
#[serial(bitnet_env)]
fn env_overrides_file_values() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[reduction]\nkernel_bundles = \"all\"\n\n\
         [reduction.preferred_work_group_size]\ngpu = 64\ncpu = 4\n"
    )
    .unwrap();

    temp_env::with_vars(
        [
            (ENV_PREFERRED_WG_SIZE, Some("gpu:512")),
            (ENV_KERNEL_BUNDLES, None),
            (ENV_REGISTER_CLAMP, None),
        ],
        || {
            let cfg = ReductionConfig::load(Some(file.path())).unwrap();
            assert_eq!(cfg.preferred_work_group_size.gpu, Some(512));
            assert_eq!(cfg.preferred_work_group_size.cpu, Some(4));
            assert_eq!(cfg.kernel_bundles, KernelBundlePolicy::All);
        },
    );
}

#[test]
#[serial(bitnet_env)]
fn env_default_values_override_file_values() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[reduction]\nkernel_bundles = \"all\"\nregister_clamp = false\n").unwrap();

    temp_env::with_vars(
        [
            (ENV_PREFERRED_WG_SIZE, None),
            (ENV_KERNEL_BUNDLES, Some("none")),
            (ENV_REGISTER_CLAMP, Some("1")),
        ],
        || {
            let cfg = ReductionConfig::load(Some(file.path())).unwrap();
            assert_eq!(cfg.kernel_bundles, KernelBundlePolicy::Disabled);
            assert!(cfg.register_clamp);
        },
    );
}

#[test]
#[serial(bitnet_env)]
fn load_rejects_zero_size_in_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[reduction.preferred_work_group_size]\ngpu = 0\n").unwrap();
    without_reduction_env(|| {
        let err = ReductionConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    });
}

#[test]
#[serial(bitnet_env)]
fn env_config_drives_planner() {
    temp_env::with_vars(
        [
            (ENV_PREFERRED_WG_SIZE, Some("*:64")),
            (ENV_KERNEL_BUNDLES, None),
            (ENV_REGISTER_CLAMP, None),
        ],
        || {
            let device = DeviceLimits::intel_arc();
            let planner = ReductionPlanner::new(&device, ReductionConfig::from_env().unwrap());
            let plan = planner.plan(4096, 0, None);
            assert_eq!(plan.max_work_group_size, 64);
            assert_eq!(plan.work_group_size, 64);
            assert_eq!(plan.work_group_count, 64);
        },
    );
}
