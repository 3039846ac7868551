use serial_test::serial;
use simsnap_tasks::config::{ENV_BACKEND, ENV_DISTRIBUTION, ENV_RANKS};
use simsnap_tasks::prelude::*;

fn clear() {
    // SAFETY: these tests run serially and nothing else reads the environment
    unsafe {
        std::env::remove_var(ENV_BACKEND);
        std::env::remove_var(ENV_RANKS);
        std::env::remove_var(ENV_DISTRIBUTION);
    }
}

#[test]
#[serial]
fn defaults_without_environment() {
    clear();
    assert_eq!(GroupConfig::from_env().unwrap(), GroupConfig::default());
}

#[test]
#[serial]
fn environment_overrides_defaults() {
    clear();
    unsafe {
        std::env::set_var(ENV_BACKEND, "multiprocessing");
        std::env::set_var(ENV_RANKS, "4");
        std::env::set_var(ENV_DISTRIBUTION, "static-striped");
    }
    let cfg = GroupConfig::from_env().unwrap();
    clear();
    assert_eq!(cfg.backend, Backend::Threads);
    assert_eq!(cfg.ranks, 4);
    assert_eq!(cfg.distribution, Distribution::Static(StaticSplit::Striped));
}

#[test]
#[serial]
fn invalid_environment_is_a_config_error() {
    clear();
    unsafe {
        std::env::set_var(ENV_DISTRIBUTION, "whoever-asks-first");
    }
    let err = GroupConfig::from_env().unwrap_err();
    clear();
    assert!(matches!(err, TaskError::Config(_)));
}

#[cfg(not(feature = "mpi-support"))]
#[test]
#[serial]
fn mpi_backend_needs_the_feature() {
    clear();
    unsafe {
        std::env::set_var(ENV_BACKEND, "mpi");
    }
    let err = GroupConfig::from_env().unwrap_err();
    clear();
    assert!(matches!(err, TaskError::Config(_)));
}
