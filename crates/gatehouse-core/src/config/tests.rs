use super::*;
use crate::constants::{CODEX_SYNTH_HUGE_MAX, CODEX_SYNTH_HUGE_MIN};
use serial_test::serial;
use std::env;

fn with_env_vars<F, R>(vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    // SAFETY: Test code only, we accept the thread-safety risk in tests.
    for (key, value) in vars {
        unsafe { env::set_var(key, value) };
    }
    let result = f();
    // SAFETY: Test code only, we accept the thread-safety risk in tests.
    for (key, _) in vars {
        unsafe { env::remove_var(key) };
    }
    result
}

#[test]
fn default_config_has_sane_values() {
    let config = Config::default();
    assert_eq!(config.port, 8080);
    assert!(!config.management_enabled());
    assert!(config.codex_synth_enable);
}

#[test]
#[serial]
fn from_env_applies_port_override() {
    with_env_vars(&[("GATEHOUSE_PORT", "9900")], || {
        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 9900);
    });
}

#[test]
#[serial]
fn from_env_rejects_zero_port() {
    with_env_vars(&[("GATEHOUSE_PORT", "0")], || {
        assert!(Config::from_env().is_err());
    });
}

#[test]
#[serial]
fn management_password_enables_management_surface() {
    with_env_vars(&[("MANAGEMENT_PASSWORD", "secret")], || {
        let config = Config::from_env().unwrap();
        assert!(config.management_enabled());
    });
}

#[test]
#[serial]
fn codex_synth_huge_bytes_clamped_to_range() {
    with_env_vars(&[("CLIPROXY_CODEX_SYNTH_HUGE_BYTES", "1")], || {
        let config = Config::from_env().unwrap();
        assert_eq!(config.codex_synth_huge_bytes, CODEX_SYNTH_HUGE_MIN);
    });
    with_env_vars(&[("CLIPROXY_CODEX_SYNTH_HUGE_BYTES", "999999999")], || {
        let config = Config::from_env().unwrap();
        assert_eq!(config.codex_synth_huge_bytes, CODEX_SYNTH_HUGE_MAX);
    });
}

#[test]
#[serial]
fn codex_synth_enable_recognizes_falsey_strings() {
    with_env_vars(&[("CLIPROXY_CODEX_SYNTH_ENABLE", "off")], || {
        let config = Config::from_env().unwrap();
        assert!(!config.codex_synth_enable);
    });
}

#[test]
fn snapshot_paths_live_under_cache_dir() {
    let config = Config::default();
    assert_eq!(
        config.response_snapshot_path(),
        config.cache_dir.join("response_cache.bin")
    );
    assert_eq!(
        config.prompt_snapshot_path(),
        config.cache_dir.join("prompt_cache.bin")
    );
}
