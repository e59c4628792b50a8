use std::fs;

use cfi_merge_core::dist::{
    load_distribution, DistributionError, DistributionRegistry, SoftwareUnit, MAIN_PROGRAM,
};
use tempfile::tempdir;

#[test]
fn file_stem_names_the_distribution() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("browser.asd");
    fs::write(&path, "Chrome.exe\n\n  libGLESv2.dll  \nchrome_elf.dll\n").expect("write config");

    let dist = load_distribution(&path).expect("load distribution");
    assert_eq!(dist.name, "browser");
    assert_eq!(dist.units.len(), 3);
    assert!(dist.contains(&SoftwareUnit::new("chrome.exe")));
    assert!(dist.contains(&SoftwareUnit::new("LIBGLESV2.DLL")));
}

#[test]
fn registry_loads_configs_and_keeps_main_program() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("system.asd"), "libc.so\nlibm.so\n").expect("write system");
    fs::write(dir.path().join("gfx.asd"), "libGL.so\n").expect("write gfx");
    fs::write(dir.path().join("notes.txt"), "libz.so\n").expect("write ignored file");

    let registry = DistributionRegistry::load_dir(dir.path()).expect("load registry");
    assert_eq!(
        registry.names(),
        vec![MAIN_PROGRAM.to_string(), "gfx".to_string(), "system".to_string()]
    );
    assert_eq!(registry.distribution_for("LIBC.SO"), "system");
    assert_eq!(registry.distribution_for("libgl.so"), "gfx");
    assert_eq!(registry.distribution_for("libz.so"), MAIN_PROGRAM);
}

#[test]
fn versioned_module_ids_fall_back_to_bare_name() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("system.asd"), "libc.so\n").expect("write system");

    let registry = DistributionRegistry::load_dir(dir.path()).expect("load registry");
    assert_eq!(registry.distribution_for("libc.so-2"), "system");
    assert!(registry.claimed_by("libc.sox").is_none());
}

#[test]
fn missing_config_dir_yields_main_program_only() {
    let dir = tempdir().expect("tempdir");
    let registry = DistributionRegistry::load_dir(&dir.path().join("absent")).expect("load registry");
    assert_eq!(registry.len(), 1);
    assert!(registry.get(MAIN_PROGRAM).is_some());
}

#[test]
fn redefining_main_program_is_rejected() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join(format!("{MAIN_PROGRAM}.asd")), "app\n").expect("write config");

    let err = DistributionRegistry::load_dir(dir.path()).unwrap_err();
    assert!(matches!(err, DistributionError::Duplicate { .. }), "unexpected error: {err}");
}

#[test]
fn only_version_suffixes_are_stripped() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("tools.asd"), "my\nlibssl.so\n").expect("write tools");

    let registry = DistributionRegistry::load_dir(dir.path()).expect("load registry");
    assert_eq!(registry.distribution_for("my-app"), MAIN_PROGRAM);
    assert_eq!(registry.distribution_for("my-2"), "tools");
    assert_eq!(registry.distribution_for("libssl.so-1.1"), "tools");
    assert_eq!(registry.distribution_for("libssl.so-beta"), MAIN_PROGRAM);
}
