use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use cfi_merge::{canonicalize_or_current, infer_workspace_name, load_frequencies, save_frequencies};
use cfi_merge_core::report::{ModuleEventFrequencies, ProgramEventFrequencies};
use tempfile::tempdir;

fn sample_frequencies() -> ProgramEventFrequencies {
    let mut freq = ProgramEventFrequencies::new();
    freq.abnormal_returns = 4;
    freq.standalones = 2;
    freq.indirect_targets = BTreeMap::from([(0x40, 7)]);
    freq.modules.insert(
        "libc.so".into(),
        ModuleEventFrequencies { abnormal_returns: 1, standalones: 0, indirect_targets: BTreeMap::from([(0x40, 3)]) },
    );
    freq
}

#[test]
fn canonicalize_or_current_resolves_existing_relative_path() {
    let original = std::env::current_dir().expect("cwd");
    let tmp = tempdir().expect("tempdir");
    let subdir = tmp.path().join("nested");
    fs::create_dir_all(&subdir).expect("create nested");
    std::env::set_current_dir(tmp.path()).expect("chdir tmp");

    let result = canonicalize_or_current("nested").expect("canonicalize nested");
    assert_eq!(result, subdir.canonicalize().expect("canonicalize subdir"));

    std::env::set_current_dir(original).expect("restore cwd");
}

#[test]
fn canonicalize_or_current_joins_missing_path() {
    let result = canonicalize_or_current("does-not-exist-yet").expect("canonicalize");
    assert!(result.is_absolute());
    assert!(result.ends_with("does-not-exist-yet"));
}

#[test]
fn infer_workspace_name_uses_last_path_component() {
    assert_eq!(infer_workspace_name(Path::new("/tmp/traces-2024")), "traces-2024");
    assert_eq!(infer_workspace_name(Path::new("/")), "unnamed-workspace");
}

#[test]
fn frequencies_round_trip_as_json_and_yaml() {
    let dir = tempdir().expect("tempdir");
    let freq = sample_frequencies();

    for file in ["stats/freq.json", "stats/freq.yaml", "freq.yml"] {
        let path = dir.path().join(file);
        save_frequencies(&path, &freq).expect("save frequencies");
        let loaded = load_frequencies(&path).expect("load frequencies");
        assert_eq!(loaded, freq, "round trip through {file}");
    }
}

#[test]
fn partial_frequency_file_uses_defaults() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("freq.yaml");
    fs::write(&path, "abnormal_returns: 12\n").expect("write yaml");

    let loaded = load_frequencies(&path).expect("load frequencies");
    assert_eq!(loaded.abnormal_returns, 12);
    assert_eq!(loaded.standalones, 0);
    assert!(loaded.modules.is_empty());
}

#[test]
fn unsupported_frequency_extension_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("freq.toml");
    fs::write(&path, "abnormal_returns = 1\n").expect("write toml");

    let err = load_frequencies(&path).unwrap_err();
    assert!(err.to_string().contains("Unsupported event frequency file"), "unexpected error: {err}");
}
