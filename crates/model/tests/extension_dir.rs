//! Loading extension definitions from a directory.

use std::sync::Arc;

use bpms_core::ModelsConfig;
use bpms_model::{ModelError, ObjectModelProvider, StaticModelProvider};

const PUMP: &str = r#"[{
    "id": 33000, "name": "Pump", "instancetype": "multiple", "mandatory": false,
    "description": "Circulation pump",
    "resourcedefs": [
        { "id": 1, "name": "Speed", "operations": "RW", "instancetype": "single",
          "mandatory": true, "type": "integer", "range": "0-100", "units": "%", "description": "" }
    ]
}]"#;

fn config_for(dir: &std::path::Path) -> ModelsConfig {
    ModelsConfig {
        extension_dir: Some(dir.to_path_buf()),
        skip_extensions: false,
    }
}

#[test]
fn directory_replaces_builtin_extension() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("pump.json"), PUMP).unwrap();
    std::fs::write(dir.path().join("README.txt"), "ignored").unwrap();

    let provider = StaticModelProvider::from_config(&config_for(dir.path())).unwrap();
    let model = provider.object_model(None);

    assert!(model.contains(33000));
    assert!(model.contains(3));
    assert!(!model.contains(3303), "builtin extension must not be merged");
    assert_eq!(model.len(), 9);
}

#[test]
fn every_client_sees_the_same_model() {
    let provider = StaticModelProvider::from_config(&ModelsConfig::default()).unwrap();
    assert!(Arc::ptr_eq(&provider.object_model(None), &provider.object_model(None)));
    assert!(provider.object_model(None).contains(3316));
}

#[test]
fn missing_directory_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let result = StaticModelProvider::from_config(&config_for(&dir.path().join("absent")));
    assert!(matches!(result, Err(ModelError::Directory { .. })));
}

#[test]
fn empty_directory_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let result = StaticModelProvider::from_config(&config_for(dir.path()));
    assert!(matches!(result, Err(ModelError::Empty(_))));
}

#[test]
fn malformed_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("broken.json"), "[{\"id\": 1}]").unwrap();

    let result = StaticModelProvider::from_config(&config_for(dir.path()));
    assert!(matches!(result, Err(ModelError::Parse { .. })));
}
