mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{operation_deps, zip_bytes, HangingFetcher, RecordingConn, ScriptedFetcher};
use porter_common::config::Config;
use porter_common::model::{
    InstallParams, InstallerType, OperationKind, OperationStartParams, TaskType,
    UninstallParams, Upload,
};
use porter_common::protocol::Notification;
use porter_common::PorterError;
use porter_core::installer::read_receipt;
use porter_core::operation::{OperationManager, OperationOutcome};
use serde_json::json;

fn upload(id: i64) -> Upload {
    Upload {
        id,
        filename: "game.zip".into(),
        display_name: None,
        size: None,
        url: Some("https://example.org/uploads/game.zip".into()),
        local_path: None,
        build_id: None,
    }
}

fn install_op(id: &str, staging: &Path, folder: &Path, upload: Upload) -> OperationStartParams {
    OperationStartParams {
        id: id.into(),
        staging_folder: staging.to_path_buf(),
        operation: OperationKind::Install,
        install_params: Some(InstallParams {
            install_folder: folder.to_path_buf(),
            upload: Some(upload),
            uploads: vec![],
            credentials: None,
            ignore_installers: false,
        }),
        uninstall_params: None,
    }
}

fn uninstall_op(id: &str, staging: &Path, folder: &Path) -> OperationStartParams {
    OperationStartParams {
        id: id.into(),
        staging_folder: staging.to_path_buf(),
        operation: OperationKind::Uninstall,
        install_params: None,
        uninstall_params: Some(UninstallParams {
            install_folder: folder.to_path_buf(),
        }),
    }
}

fn succeeded(conn: &RecordingConn) -> Vec<TaskType> {
    conn.notifications
        .lock()
        .unwrap()
        .iter()
        .filter_map(|n| match n {
            Notification::TaskSucceeded(s) => Some(s.task_type),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn downloads_then_installs_and_writes_a_receipt() {
    let dir = tempfile::tempdir().unwrap();
    let body = zip_bytes(&[("game/run.sh", b"#!/bin/sh\n"), ("game/data.pak", b"data")]);
    let manager = OperationManager::new(operation_deps(
        dir.path(),
        Arc::new(ScriptedFetcher { body }),
    ));
    let conn = RecordingConn::new();
    let staging = dir.path().join("staging");
    let folder = dir.path().join("install");

    let outcome = manager
        .start(install_op("op-1", &staging, &folder, upload(5)), conn.clone())
        .await
        .unwrap();
    assert!(matches!(outcome, OperationOutcome::Completed));

    assert_eq!(succeeded(&conn), vec![TaskType::Download, TaskType::Install]);
    assert!(conn.methods().contains(&"Operation.Progress"));
    assert!(folder.join("game/data.pak").is_file());
    assert!(!staging.exists());

    let receipt = read_receipt(&folder).unwrap().unwrap();
    assert_eq!(receipt.installer_name, InstallerType::Archive);
    assert_eq!(receipt.files, vec!["game/data.pak", "game/run.sh"]);
    assert_eq!(receipt.upload_id, Some(5));
    assert!(!Config::runlock_path(&folder).exists());
    assert!(!manager.is_live("op-1"));
}

#[tokio::test]
async fn reinstalling_the_same_upload_heals() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("local.zip");
    std::fs::write(&archive, zip_bytes(&[("a.txt", b"a")])).unwrap();
    let manager = OperationManager::new(operation_deps(
        dir.path(),
        Arc::new(ScriptedFetcher { body: vec![] }),
    ));
    let folder = dir.path().join("install");
    let mut local = upload(9);
    local.url = None;
    local.local_path = Some(archive);

    for (id, expected) in [("first", TaskType::Install), ("second", TaskType::Heal)] {
        let conn = RecordingConn::new();
        let staging = dir.path().join(format!("staging-{id}"));
        manager
            .start(install_op(id, &staging, &folder, local.clone()), conn.clone())
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(succeeded(&conn), vec![expected]);
    }
}

#[tokio::test]
async fn cancelling_mid_download_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(HangingFetcher::default());
    let started = fetcher.started.clone();
    let manager = Arc::new(OperationManager::new(operation_deps(dir.path(), fetcher)));
    let conn = RecordingConn::new();
    let folder = dir.path().join("install");
    let params = install_op("op-cancel", &dir.path().join("staging"), &folder, upload(1));

    let task = {
        let manager = manager.clone();
        let conn = conn.clone();
        tokio::spawn(async move { manager.start(params, conn).await })
    };
    started.notified().await;
    assert!(manager.cancel("op-cancel"));

    let outcome = task.await.unwrap().unwrap();
    assert!(matches!(outcome, OperationOutcome::Cancelled));
    assert_eq!(outcome.into_result().unwrap_err().code() as i64, 499);
    assert!(succeeded(&conn).is_empty());
    assert_eq!(conn.methods(), vec!["TaskStarted"]);
    assert!(!folder.exists());
    assert!(!manager.is_live("op-cancel"));
    assert!(!manager.cancel("op-cancel"));
}

#[tokio::test]
async fn duplicate_operations_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(HangingFetcher::default());
    let started = fetcher.started.clone();
    let manager = Arc::new(OperationManager::new(operation_deps(dir.path(), fetcher)));
    let folder = dir.path().join("install");
    let first = install_op("dup", &dir.path().join("s1"), &folder, upload(1));

    let running = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.start(first, RecordingConn::new()).await })
    };
    started.notified().await;

    let same_id = install_op("dup", &dir.path().join("s2"), &dir.path().join("other"), upload(1));
    let err = manager
        .start(same_id, RecordingConn::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PorterError::OperationInProgress(_)));

    let same_folder = uninstall_op("other-id", &dir.path().join("s3"), &folder);
    let err = manager
        .start(same_folder, RecordingConn::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PorterError::OperationInProgress(_)));
    assert_eq!(manager.staging_folders(), vec![dir.path().join("s1")]);

    manager.cancel("dup");
    assert!(matches!(
        running.await.unwrap().unwrap(),
        OperationOutcome::Cancelled
    ));
}

#[tokio::test]
async fn uninstalling_twice_is_fine() {
    let dir = tempfile::tempdir().unwrap();
    let manager = OperationManager::new(operation_deps(
        dir.path(),
        Arc::new(ScriptedFetcher {
            body: zip_bytes(&[("bin/game", b"x")]),
        }),
    ));
    let folder = dir.path().join("install");
    manager
        .start(
            install_op("install", &dir.path().join("staging"), &folder, upload(3)),
            RecordingConn::new(),
        )
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert!(folder.join("bin/game").exists());

    for id in ["uninstall-1", "uninstall-2"] {
        let conn = RecordingConn::new();
        let outcome = manager
            .start(uninstall_op(id, &dir.path().join("staging"), &folder), conn.clone())
            .await
            .unwrap();
        assert!(matches!(outcome, OperationOutcome::Completed), "{id}");
        assert_eq!(succeeded(&conn), vec![TaskType::Uninstall]);
    }
    assert!(!folder.exists());
}

#[tokio::test]
async fn picking_no_upload_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let manager = OperationManager::new(operation_deps(
        dir.path(),
        Arc::new(ScriptedFetcher { body: vec![] }),
    ));
    let conn = RecordingConn::answering("PickUpload", json!({ "index": -1 }));
    let mut params = install_op("pick", &dir.path().join("staging"), &dir.path().join("i"), upload(1));
    if let Some(install) = params.install_params.as_mut() {
        install.upload = None;
        install.uploads = vec![upload(1), upload(2)];
    }

    let outcome = manager.start(params, conn.clone()).await.unwrap();
    match outcome {
        OperationOutcome::Failed(e) => assert_eq!(e.code() as i64, 410),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(conn.call_methods(), vec!["PickUpload"]);
    assert!(conn.methods().is_empty());
}

#[tokio::test]
async fn mismatched_params_fail_validation() {
    let dir = tempfile::tempdir().unwrap();
    let manager = OperationManager::new(operation_deps(
        dir.path(),
        Arc::new(ScriptedFetcher { body: vec![] }),
    ));
    let mut params = install_op("bad", &dir.path().join("s"), &dir.path().join("i"), upload(1));
    params.uninstall_params = Some(UninstallParams {
        install_folder: PathBuf::from("/elsewhere"),
    });
    let err = manager.start(params, RecordingConn::new()).await.unwrap_err();
    assert!(matches!(err, PorterError::Validation(_)));
}

#[tokio::test]
async fn staging_inside_the_install_folder_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let manager = OperationManager::new(operation_deps(
        dir.path(),
        Arc::new(ScriptedFetcher {
            body: zip_bytes(&[("bin/game", b"#!/bin/sh\n")]),
        }),
    ));
    let folder = dir.path().join("install");
    std::fs::create_dir_all(&folder).unwrap();
    std::fs::write(folder.join("save.dat"), b"progress").unwrap();

    for staging in [folder.clone(), folder.join(".staging")] {
        let conn = RecordingConn::new();
        let err = manager
            .start(install_op("overlap", &staging, &folder, upload(1)), conn.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, PorterError::Validation(_)), "{err:?}");
        assert!(conn.methods().is_empty());
    }
    assert!(folder.join("save.dat").is_file());
    assert!(!manager.is_live("overlap"));
}
