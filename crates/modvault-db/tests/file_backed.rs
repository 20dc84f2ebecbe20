//! Records survive reopening a file-backed database.

use chrono::Utc;
use modvault_core::{JobQueue, Mod, RecordStore, Stability, Version, VersionTarget};
use modvault_db::SqliteRecordStore;

fn version() -> Version {
    Version {
        id: "v1".to_string(),
        mod_id: "m1".to_string(),
        version: "1.0.0".to_string(),
        sml_version: "^3.7.0".to_string(),
        changelog: String::new(),
        stability: Stability::Release,
        mod_reference: "ModA".to_string(),
        hash: "h".to_string(),
        size: 3,
        version_major: 1,
        version_minor: 0,
        version_patch: 0,
        approved: true,
        key: Some("mods/m1/versions/1.0.0/ModA-1.0.0.smod".to_string()),
        metadata: None,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_reopen_sees_committed_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.db");

    {
        let store = SqliteRecordStore::open(&path).unwrap();
        store
            .insert_mod(&Mod {
                id: "m1".to_string(),
                name: "ModA".to_string(),
                mod_reference: "ModA".to_string(),
                last_published_at: None,
            })
            .unwrap();
        store.create_version(&version()).await.unwrap();
        store
            .save_target(&VersionTarget::declared("v1", "Windows"))
            .await
            .unwrap();
        store
            .job_queue()
            .submit_virus_scan("m1", "v1", true)
            .await
            .unwrap();
    }

    let reopened = SqliteRecordStore::open(&path).unwrap();
    let loaded = reopened.find_version("m1", "1.0.0").unwrap().unwrap();
    assert!(loaded.approved);
    assert_eq!(loaded.key, version().key);
    assert_eq!(reopened.targets_for("v1").unwrap().len(), 1);
    assert_eq!(reopened.job_queue().pending_jobs().unwrap().len(), 1);
    assert_eq!(reopened.versions_for("m1").unwrap().len(), 1);
}

#[tokio::test]
async fn test_force_delete_clears_queued_scan() {
    let store = SqliteRecordStore::memory().unwrap();
    store
        .insert_mod(&Mod {
            id: "m1".to_string(),
            name: "ModA".to_string(),
            mod_reference: "ModA".to_string(),
            last_published_at: None,
        })
        .unwrap();
    store.create_version(&version()).await.unwrap();
    let jobs = store.job_queue();
    jobs.submit_virus_scan("m1", "v1", true).await.unwrap();

    store.force_delete_version(&version()).await.unwrap();

    assert!(jobs.pending_jobs().unwrap().is_empty());
    assert!(store.get_version("v1").unwrap().is_none());
}
