use crate::db::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_shutdown_state_clean_lifecycle() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    assert!(
        db.was_unclean_shutdown().await.unwrap(),
        "fresh database has no clean shutdown marker"
    );

    db.set_clean_start().await.unwrap();
    assert!(db.was_unclean_shutdown().await.unwrap());

    db.set_clean_shutdown().await.unwrap();
    assert!(!db.was_unclean_shutdown().await.unwrap());

    db.close().await;
}

#[tokio::test]
async fn test_shutdown_state_survives_reopen() {
    let temp_file = NamedTempFile::new().unwrap();

    {
        let db = Database::new(temp_file.path()).await.unwrap();
        db.set_clean_start().await.unwrap();
        // Simulated crash: no clean shutdown
        db.close().await;
    }

    let db = Database::new(temp_file.path()).await.unwrap();
    assert!(db.was_unclean_shutdown().await.unwrap());
    db.close().await;
}

#[tokio::test]
async fn test_status_values_round_trip() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    assert_eq!(db.last_update_check().await.unwrap(), None);
    assert_eq!(db.current_state().await.unwrap(), None);
    assert_eq!(db.ota_enabled_cache().await.unwrap(), None);
    assert_eq!(db.artifact_path().await.unwrap(), None);

    db.set_last_update_check(1_700_000_000_123).await.unwrap();
    db.set_current_state(r#"{"state":"available"}"#).await.unwrap();
    db.set_ota_enabled_cache(false).await.unwrap();
    db.set_artifact_path(Some("/downloads/aospa.zip")).await.unwrap();

    assert_eq!(
        db.last_update_check().await.unwrap(),
        Some(1_700_000_000_123)
    );
    assert_eq!(
        db.current_state().await.unwrap().as_deref(),
        Some(r#"{"state":"available"}"#)
    );
    assert_eq!(db.ota_enabled_cache().await.unwrap(), Some(false));
    assert_eq!(
        db.artifact_path().await.unwrap().as_deref(),
        Some("/downloads/aospa.zip")
    );

    db.set_artifact_path(None).await.unwrap();
    assert_eq!(db.artifact_path().await.unwrap(), None);

    db.close().await;
}

#[tokio::test]
async fn test_values_are_durable_across_reopen() {
    let temp_file = NamedTempFile::new().unwrap();

    {
        let db = Database::new(temp_file.path()).await.unwrap();
        db.set_current_state(r#"{"state":"downloaded"}"#).await.unwrap();
        db.set_ota_enabled_cache(true).await.unwrap();
        db.close().await;
    }

    let db = Database::new(temp_file.path()).await.unwrap();
    assert_eq!(
        db.current_state().await.unwrap().as_deref(),
        Some(r#"{"state":"downloaded"}"#)
    );
    assert_eq!(db.ota_enabled_cache().await.unwrap(), Some(true));
    db.close().await;
}

#[tokio::test]
async fn test_overwrite_replaces_value() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.set_last_update_check(1).await.unwrap();
    db.set_last_update_check(2).await.unwrap();
    assert_eq!(db.last_update_check().await.unwrap(), Some(2));

    // Garbage in the check time reads as "never checked"
    db.set_state_value(keys::LAST_UPDATE_CHECK, "yesterday")
        .await
        .unwrap();
    assert_eq!(db.last_update_check().await.unwrap(), None);

    // Removing a missing key is fine
    db.remove_state_value("never-written").await.unwrap();
    db.close().await;
}

#[tokio::test]
async fn test_first_session_detection() {
    let temp_file = NamedTempFile::new().unwrap();

    {
        let db = Database::new(temp_file.path()).await.unwrap();
        assert!(db.is_first_session().await.unwrap());
        db.set_clean_start().await.unwrap();
        assert!(!db.is_first_session().await.unwrap());
        db.close().await;
    }

    let db = Database::new(temp_file.path()).await.unwrap();
    assert!(!db.is_first_session().await.unwrap());
    db.close().await;
}
