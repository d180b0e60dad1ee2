//! End-to-end offline capture and sync scenarios against a file-backed
//! database and the in-memory remote.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fieldbook_core::capture::{CapturedFile, StandardCompressor};
use fieldbook_core::db::Db;
use fieldbook_core::identity::IdentityMap;
use fieldbook_core::models::{ImageStatus, InspectionTemplate, VisualKind};
use fieldbook_core::reactive::ChangeBus;
use fieldbook_core::remote::MemoryRemote;
use fieldbook_core::stores::{FieldStore, ImageStore, Outbox, ATTACH_TABLE, VISUALS_TABLE};
use fieldbook_core::sync::{BackoffPolicy, SyncOptions, Synchronizer};
use fieldbook_core::timer::MockClock;
use fieldbook_core::viewmodel::CategoryDetailViewModel;

struct App {
    vm: CategoryDetailViewModel,
    sync: Synchronizer,
    images: ImageStore,
    fields: FieldStore,
    identity: IdentityMap,
}

/// Wire a full app over a database file; reopening the same path simulates
/// an app restart with the durable state intact.
async fn open_app(db_path: &Path, remote: Arc<MemoryRemote>) -> App {
    let db = Db::open_path(db_path).unwrap();
    let bus = ChangeBus::default();
    let outbox = Outbox::new(db.clone(), bus.clone());
    let fields = FieldStore::new(db.clone(), bus.clone());
    let identity = IdentityMap::load(db.clone(), bus.clone()).await.unwrap();
    let images = ImageStore::new(
        db,
        bus.clone(),
        outbox.clone(),
        identity.clone(),
        Arc::new(StandardCompressor),
        remote.clone(),
    );
    let templates = vec![InspectionTemplate::new(
        10,
        "Foundation Cracks",
        "Visible cracking in the foundation",
        VisualKind::Deficiency,
        vec!["Minor".to_string(), "Severe".to_string()],
    )];
    let vm = CategoryDetailViewModel::new(
        "svc-1",
        "Foundations",
        templates,
        fields.clone(),
        images.clone(),
        outbox.clone(),
        bus,
        Arc::new(MockClock::new()),
    );
    let sync = Synchronizer::new(
        outbox,
        fields.clone(),
        images.clone(),
        identity.clone(),
        remote,
        SyncOptions {
            backoff: BackoffPolicy {
                base: Duration::from_millis(1),
                max: Duration::from_millis(1),
            },
            ..SyncOptions::default()
        },
    );
    App {
        vm,
        sync,
        images,
        fields,
        identity,
    }
}

fn jpeg_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(128, 96, image::Rgb([90, 120, 70]));
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Jpeg)
        .unwrap();
    out
}

#[tokio::test]
async fn offline_capture_with_caption_survives_going_online() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("fieldbook.db");
    let remote = Arc::new(MemoryRemote::new());
    remote.set_offline(true);

    let app = open_app(&db_path, remote.clone()).await;
    let _rx = app.vm.enter().await.unwrap();
    app.vm.toggle_selection(10, true).await.unwrap();

    // Three gallery photos, captured fully offline.
    let files = vec![
        CapturedFile::new("a.jpg", jpeg_bytes()),
        CapturedFile::new("b.jpg", jpeg_bytes()),
        CapturedFile::new("c.jpg", jpeg_bytes()),
    ];
    assert_eq!(app.vm.capture_photos(10, &files).await.unwrap(), 3);

    let item = app.vm.item(10).await.unwrap();
    let second = item.photos.entries()[1].image_id.clone();
    app.vm.set_caption(&second, "North wall").await.unwrap();

    // Offline drain makes no progress and loses nothing.
    let summary = app.sync.drain().await.unwrap();
    assert_eq!(summary.synced, 0);

    remote.set_offline(false);
    let summary = app.sync.drain().await.unwrap();
    assert_eq!(summary.rejected, 0);
    // Visual create, three uploads, one caption update.
    assert_eq!(summary.synced, 5);

    let field = app
        .fields
        .get("svc-1", "Foundations", 10)
        .await
        .unwrap()
        .unwrap();
    assert!(field.is_selected);
    let real_id = field.visual_id.clone().expect("server id assigned");

    let photos = app.images.images_for_entity(real_id.as_str()).await.unwrap();
    assert_eq!(photos.len(), 3);
    for photo in &photos {
        assert_eq!(photo.status, ImageStatus::Verified);
        assert!(photo.attach_id.is_some());
    }
    // Stable identity: UI key unchanged through the whole lifecycle.
    let synced_second = photos
        .iter()
        .find(|photo| photo.image_id == second)
        .expect("same image id after sync");
    assert_eq!(synced_second.caption, "North wall");

    assert_eq!(remote.records(VISUALS_TABLE).len(), 1);
    assert_eq!(remote.records(ATTACH_TABLE).len(), 3);
}

#[tokio::test]
async fn restart_before_sync_preserves_temp_id_and_never_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("fieldbook.db");
    let remote = Arc::new(MemoryRemote::new());
    remote.set_offline(true);

    let temp_id = {
        let app = open_app(&db_path, remote.clone()).await;
        let _rx = app.vm.enter().await.unwrap();
        app.vm.toggle_selection(10, true).await.unwrap();
        app.vm
            .item(10)
            .await
            .unwrap()
            .field
            .temp_visual_id
            .expect("temp id assigned")
        // App dies here, before any sync.
    };

    // Relaunch offline: selection and temp id come back from disk.
    let app = open_app(&db_path, remote.clone()).await;
    let _rx = app.vm.enter().await.unwrap();
    let item = app.vm.item(10).await.unwrap();
    assert!(item.field.is_selected);
    assert_eq!(item.field.temp_visual_id.as_ref(), Some(&temp_id));

    // Re-selecting after the restart must not queue a second create.
    app.vm.toggle_selection(10, true).await.unwrap();

    remote.set_offline(false);
    let summary = app.sync.drain().await.unwrap();
    assert_eq!(summary.rejected, 0);
    assert_eq!(remote.records(VISUALS_TABLE).len(), 1);

    let real_id = app
        .identity
        .real_id(temp_id.as_str())
        .expect("identity resolved");
    let field = app
        .fields
        .find_by_entity_id(&real_id)
        .await
        .unwrap()
        .expect("field reachable by real id");
    assert!(field.is_selected);
}

#[tokio::test]
async fn failed_upload_keeps_photo_and_caption_editable() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("fieldbook.db");
    let remote = Arc::new(MemoryRemote::new());

    let app = open_app(&db_path, remote.clone()).await;
    let _rx = app.vm.enter().await.unwrap();
    app.vm.toggle_selection(10, true).await.unwrap();
    app.sync.drain().await.unwrap();

    app.vm
        .capture_photos(10, &[CapturedFile::new("a.jpg", jpeg_bytes())])
        .await
        .unwrap();

    // The upload itself is rejected outright.
    remote.fail_next(1, false);
    let summary = app.sync.drain().await.unwrap();
    assert_eq!(summary.rejected, 1);

    let item = app.vm.item(10).await.unwrap();
    let entity_id = item.field.current_id().unwrap();
    let photos = app.images.images_for_entity(&entity_id).await.unwrap();
    assert_eq!(photos.len(), 1);
    assert_eq!(photos[0].status, ImageStatus::Failed);

    // The failed photo still takes a caption edit.
    app.vm.set_caption(&photos[0].image_id, "retry later").await.unwrap();
    let photos = app.images.images_for_entity(&entity_id).await.unwrap();
    assert_eq!(photos[0].caption, "retry later");
}
