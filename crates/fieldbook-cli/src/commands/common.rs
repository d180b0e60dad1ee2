use std::env;
use std::path::Path;
use std::sync::Arc;

use fieldbook_core::capture::StandardCompressor;
use fieldbook_core::db::Db;
use fieldbook_core::identity::IdentityMap;
use fieldbook_core::reactive::ChangeBus;
use fieldbook_core::remote::{HttpRemote, MemoryRemote, RemoteApi};
use fieldbook_core::stores::{FieldStore, ImageStore, Outbox};
use fieldbook_core::sync::{SyncOptions, Synchronizer};

use crate::error::CliError;

/// Wired-up stores over one local database.
pub struct App {
    pub outbox: Outbox,
    pub fields: FieldStore,
    pub images: ImageStore,
    pub identity: IdentityMap,
    pub remote: Arc<dyn RemoteApi>,
    pub remote_configured: bool,
}

pub async fn open_app(db_path: &Path) -> Result<App, CliError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let db = Db::open_path(db_path)?;
    let bus = ChangeBus::default();
    let outbox = Outbox::new(db.clone(), bus.clone());
    let fields = FieldStore::new(db.clone(), bus.clone());
    let identity = IdentityMap::load(db.clone(), bus.clone()).await?;
    let (remote, remote_configured) = remote_from_env()?;
    let images = ImageStore::new(
        db,
        bus,
        outbox.clone(),
        identity.clone(),
        Arc::new(StandardCompressor),
        remote.clone(),
    );
    Ok(App {
        outbox,
        fields,
        images,
        identity,
        remote,
        remote_configured,
    })
}

/// Remote API from the environment; an offline in-memory stand-in when no
/// base URL is configured, so every local command works without a network.
fn remote_from_env() -> Result<(Arc<dyn RemoteApi>, bool), CliError> {
    match env::var("FIELDBOOK_API_URL") {
        Ok(url) if !url.trim().is_empty() => {
            let token = env::var("FIELDBOOK_API_TOKEN").ok();
            Ok((Arc::new(HttpRemote::new(url, token)?), true))
        }
        _ => Ok((Arc::new(MemoryRemote::new()), false)),
    }
}

impl App {
    pub fn synchronizer(&self) -> Result<Synchronizer, CliError> {
        if !self.remote_configured {
            return Err(CliError::SyncNotConfigured);
        }
        Ok(Synchronizer::new(
            self.outbox.clone(),
            self.fields.clone(),
            self.images.clone(),
            self.identity.clone(),
            self.remote.clone(),
            SyncOptions::default(),
        ))
    }
}
