//! In-memory collaborators with failure injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use modvault_core::{
    ArtifactStore, Collaborators, ContentObject, ExtractOptions, FinalizationOrchestrator,
    FinalizeConfig, JobQueue, Mod, ModInfo, NotificationSink, PackageFormat, PackageValidator,
    QueueError, RecordError, RecordResult, RecordStore, StagedUpload, StoreError, StoreResult,
    TargetArtifact, ValidationError, Version, VersionDependency, VersionTarget,
};

/// Named call sites that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Failpoint {
    Complete,
    GetObject,
    Extract,
    CreateVersion,
    SaveDependency,
    SaveVersion,
    SaveTarget,
    Split,
    Rename,
    SubmitScan,
    SaveMod,
    ForceDelete,
    DeleteBlob,
}

/// Shared failure schedule.
#[derive(Default)]
pub struct Faults {
    /// Fail on the nth call (1-based); 0 fails every call.
    armed: Mutex<HashMap<Failpoint, usize>>,
    hits: Mutex<HashMap<Failpoint, usize>>,
    hang: Mutex<Option<Failpoint>>,
    hang_after: Mutex<Option<Failpoint>>,
}

impl Faults {
    pub fn fail_on(&self, point: Failpoint, nth: usize) {
        self.armed.lock().unwrap().insert(point, nth);
    }

    pub fn fail_always(&self, point: Failpoint) {
        self.fail_on(point, 0);
    }

    /// Make the call site never complete.
    pub fn hang(&self, point: Failpoint) {
        *self.hang.lock().unwrap() = Some(point);
    }

    /// Let the call site apply its write, then never return.
    pub fn hang_after_write(&self, point: Failpoint) {
        *self.hang_after.lock().unwrap() = Some(point);
    }

    pub fn hits(&self, point: Failpoint) -> usize {
        self.hits.lock().unwrap().get(&point).copied().unwrap_or(0)
    }

    fn trip(&self, point: Failpoint) -> bool {
        let hit = {
            let mut hits = self.hits.lock().unwrap();
            let n = hits.entry(point).or_insert(0);
            *n += 1;
            *n
        };
        match self.armed.lock().unwrap().get(&point) {
            Some(0) => true,
            Some(nth) => *nth == hit,
            None => false,
        }
    }

    async fn maybe_hang(&self, point: Failpoint) {
        let hanging = *self.hang.lock().unwrap() == Some(point);
        if hanging {
            std::future::pending::<()>().await;
        }
    }

    async fn maybe_hang_after(&self, point: Failpoint) {
        let hanging = *self.hang_after.lock().unwrap() == Some(point);
        if hanging {
            std::future::pending::<()>().await;
        }
    }
}

fn staged_key(upload: &StagedUpload) -> String {
    format!(
        "staging/{}/{}/{}.smod",
        upload.mod_id, upload.upload_id, upload.mod_name
    )
}

fn version_prefix(mod_id: &str, version: &str) -> String {
    format!("mods/{}/versions/{}/", mod_id, version)
}

fn target_key(mod_id: &str, mod_name: &str, version: &str, target: &str) -> String {
    format!(
        "{}targets/{}/{}-{}-{}.smod",
        version_prefix(mod_id, version),
        target,
        mod_name,
        target,
        version
    )
}

fn injected() -> StoreError {
    StoreError::Io {
        message: "injected failure".to_string(),
    }
}

pub struct FakeArtifacts {
    faults: Arc<Faults>,
    objects: Mutex<BTreeMap<String, Bytes>>,
}

impl FakeArtifacts {
    pub fn new(faults: Arc<Faults>) -> Self {
        Self {
            faults,
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn stage(&self, upload: &StagedUpload, package: &'static [u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(staged_key(upload), Bytes::from_static(package));
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn keys_under(&self, prefix: &str) -> Vec<String> {
        self.keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl ArtifactStore for FakeArtifacts {
    async fn complete_multipart_upload(&self, upload: &StagedUpload) -> StoreResult<()> {
        self.faults.maybe_hang(Failpoint::Complete).await;
        if self.faults.trip(Failpoint::Complete) {
            return Err(injected());
        }
        let key = staged_key(upload);
        if self.objects.lock().unwrap().contains_key(&key) {
            Ok(())
        } else {
            Err(StoreError::NotFound { key })
        }
    }

    async fn get_object(&self, upload: &StagedUpload) -> StoreResult<Bytes> {
        if self.faults.trip(Failpoint::GetObject) {
            return Err(injected());
        }
        let key = staged_key(upload);
        self.objects
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(StoreError::NotFound { key })
    }

    async fn delete_object(&self, upload: &StagedUpload) -> StoreResult<()> {
        if self.faults.trip(Failpoint::DeleteBlob) {
            return Err(injected());
        }
        self.objects.lock().unwrap().remove(&staged_key(upload));
        Ok(())
    }

    async fn split_and_upload_target(
        &self,
        package: &Bytes,
        mod_id: &str,
        mod_name: &str,
        version: &str,
        target: &str,
    ) -> StoreResult<TargetArtifact> {
        self.faults.maybe_hang(Failpoint::Split).await;
        if self.faults.trip(Failpoint::Split) {
            return Err(StoreError::TargetMissing {
                target: target.to_string(),
            });
        }
        let key = target_key(mod_id, mod_name, version, target);
        let body = Bytes::from(format!("{}:{}", target, package.len()));
        let size = body.len() as u64;
        self.objects.lock().unwrap().insert(key.clone(), body);
        Ok(TargetArtifact {
            key,
            hash: format!("sha-{}", target.to_lowercase()),
            size,
        })
    }

    async fn rename_version(&self, upload: &StagedUpload, version: &str) -> StoreResult<String> {
        if self.faults.trip(Failpoint::Rename) {
            return Err(injected());
        }
        let from = staged_key(upload);
        let to = format!(
            "{}{}-{}.smod",
            version_prefix(&upload.mod_id, version),
            upload.mod_name,
            version
        );
        let mut objects = self.objects.lock().unwrap();
        let body = objects
            .remove(&from)
            .ok_or(StoreError::NotFound { key: from })?;
        objects.insert(to.clone(), body);
        Ok(to)
    }

    async fn delete_version(&self, mod_id: &str, _mod_name: &str, version: &str) -> StoreResult<()> {
        if self.faults.trip(Failpoint::DeleteBlob) {
            return Err(injected());
        }
        let prefix = version_prefix(mod_id, version);
        self.objects
            .lock()
            .unwrap()
            .retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }

    async fn delete_target_artifact(
        &self,
        mod_id: &str,
        mod_name: &str,
        version: &str,
        target: &str,
    ) -> StoreResult<()> {
        if self.faults.trip(Failpoint::DeleteBlob) {
            return Err(injected());
        }
        self.objects
            .lock()
            .unwrap()
            .remove(&target_key(mod_id, mod_name, version, target));
        Ok(())
    }
}

#[derive(Default)]
struct Rows {
    mods: HashMap<String, Mod>,
    versions: HashMap<String, Version>,
    dependencies: Vec<VersionDependency>,
    targets: Vec<VersionTarget>,
}

pub struct FakeRecords {
    faults: Arc<Faults>,
    rows: Mutex<Rows>,
}

fn db_failure() -> RecordError {
    RecordError::Database("injected failure".to_string())
}

impl FakeRecords {
    pub fn new(faults: Arc<Faults>) -> Self {
        Self {
            faults,
            rows: Mutex::new(Rows::default()),
        }
    }

    pub fn insert_mod(&self, owner: Mod) {
        self.rows.lock().unwrap().mods.insert(owner.id.clone(), owner);
    }

    pub fn get_mod(&self, id: &str) -> Option<Mod> {
        self.rows.lock().unwrap().mods.get(id).cloned()
    }

    pub fn versions(&self) -> Vec<Version> {
        self.rows.lock().unwrap().versions.values().cloned().collect()
    }

    pub fn dependencies(&self) -> Vec<VersionDependency> {
        self.rows.lock().unwrap().dependencies.clone()
    }

    pub fn targets(&self) -> Vec<VersionTarget> {
        self.rows.lock().unwrap().targets.clone()
    }

    /// Whether no version, dependency or target row exists.
    pub fn is_clean(&self) -> bool {
        let rows = self.rows.lock().unwrap();
        rows.versions.is_empty() && rows.dependencies.is_empty() && rows.targets.is_empty()
    }
}

#[async_trait]
impl RecordStore for FakeRecords {
    async fn get_mod_by_id(&self, id: &str) -> RecordResult<Option<Mod>> {
        Ok(self.rows.lock().unwrap().mods.get(id).cloned())
    }

    async fn save_mod(&self, owner: &Mod) -> RecordResult<()> {
        if self.faults.trip(Failpoint::SaveMod) {
            return Err(db_failure());
        }
        self.insert_mod(owner.clone());
        Ok(())
    }

    async fn create_version(&self, version: &Version) -> RecordResult<()> {
        if self.faults.trip(Failpoint::CreateVersion) {
            return Err(db_failure());
        }
        {
            let mut rows = self.rows.lock().unwrap();
            let duplicate = rows
                .versions
                .values()
                .any(|v| v.mod_id == version.mod_id && v.version == version.version);
            if duplicate {
                return Err(RecordError::Conflict {
                    message: format!("version {} already exists", version.version),
                });
            }
            rows.versions.insert(version.id.clone(), version.clone());
        }
        self.faults.maybe_hang_after(Failpoint::CreateVersion).await;
        Ok(())
    }

    async fn save_version(&self, version: &Version) -> RecordResult<()> {
        if self.faults.trip(Failpoint::SaveVersion) {
            return Err(db_failure());
        }
        let mut rows = self.rows.lock().unwrap();
        match rows.versions.get_mut(&version.id) {
            Some(row) => {
                *row = version.clone();
                Ok(())
            }
            None => Err(RecordError::NotFound {
                entity: "version",
                id: version.id.clone(),
            }),
        }
    }

    async fn save_dependency(&self, dependency: &VersionDependency) -> RecordResult<()> {
        if self.faults.trip(Failpoint::SaveDependency) {
            return Err(db_failure());
        }
        let mut rows = self.rows.lock().unwrap();
        rows.dependencies.retain(|d| {
            !(d.version_id == dependency.version_id
                && d.mod_id == dependency.mod_id
                && d.optional == dependency.optional)
        });
        rows.dependencies.push(dependency.clone());
        Ok(())
    }

    async fn save_target(&self, target: &VersionTarget) -> RecordResult<()> {
        if self.faults.trip(Failpoint::SaveTarget) {
            return Err(db_failure());
        }
        let mut rows = self.rows.lock().unwrap();
        rows.targets.retain(|t| {
            !(t.version_id == target.version_id && t.target_name == target.target_name)
        });
        rows.targets.push(target.clone());
        Ok(())
    }

    async fn force_delete_dependency(&self, dependency: &VersionDependency) -> RecordResult<()> {
        if self.faults.trip(Failpoint::ForceDelete) {
            return Err(db_failure());
        }
        self.rows.lock().unwrap().dependencies.retain(|d| {
            !(d.version_id == dependency.version_id
                && d.mod_id == dependency.mod_id
                && d.optional == dependency.optional)
        });
        Ok(())
    }

    async fn force_delete_target(&self, target: &VersionTarget) -> RecordResult<()> {
        if self.faults.trip(Failpoint::ForceDelete) {
            return Err(db_failure());
        }
        self.rows.lock().unwrap().targets.retain(|t| {
            !(t.version_id == target.version_id && t.target_name == target.target_name)
        });
        Ok(())
    }

    async fn force_delete_version(&self, version: &Version) -> RecordResult<()> {
        if self.faults.trip(Failpoint::ForceDelete) {
            return Err(db_failure());
        }
        self.rows.lock().unwrap().versions.remove(&version.id);
        Ok(())
    }
}

/// Returns a fixed `ModInfo` for any package.
pub struct FakeValidator {
    faults: Arc<Faults>,
    info: ModInfo,
    seen_options: Mutex<Vec<ExtractOptions>>,
}

impl FakeValidator {
    pub fn new(faults: Arc<Faults>, info: ModInfo) -> Self {
        Self {
            faults,
            info,
            seen_options: Mutex::new(Vec::new()),
        }
    }

    pub fn seen_options(&self) -> Vec<ExtractOptions> {
        self.seen_options.lock().unwrap().clone()
    }
}

#[async_trait]
impl PackageValidator for FakeValidator {
    async fn extract(
        &self,
        package: &[u8],
        options: ExtractOptions,
        _expected_reference: &str,
    ) -> Result<ModInfo, ValidationError> {
        self.seen_options.lock().unwrap().push(options);
        if self.faults.trip(Failpoint::Extract) || package.is_empty() {
            return Err(ValidationError::Malformed {
                reason: "injected failure".to_string(),
            });
        }
        Ok(self.info.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanJob {
    pub mod_id: String,
    pub version_id: String,
    pub notify_on_result: bool,
}

pub struct FakeJobs {
    faults: Arc<Faults>,
    submitted: Mutex<Vec<ScanJob>>,
}

impl FakeJobs {
    pub fn new(faults: Arc<Faults>) -> Self {
        Self {
            faults,
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn submitted(&self) -> Vec<ScanJob> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for FakeJobs {
    async fn submit_virus_scan(
        &self,
        mod_id: &str,
        version_id: &str,
        notify_on_result: bool,
    ) -> Result<(), QueueError> {
        if self.faults.trip(Failpoint::SubmitScan) {
            return Err(QueueError::Unavailable {
                message: "queue down".to_string(),
            });
        }
        self.submitted.lock().unwrap().push(ScanJob {
            mod_id: mod_id.to_string(),
            version_id: version_id.to_string(),
            notify_on_result,
        });
        Ok(())
    }
}

/// Forwards every delivery attempt to a channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Version>,
    failing: bool,
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn notify_new_version(&self, version: &Version) -> Result<(), QueueError> {
        let _ = self.tx.send(version.clone());
        if self.failing {
            return Err(QueueError::Unavailable {
                message: "webhook down".to_string(),
            });
        }
        Ok(())
    }
}

pub const PACKAGE: &[u8] = b"fake package bytes";

pub fn owner() -> Mod {
    Mod {
        id: "mod-a".to_string(),
        name: "ModA".to_string(),
        mod_reference: "ModA".to_string(),
        last_published_at: None,
    }
}

/// Two pak objects, two targets, one required and one optional dependency.
pub fn mod_info() -> ModInfo {
    let mut dependencies = BTreeMap::new();
    dependencies.insert("SML".to_string(), "^3.7.0".to_string());
    let mut optional_dependencies = BTreeMap::new();
    optional_dependencies.insert("ModB".to_string(), ">=1.0.0".to_string());

    ModInfo {
        mod_reference: "ModA".to_string(),
        version: "2.10.3".to_string(),
        semver: semver::Version::new(2, 10, 3),
        sml_version: "^3.7.0".to_string(),
        hash: "package-sha".to_string(),
        size: PACKAGE.len() as u64,
        format: PackageFormat::MultiTargetPlugin,
        targets: vec!["Windows".to_string(), "Linux".to_string()],
        objects: vec![
            ContentObject::new("Windows/Content/Paks/ModA.pak", "pak"),
            ContentObject::new("Linux/Content/Paks/ModA.pak", "pak"),
        ],
        dependencies,
        optional_dependencies,
        metadata: serde_json::json!({ "friendly_name": "Mod A" }),
    }
}

pub struct Harness {
    pub faults: Arc<Faults>,
    pub artifacts: Arc<FakeArtifacts>,
    pub records: Arc<FakeRecords>,
    pub validator: Arc<FakeValidator>,
    pub jobs: Arc<FakeJobs>,
    sink: Arc<ChannelSink>,
}

impl Harness {
    pub fn new(info: ModInfo) -> (Self, mpsc::UnboundedReceiver<Version>) {
        Self::with_sink(info, false)
    }

    pub fn with_sink(info: ModInfo, failing: bool) -> (Self, mpsc::UnboundedReceiver<Version>) {
        let faults = Arc::new(Faults::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let harness = Self {
            artifacts: Arc::new(FakeArtifacts::new(faults.clone())),
            records: Arc::new(FakeRecords::new(faults.clone())),
            validator: Arc::new(FakeValidator::new(faults.clone(), info)),
            jobs: Arc::new(FakeJobs::new(faults.clone())),
            sink: Arc::new(ChannelSink { tx, failing }),
            faults,
        };
        harness.records.insert_mod(owner());
        (harness, rx)
    }

    pub fn orchestrator(&self, config: FinalizeConfig) -> FinalizationOrchestrator {
        FinalizationOrchestrator::new(
            Collaborators {
                artifacts: self.artifacts.clone(),
                records: self.records.clone(),
                validator: self.validator.clone(),
                jobs: self.jobs.clone(),
                notifications: self.sink.clone(),
            },
            config,
        )
    }

    /// Stage the default package under `upload_id`.
    pub fn stage(&self, upload_id: &str) -> StagedUpload {
        let upload = StagedUpload::for_mod(&owner(), upload_id);
        self.artifacts.stage(&upload, PACKAGE);
        upload
    }

    pub fn staged_key(&self, upload: &StagedUpload) -> String {
        staged_key(upload)
    }

    /// Blobs under the version's root prefix.
    pub fn version_blobs(&self, version: &str) -> Vec<String> {
        self.artifacts
            .keys_under(&version_prefix(&owner().id, version))
    }
}
