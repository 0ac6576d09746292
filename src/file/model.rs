//! The File aggregate.
//!
//! Single source of truth for a file's external-storage bookkeeping and its
//! relation-graph symmetry. An update runs a fixed sequence: credential
//! (re)acquisition, extra-file record regeneration, superseded-object
//! deletion, persist, relation-edge propagation, re-index scheduling. There
//! is no rollback across the sequence; the entity's own persist is the only
//! transactional step.

use std::collections::BTreeMap;

use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{error, warn};

use crate::config::StorageConfig;
use crate::db::{
    IndexQueueRepository, ItemRecord, ItemRepository, PropsheetMap, UniqueKey,
};
use crate::format::{FileFormat, FormatRegistry};
use crate::storage::ObjectStore;
use crate::{DepotError, Result};

use super::creds::{AccessMode, CredentialIssuer, ExternalCreds, StorageRecordKey};
use super::status::FileStatus;
use super::types::{inverse_relationship, FileClass, FileProperties, RelatedFile};

/// Upload principal names are capped at 32 characters.
pub const UPLOAD_PRINCIPAL_MAX_LEN: usize = 32;

/// Derive the federation principal name from a submitted filename: the
/// basename, truncated to [`UPLOAD_PRINCIPAL_MAX_LEN`] characters.
pub fn upload_principal_name(filename: Option<&str>) -> Option<String> {
    filename.map(|f| {
        f.rsplit('/')
            .next()
            .unwrap_or(f)
            .chars()
            .take(UPLOAD_PRINCIPAL_MAX_LEN)
            .collect()
    })
}

/// Whether upload credentials may be shown to this viewer.
///
/// A pure predicate over status and permission: credentials are visible
/// only to editors while the file is awaiting upload. When it returns
/// false the fields are withheld entirely, not rendered as null.
pub fn show_upload_credentials(status: Option<FileStatus>, can_edit: bool) -> bool {
    can_edit && status.is_some_and(|s| s.is_awaiting_upload())
}

/// A loaded File entity with its storage records.
#[derive(Debug, Clone)]
pub struct FileItem {
    pub uuid: String,
    pub class: FileClass,
    pub properties: FileProperties,
    pub storage_records: BTreeMap<StorageRecordKey, ExternalCreds>,
    pub sid: i64,
}

impl FileItem {
    /// Build a FileItem from a store record and its propsheets. Returns
    /// None when the record is not a File subtype.
    pub fn from_record(record: ItemRecord, sheets: PropsheetMap) -> Result<Option<Self>> {
        let Some(class) = FileClass::from_item_type(&record.item_type) else {
            return Ok(None);
        };
        let properties: FileProperties = serde_json::from_value(record.properties)?;
        let mut storage_records = BTreeMap::new();
        for (sheet_key, body) in sheets {
            if let Some(key) = StorageRecordKey::parse(&sheet_key) {
                let creds: ExternalCreds = serde_json::from_value(body)?;
                storage_records.insert(key, creds);
            }
        }
        Ok(Some(Self {
            uuid: record.uuid,
            class,
            properties,
            storage_records,
            sid: record.sid,
        }))
    }

    /// Canonical path of this item.
    pub fn at_id(&self) -> String {
        format!("/files/{}/", self.uuid)
    }

    /// The primary external storage record, if any.
    pub fn external(&self) -> Option<&ExternalCreds> {
        self.storage_records.get(&StorageRecordKey::Primary)
    }

    /// `<accession-or-external_accession>.<extension>`; no dot when the
    /// format declares no extension.
    pub fn display_title(&self, format: Option<&FileFormat>) -> String {
        let accession = self
            .properties
            .accession_or_external()
            .unwrap_or(&self.uuid);
        match format.and_then(|f| f.extension()) {
            Some(ext) => format!("{accession}.{ext}"),
            None => accession.to_string(),
        }
    }

    /// Download path for this file's primary artifact.
    pub fn href(&self, format: Option<&FileFormat>) -> String {
        format!("{}download/{}", self.at_id(), self.display_title(format))
    }

    /// `<file_type> (<format name>)`.
    pub fn file_type_detailed(&self, format: Option<&FileFormat>) -> String {
        let file_type = self.properties.file_type.as_deref().unwrap_or("other");
        match format {
            Some(f) => format!("{} ({})", file_type, f.file_format),
            None => file_type.to_string(),
        }
    }

    /// The storage key backing the primary record, derived on demand when
    /// no record exists yet.
    pub fn upload_key(&self, format: Option<&FileFormat>) -> String {
        match self.external() {
            Some(external) => external.key.clone(),
            None => format!("{}/{}", self.uuid, self.display_title(format)),
        }
    }
}

/// Unique keys contributed by a property document: the accession name key,
/// plus an `md5:` alias unless the file is replaced (replaced files must
/// not block reuse of their checksum).
pub fn unique_keys_for(properties: &FileProperties) -> Vec<UniqueKey> {
    let mut keys = Vec::new();
    if let Some(accession) = &properties.accession {
        keys.push(UniqueKey::new("accession", accession));
    }
    if properties.status != Some(FileStatus::Replaced) {
        if let Some(md5sum) = &properties.md5sum {
            keys.push(UniqueKey::new("alias", format!("md5:{md5sum}")));
        }
    }
    keys
}

/// Outcome of propagating one relation edge to its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationResult {
    /// The inverse edge was written and the target queued for re-indexing.
    Propagated { sid: i64 },
    /// The target already carried the matching inverse edge.
    AlreadyConsistent,
    /// The relationship type has no known inverse; edge skipped.
    UnknownRelationship,
    /// The target could not be resolved; edge skipped.
    TargetNotFound,
    /// The target's own update failed.
    Failed(String),
}

/// One edge's propagation outcome, reported to the caller layer instead of
/// disappearing into logs.
#[derive(Debug, Clone)]
pub struct PropagationOutcome {
    pub target: String,
    pub relationship_type: String,
    pub result: PropagationResult,
}

/// What an update did beyond the entity's own persist.
#[derive(Debug, Clone, Default)]
pub struct UpdateReport {
    pub propagations: Vec<PropagationOutcome>,
}

/// Service coordinating the File aggregate against the store, the
/// credential issuer, and object storage.
pub struct FileService<'a> {
    pool: &'a SqlitePool,
    issuer: &'a dyn CredentialIssuer,
    store: &'a dyn ObjectStore,
    storage: &'a StorageConfig,
}

impl<'a> FileService<'a> {
    pub fn new(
        pool: &'a SqlitePool,
        issuer: &'a dyn CredentialIssuer,
        store: &'a dyn ObjectStore,
        storage: &'a StorageConfig,
    ) -> Self {
        Self {
            pool,
            issuer,
            store,
            storage,
        }
    }

    fn repo(&self) -> ItemRepository<'a> {
        ItemRepository::new(self.pool)
    }

    /// Format registry over the same store.
    pub fn formats(&self) -> FormatRegistry<'a> {
        FormatRegistry::new(self.pool)
    }

    /// Load a file by uuid.
    pub async fn load(&self, uuid: &str) -> Result<Option<FileItem>> {
        let Some(record) = self.repo().get(uuid).await? else {
            return Ok(None);
        };
        let sheets = self.repo().propsheets(uuid).await?;
        FileItem::from_record(record, sheets)
    }

    /// Resolve a file reference: uuid first, then accession.
    pub async fn resolve(&self, reference: &str) -> Result<Option<FileItem>> {
        if let Some(item) = self.load(reference).await? {
            return Ok(Some(item));
        }
        let Some(record) = self
            .repo()
            .get_by_unique_key("accession", reference)
            .await?
        else {
            return Ok(None);
        };
        let sheets = self.repo().propsheets(&record.uuid).await?;
        FileItem::from_record(record, sheets)
    }

    /// Build the primary external storage record for a property document,
    /// issuing a write grant when a filename triggers one.
    pub async fn build_external_creds(
        &self,
        uuid: &str,
        properties: &FileProperties,
    ) -> Result<ExternalCreds> {
        let format = match properties.file_format.as_deref() {
            Some(reference) => self.formats().get(reference).await?,
            None => None,
        };
        let Some(format) = format else {
            return Err(DepotError::Validation(
                "File format not in list of supported file types".to_string(),
            ));
        };

        let accession = properties.accession_or_external().unwrap_or(uuid);
        let title = match format.extension() {
            Some(ext) => format!("{accession}.{ext}"),
            None => accession.to_string(),
        };
        let key = format!("{uuid}/{title}");
        let name = upload_principal_name(properties.filename.as_deref());

        self.issuer
            .issue(
                &self.storage.file_upload_bucket,
                &key,
                name.as_deref(),
                AccessMode::Write,
            )
            .await
    }

    /// Create a file, eagerly acquiring upload credentials when the status
    /// is in the awaiting-upload family.
    pub async fn create(
        &self,
        class: FileClass,
        uuid: &str,
        properties: FileProperties,
    ) -> Result<(FileItem, UpdateReport)> {
        let mut item = FileItem {
            uuid: uuid.to_string(),
            class,
            properties: FileProperties::default(),
            storage_records: BTreeMap::new(),
            sid: 0,
        };
        let report = self.apply(&mut item, properties, BTreeMap::new(), true).await?;
        Ok((item, report))
    }

    /// Update a file: rotate credentials on awaiting-upload status,
    /// regenerate extra-file records, delete the superseded object on key
    /// change, persist, then propagate relation edges.
    pub async fn update(
        &self,
        item: &mut FileItem,
        properties: FileProperties,
        records: BTreeMap<StorageRecordKey, ExternalCreds>,
    ) -> Result<UpdateReport> {
        self.apply(item, properties, records, false).await
    }

    async fn apply(
        &self,
        item: &mut FileItem,
        mut properties: FileProperties,
        mut records: BTreeMap<StorageRecordKey, ExternalCreds>,
        is_create: bool,
    ) -> Result<UpdateReport> {
        // Always keep storage links set up while a file awaits its upload
        if properties.status.is_some_and(|s| s.is_awaiting_upload())
            && !records.contains_key(&StorageRecordKey::Primary)
        {
            let creds = self.build_external_creds(&item.uuid, &properties).await?;
            records.insert(StorageRecordKey::Primary, creds);
        }

        if !properties.extra_files.is_empty() {
            self.regenerate_extra_files(&item.uuid, &mut properties, &mut records)
                .await?;
        }

        // A rotated key supersedes the old object; its deletion is
        // best-effort and must never block the update.
        if let (Some(old), Some(new)) = (
            item.storage_records.get(&StorageRecordKey::Primary),
            records.get(&StorageRecordKey::Primary),
        ) {
            if old.key != new.key {
                if let Err(e) = self.store.delete_object(&old.bucket, &old.key).await {
                    error!(
                        "Failed to delete superseded object s3://{}/{}: {}",
                        old.bucket, old.key, e
                    );
                }
            }
        }

        let props_value = serde_json::to_value(&properties)?;
        let mut sheets = PropsheetMap::new();
        for (key, creds) in &records {
            sheets.insert(key.sheet_key(), serde_json::to_value(creds)?);
        }
        let unique_keys = unique_keys_for(&properties);

        let sid = if is_create {
            self.repo()
                .create(
                    &item.uuid,
                    item.class.item_type(),
                    &props_value,
                    &sheets,
                    &unique_keys,
                )
                .await?
                .sid
        } else {
            self.repo()
                .update(&item.uuid, &props_value, &sheets, &unique_keys)
                .await?
        };

        // The entity's own write has committed; propagate relation edges to
        // collaborators through their own update path.
        let propagations = if properties.related_files.is_empty() {
            Vec::new()
        } else {
            self.propagate_related_files(&item.uuid, &properties.related_files)
                .await
        };

        item.properties = properties;
        item.storage_records.append(&mut records);
        item.sid = sid;

        Ok(UpdateReport { propagations })
    }

    /// Regenerate every extra-file storage record.
    ///
    /// Formats are resolved and checked for duplicates for the whole list
    /// before any credential is issued, so a bad entry cannot leak freshly
    /// issued credential sets for its siblings.
    async fn regenerate_extra_files(
        &self,
        uuid: &str,
        properties: &mut FileProperties,
        records: &mut BTreeMap<StorageRecordKey, ExternalCreds>,
    ) -> Result<()> {
        let at_id = format!("/files/{uuid}/");
        let accession = properties
            .accession_or_external()
            .unwrap_or(uuid)
            .to_string();

        let mut resolved: Vec<(usize, FileFormat)> = Vec::new();
        let mut seen_formats: Vec<String> = Vec::new();
        for (i, xfile) in properties.extra_files.iter().enumerate() {
            // entries with no format are left untouched
            if xfile.file_format.is_empty() {
                continue;
            }
            let Some(format) = self.formats().get(&xfile.file_format).await? else {
                return Err(DepotError::Validation(
                    "Cannot find format item for the extra file".to_string(),
                ));
            };
            if seen_formats.contains(&format.uuid) {
                return Err(DepotError::Validation(
                    "Each file in extra_files must have unique file_format".to_string(),
                ));
            }
            seen_formats.push(format.uuid.clone());
            resolved.push((i, format));
        }

        for (i, format) in resolved {
            let xfile = &mut properties.extra_files[i];
            xfile.file_format = format.uuid.clone();
            xfile.accession = Some(accession.clone());
            // just need a filename to trigger creation of credentials
            if xfile.filename.is_none() {
                xfile.filename = Some(accession.clone());
            }
            xfile.uuid = Some(uuid.to_string());

            let title = match format.extension() {
                Some(ext) => format!("{accession}.{ext}"),
                None => accession.clone(),
            };
            let key = format!("{uuid}/{title}");
            let name = upload_principal_name(xfile.filename.as_deref());
            let creds = self
                .issuer
                .issue(
                    &self.storage.file_upload_bucket,
                    &key,
                    name.as_deref(),
                    AccessMode::Write,
                )
                .await?;

            xfile.href = Some(format!("{at_id}download/{title}"));
            xfile.upload_key = Some(creds.key.clone());
            records.insert(StorageRecordKey::ExtraFile(format.uuid.clone()), creds);
        }

        Ok(())
    }

    async fn resolve_record(&self, reference: &str) -> Result<Option<ItemRecord>> {
        let record = match self.repo().get(reference).await? {
            Some(record) => Some(record),
            None => self.repo().get_by_unique_key("accession", reference).await?,
        };
        Ok(record.filter(|r| FileClass::from_item_type(&r.item_type).is_some()))
    }

    /// Propagate relation edges to their targets so both sides of each
    /// edge stay consistent without a second client write. Per-edge
    /// failures are reported, not raised: they must not undo or abort the
    /// triggering entity's own persisted write.
    async fn propagate_related_files(
        &self,
        my_uuid: &str,
        edges: &[RelatedFile],
    ) -> Vec<PropagationOutcome> {
        let repo = self.repo();
        let queue = IndexQueueRepository::new(self.pool);
        let mut outcomes = Vec::new();

        for edge in edges {
            let mut push = |result: PropagationResult| {
                outcomes.push(PropagationOutcome {
                    target: edge.file.clone(),
                    relationship_type: edge.relationship_type.clone(),
                    result,
                });
            };

            let Some(inverse) = inverse_relationship(&edge.relationship_type) else {
                error!(
                    "Error updating related_files on {} update: unknown relationship type '{}'",
                    my_uuid, edge.relationship_type
                );
                push(PropagationResult::UnknownRelationship);
                continue;
            };

            let target = match self.resolve_record(&edge.file).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    error!(
                        "Error updating related_files on {} update: '{}' not found",
                        my_uuid, edge.file
                    );
                    push(PropagationResult::TargetNotFound);
                    continue;
                }
                Err(e) => {
                    error!(
                        "Error updating related_files on {} update: {}",
                        my_uuid, e
                    );
                    push(PropagationResult::Failed(e.to_string()));
                    continue;
                }
            };

            let mut target_props: FileProperties =
                match serde_json::from_value(target.properties.clone()) {
                    Ok(props) => props,
                    Err(e) => {
                        error!(
                            "Error updating related_files on {} update: {}",
                            my_uuid, e
                        );
                        push(PropagationResult::Failed(e.to_string()));
                        continue;
                    }
                };

            let already_linked = target_props
                .related_files
                .iter()
                .any(|r| r.file == my_uuid && r.relationship_type == inverse);
            if already_linked {
                push(PropagationResult::AlreadyConsistent);
                continue;
            }

            target_props.related_files.push(RelatedFile {
                relationship_type: inverse.to_string(),
                file: my_uuid.to_string(),
            });

            let target_value = match serde_json::to_value(&target_props) {
                Ok(value) => value,
                Err(e) => {
                    push(PropagationResult::Failed(e.to_string()));
                    continue;
                }
            };

            match repo
                .update(
                    &target.uuid,
                    &target_value,
                    &PropsheetMap::new(),
                    &unique_keys_for(&target_props),
                )
                .await
            {
                Ok(sid) => {
                    // the collaborator changed underneath the index; queue it
                    // once its own write has committed
                    let info = format!("queued from {my_uuid} update");
                    if let Err(e) = queue.enqueue(&target.uuid, sid, Some(&info)).await {
                        warn!("Failed to queue re-index for {}: {}", target.uuid, e);
                    }
                    push(PropagationResult::Propagated { sid });
                }
                Err(e) => {
                    error!(
                        "Error updating related_files on {} update: {}",
                        my_uuid, e
                    );
                    push(PropagationResult::Failed(e.to_string()));
                }
            }
        }

        outcomes
    }

    /// Render the item for API responses. Credential fields are withheld
    /// entirely unless the viewer may edit and the file awaits upload.
    pub async fn render(&self, item: &FileItem, can_edit: bool) -> Result<Value> {
        let format = match item.properties.file_format.as_deref() {
            Some(reference) => self.formats().get(reference).await?,
            None => None,
        };
        let format = format.as_ref();

        let Value::Object(mut body) = serde_json::to_value(&item.properties)? else {
            return Err(DepotError::Serialization(serde::ser::Error::custom(
                "file properties did not serialize to an object",
            )));
        };

        body.insert("uuid".to_string(), Value::String(item.uuid.clone()));
        body.insert("@id".to_string(), Value::String(item.at_id()));
        body.insert(
            "@type".to_string(),
            serde_json::json!([item.class.type_name(), "File", "Item"]),
        );
        body.insert(
            "display_title".to_string(),
            Value::String(item.display_title(format)),
        );
        if let Some(title) = item.properties.accession_or_external() {
            body.insert("title".to_string(), Value::String(title.to_string()));
        }
        body.insert("href".to_string(), Value::String(item.href(format)));
        body.insert(
            "file_type_detailed".to_string(),
            Value::String(item.file_type_detailed(format)),
        );
        body.insert(
            "upload_key".to_string(),
            Value::String(item.upload_key(format)),
        );

        if show_upload_credentials(item.properties.status, can_edit) {
            if let Some(external) = item.external() {
                body.insert(
                    "upload_credentials".to_string(),
                    serde_json::to_value(&external.upload_credentials)?,
                );
            }
            body.insert(
                "extra_files_creds".to_string(),
                self.extra_files_creds(item).await?,
            );
        }

        Ok(Value::Object(body))
    }

    /// Extra-file entries with their upload credentials attached. Null when
    /// no primary record exists; entries whose format or record is missing
    /// are skipped.
    pub async fn extra_files_creds(&self, item: &FileItem) -> Result<Value> {
        if item.external().is_none() {
            return Ok(Value::Null);
        }
        let mut extras = Vec::new();
        for extra in &item.properties.extra_files {
            let Some(format) = self.formats().get(&extra.file_format).await? else {
                warn!(
                    "Can't find required format uuid for {}",
                    extra.file_format
                );
                continue;
            };
            let Some(record) = item
                .storage_records
                .get(&StorageRecordKey::ExtraFile(format.uuid.clone()))
            else {
                warn!("No storage record for extra file format {}", format.uuid);
                continue;
            };
            let mut entry = serde_json::to_value(extra)?;
            if let Some(obj) = entry.as_object_mut() {
                obj.insert(
                    "upload_credentials".to_string(),
                    serde_json::to_value(&record.upload_credentials)?,
                );
            }
            extras.push(entry);
        }
        Ok(Value::Array(extras))
    }
}
