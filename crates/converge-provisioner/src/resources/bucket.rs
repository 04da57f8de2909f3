use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

use converge_core::{FileInfo, FileMap};
use futures::stream::{self, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::apply::{ApplyContext, ApplyOutcome};
use crate::error::ProvisionerError;
use crate::field::{AnyField, Field};
use crate::file_sync::{self, DirSource, FileSource};
use crate::payload::Payload;
use crate::plan::{OperationKind, PlanOperation};
use crate::provider::{BoxFuture, BucketApi};
use crate::resource::{self, FieldRef, Resource, Tier};
use crate::resources::{self as kinds, want};

pub const KIND: &str = "bucket";

const FILES: &str = "files";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Website {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_page_suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_found_page: Option<String>,
}

/// Bucket attributes as the provider sees them. Contents are managed
/// separately through [`BucketApi::objects`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub storage_class: Option<String>,
    #[serde(default)]
    pub versioning: bool,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub website: Option<Website>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BucketConfig {
    location: String,
    #[serde(default)]
    storage_class: Option<String>,
    #[serde(default)]
    versioning: bool,
    #[serde(default)]
    public: bool,
    #[serde(default)]
    website: Option<Website>,
    /// Local directory whose contents the bucket should hold.
    #[serde(default)]
    files_dir: Option<PathBuf>,
}

fn storage_class_or_default(class: &Option<String>) -> Option<String> {
    Some(class.clone().unwrap_or_else(|| "STANDARD".to_string()))
}

pub struct Bucket {
    name: String,
    api: Arc<dyn BucketApi>,
    source: Option<Arc<dyn FileSource>>,
    id: Field<String>,
    location: Field<String>,
    storage_class: Field<Option<String>>,
    versioning: Field<bool>,
    public: Field<bool>,
    website: Field<Option<Website>>,
    files: Field<FileMap>,
}

impl Bucket {
    pub fn new(name: &str, api: Arc<dyn BucketApi>) -> Self {
        Self {
            name: name.to_string(),
            api,
            source: None,
            id: Field::new("name"),
            location: Field::force_new("location"),
            storage_class: Field::new("storage_class").normalized_by(storage_class_or_default),
            versioning: Field::new("versioning"),
            public: Field::new("public"),
            website: Field::new("website"),
            files: Field::new(FILES),
        }
    }

    /// Use `source` for upload bodies instead of the configured directory.
    pub fn with_source(mut self, source: Arc<dyn FileSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the wanted file set directly.
    pub fn want_files(&mut self, files: FileMap) -> Result<(), ProvisionerError> {
        self.files.set_wanted(files)?;
        Ok(())
    }

    pub fn current_files(&self) -> Option<&FileMap> {
        self.files.current_opt()
    }

    async fn list_files(&self) -> Result<FileMap, ProvisionerError> {
        let store = self.api.objects(&self.name)?;
        let objects = match store.list("").await {
            Ok(objects) => objects,
            Err(e) => {
                let e = ProvisionerError::from(e);
                if e.is_not_found() {
                    return Ok(FileMap::new());
                }
                return Err(e);
            }
        };
        // Multipart uploads have no content MD5; an empty hash forces a
        // re-upload on the next sync.
        Ok(objects
            .into_iter()
            .map(|o| (o.key, FileInfo::new(o.md5.unwrap_or_default())))
            .collect())
    }

    /// Bring the bucket contents from `current` to `wanted`.
    ///
    /// On failure the files that did make it are recorded as current along
    /// with the rest of the operation, and the error is returned.
    async fn push_files(
        &mut self,
        op: &PlanOperation,
        current: Option<&FileMap>,
        wanted: &FileMap,
        ctx: &ApplyContext,
    ) -> Result<ApplyOutcome, ProvisionerError> {
        let diff = file_sync::diff(current, Some(wanted));
        let mut synced = current.cloned().unwrap_or_default();
        if diff.is_empty() {
            return Ok(ApplyOutcome::with_outputs(
                Payload::new().with(FILES, serde_json::to_value(&synced)?),
            ));
        }
        let Some(source) = self.source.clone() else {
            return Err(ProvisionerError::InvalidConfig {
                key: self.key().to_string(),
                message: "files are wanted but no files_dir is configured".to_string(),
            });
        };
        let store = self.api.objects(&self.name)?;

        let result = file_sync::sync(
            store.as_ref(),
            source.as_ref(),
            &mut synced,
            &diff,
            ctx.settings().concurrency,
            ctx.cancel(),
            &ctx.reporter,
        )
        .await;

        if let Err(e) = result {
            self.keep_partial(op, synced)?;
            return Err(e);
        }
        Ok(ApplyOutcome {
            outputs: Payload::new().with(FILES, serde_json::to_value(&synced)?),
            content_changed: true,
        })
    }

    fn keep_partial(&mut self, op: &PlanOperation, synced: FileMap) -> Result<(), ProvisionerError> {
        for field in self.fields_mut() {
            if field.name() == FILES {
                continue;
            }
            if let Some(v) = op.payload.get(field.name()) {
                field.load_current(Some(v.clone()))?;
            }
        }
        self.files.set_current(synced);
        Ok(())
    }

    async fn create(
        &mut self,
        op: &PlanOperation,
        ctx: &ApplyContext,
    ) -> Result<ApplyOutcome, ProvisionerError> {
        let api = self.api.clone();
        kinds::submit_with::<BucketSpec, dyn BucketApi>(&*self, api.as_ref(), op, ctx).await?;
        ctx.reporter.advance(1);

        let wanted: FileMap = op.payload.decode(FILES)?.unwrap_or_default();
        self.push_files(op, None, &wanted, ctx).await
    }

    async fn update(
        &mut self,
        op: &PlanOperation,
        ctx: &ApplyContext,
    ) -> Result<ApplyOutcome, ProvisionerError> {
        let attributes_changed = op.payload.keys().any(|k| k != "name" && k != FILES);
        if attributes_changed {
            let api = self.api.clone();
            kinds::submit_with::<BucketSpec, dyn BucketApi>(&*self, api.as_ref(), op, ctx).await?;
            ctx.reporter.advance(1);
        }

        match op.payload.decode::<FileMap>(FILES)? {
            Some(wanted) => {
                let current = self.files.current_opt().cloned();
                self.push_files(op, current.as_ref(), &wanted, ctx).await
            }
            None => Ok(ApplyOutcome::default()),
        }
    }

    async fn delete(
        &mut self,
        op: &PlanOperation,
        ctx: &ApplyContext,
    ) -> Result<ApplyOutcome, ProvisionerError> {
        // Providers refuse to delete non-empty buckets.
        let store = self.api.objects(&self.name)?;
        let keys: Vec<String> = self.list_files().await?.into_keys().collect();
        if !keys.is_empty() {
            tracing::info!(bucket = %self.name, objects = keys.len(), "emptying bucket");
        }
        stream::iter(keys.into_iter().map(Ok::<_, ProvisionerError>))
            .try_for_each_concurrent(ctx.settings().concurrency.max(1), |key| {
                let store = store.clone();
                async move {
                    store.delete(&key).await?;
                    Ok::<_, ProvisionerError>(())
                }
            })
            .await?;
        self.files.set_current(FileMap::new());

        let api = self.api.clone();
        kinds::apply_with::<BucketSpec, dyn BucketApi>(&*self, api.as_ref(), op, ctx).await
    }
}

impl Resource for Bucket {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> Tier {
        Tier::Dependency
    }

    fn fields(&self) -> Vec<FieldRef<'_>> {
        vec![
            FieldRef::identity(&self.id),
            FieldRef::attr(&self.location),
            FieldRef::attr(&self.storage_class),
            FieldRef::attr(&self.versioning),
            FieldRef::attr(&self.public),
            FieldRef::attr(&self.website),
            FieldRef::attr(&self.files),
        ]
    }

    fn fields_mut(&mut self) -> Vec<&mut dyn AnyField> {
        vec![
            &mut self.id,
            &mut self.location,
            &mut self.storage_class,
            &mut self.versioning,
            &mut self.public,
            &mut self.website,
            &mut self.files,
        ]
    }

    fn configure(&mut self, desired: &Value) -> Result<(), ProvisionerError> {
        let config: BucketConfig = resource::parse_config(&self.key(), desired)?;
        self.id.set_wanted(self.name.clone())?;
        self.location.set_wanted(config.location)?;
        self.storage_class.set_wanted(config.storage_class)?;
        self.versioning.set_wanted(config.versioning)?;
        self.public.set_wanted(config.public)?;
        self.website.set_wanted(config.website)?;
        match config.files_dir {
            Some(dir) => {
                let files = file_sync::scan_dir(&dir)?;
                tracing::debug!(bucket = %self.name, files = files.len(), dir = %dir.display(), "scanned content");
                self.files.set_wanted(files)?;
                self.source = Some(Arc::new(DirSource::new(dir)));
            }
            None => want(&mut self.files, None)?,
        }
        Ok(())
    }

    fn read(&mut self) -> BoxFuture<'_, Result<(), ProvisionerError>> {
        Box::pin(async move {
            let api = self.api.clone();
            kinds::read_with::<BucketSpec, dyn BucketApi>(self, api.as_ref()).await?;
            if resource::exists(&*self) {
                let files = self.list_files().await?;
                self.files.set_current(files);
            }
            Ok(())
        })
    }

    fn apply<'a>(
        &'a mut self,
        op: &'a PlanOperation,
        ctx: &'a ApplyContext,
    ) -> BoxFuture<'a, Result<ApplyOutcome, ProvisionerError>> {
        Box::pin(async move {
            match op.kind {
                OperationKind::Create => self.create(op, ctx).await,
                OperationKind::Update => self.update(op, ctx).await,
                OperationKind::Delete => self.delete(op, ctx).await,
            }
        })
    }

    /// One unit per file uploaded on creation.
    fn create_units(&self) -> usize {
        self.files.wanted_opt().map_or(0, |files| files.len())
    }

    /// One unit per file touched, plus one for attribute changes.
    fn update_units(&self, changed: &[&str]) -> usize {
        let attributes = usize::from(changed.iter().any(|f| *f != FILES));
        let files = if changed.contains(&FILES) {
            file_sync::diff(self.files.current_opt(), self.files.wanted_opt()).len()
        } else {
            0
        };
        attributes + files
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
