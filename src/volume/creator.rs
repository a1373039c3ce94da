//! Volume creation
//!
//! Plan: validate, resolve ids, create or reuse the filesystem/LUN (or clone
//! it), then the protocol share and its grants, then QoS. Every step that
//! creates an object registers a compensating delete that only acts when
//! this operation created the object; reused objects are never deleted,
//! including ones a concurrent request created between our lookup and our
//! create call.

use crate::domain::object::StorageObject;
use crate::domain::ports::{
    CloneFilesystemParams, Created, DtfsShareParams, FilesystemParams, LunParams, NfsShareAccessParams,
    NfsShareParams, QosCreateParams, StorageApiRef,
};
use crate::error::{Error, Result};
use crate::qos::{validate_qos_parameters, QosParameters};
use crate::transaction::Transaction;
use crate::volume::{
    find_volume, resolve_vstore, share_path, CreateVolumeModel, Protocol, VolumeHandle,
    WorkflowSettings,
};
use futures::FutureExt;
use serde_json::json;
use tracing::{debug, info, warn};

/// Longest QoS policy name the array accepts
const MAX_NAME_LEN: usize = 31;

#[derive(Debug, Default)]
struct CreateState {
    vstore_id: String,
    pool_id: String,
    workload_type_id: Option<String>,
    qos: Option<QosParameters>,

    volume: Option<StorageObject>,
    volume_created: bool,
    /// A clone made by this run still needs resizing, splitting and a refresh
    clone_unfinished: bool,

    share_id: String,
    share_created: bool,

    qos_id: String,
    qos_created: bool,
}

/// Create workflow for one volume
pub struct Creator {
    api: StorageApiRef,
    settings: WorkflowSettings,
    model: CreateVolumeModel,
    state: CreateState,
}

impl Creator {
    pub fn new(api: StorageApiRef, settings: WorkflowSettings, model: CreateVolumeModel) -> Self {
        Self {
            api,
            settings,
            model,
            state: CreateState::default(),
        }
    }

    /// Run the workflow. On failure the completed steps are compensated and
    /// the original error is returned.
    pub async fn create(mut self) -> Result<VolumeHandle> {
        let mut tx: Transaction<Creator> = Transaction::new(format!("create volume {}", self.model.name));
        tx.then("validate parameters", |c: &mut Creator| c.validate().boxed())
            .then("resolve ids", |c: &mut Creator| c.resolve_ids().boxed());

        match self.model.protocol {
            Protocol::Nfs | Protocol::DataTurbo => {
                tx.then_with_compensation(
                    "create filesystem",
                    |c: &mut Creator| c.create_filesystem().boxed(),
                    |c: &mut Creator| c.revert_filesystem().boxed(),
                );
                if self.model.clone_from.is_some() {
                    tx.then("finish clone", |c: &mut Creator| c.finish_clone().boxed());
                }
            }
            Protocol::Block => {
                tx.then_with_compensation(
                    "create lun",
                    |c: &mut Creator| c.create_lun().boxed(),
                    |c: &mut Creator| c.revert_lun().boxed(),
                );
            }
        }

        match self.model.protocol {
            Protocol::Nfs => {
                tx.then_with_compensation(
                    "create nfs share",
                    |c: &mut Creator| c.create_nfs_share().boxed(),
                    |c: &mut Creator| c.revert_nfs_share().boxed(),
                )
                .then("allow nfs share access", |c: &mut Creator| c.allow_nfs_access().boxed());
            }
            Protocol::DataTurbo => {
                tx.then_with_compensation(
                    "create dtfs share",
                    |c: &mut Creator| c.create_dtfs_share().boxed(),
                    |c: &mut Creator| c.revert_dtfs_share().boxed(),
                )
                .then("add dtfs share users", |c: &mut Creator| c.add_dtfs_users().boxed());
            }
            Protocol::Block => {}
        }

        tx.then_with_compensation(
            "create qos",
            |c: &mut Creator| c.create_qos().boxed(),
            |c: &mut Creator| c.revert_qos().boxed(),
        );

        if let Err(e) = tx.commit(&mut self).await {
            let report = tx.rollback(&mut self).await;
            if !report.is_clean() {
                warn!(
                    volume = %self.model.name,
                    leaked = report.failures.len(),
                    "Create rollback left objects behind"
                );
            }
            return Err(e);
        }

        info!(volume = %self.model.name, protocol = %self.model.protocol, "Created volume");
        self.handle()
    }

    fn handle(&self) -> Result<VolumeHandle> {
        let volume = self.state.volume.as_ref().ok_or_else(|| {
            Error::Internal(format!("volume {} has no base object", self.model.name))
        })?;
        let mut handle = VolumeHandle::from_object(self.model.protocol, volume)?;
        if !self.state.qos_id.is_empty() {
            handle.qos_id = Some(self.state.qos_id.clone());
        }
        Ok(handle)
    }

    fn volume_id(&self) -> String {
        self.state.volume.as_ref().map(StorageObject::id).unwrap_or_default()
    }

    // =========================================================================
    // Forward steps
    // =========================================================================

    async fn validate(&mut self) -> Result<()> {
        let model = &self.model;
        if model.name.is_empty() {
            return Err(Error::Validation("volume name must not be empty".into()));
        }
        if model.clone_from.is_none() && model.pool_name.is_empty() {
            return Err(Error::Validation("storage pool must be set".into()));
        }
        if model.capacity <= 0 {
            return Err(Error::Validation(format!(
                "capacity {} must be positive",
                model.capacity
            )));
        }
        if model.clone_from.is_some() && !model.protocol.is_filesystem() {
            return Err(Error::Validation("only filesystems can be cloned".into()));
        }
        if model.protocol == Protocol::Nfs && model.auth_clients.is_empty() {
            return Err(Error::Validation("authClient must be set for NFS volumes".into()));
        }
        if model.protocol == Protocol::DataTurbo && model.auth_users.is_empty() {
            return Err(Error::Validation("authUser must be set for DataTurbo volumes".into()));
        }
        if !(1..=4).contains(&model.split_speed) {
            return Err(Error::Validation(format!(
                "split speed {} must be between 1 and 4",
                model.split_speed
            )));
        }

        if let Some(qos) = model.qos.as_deref() {
            self.state.qos = Some(validate_qos_parameters(self.settings.product, qos)?);
        }
        Ok(())
    }

    async fn resolve_ids(&mut self) -> Result<()> {
        self.state.vstore_id = resolve_vstore(&self.api, self.model.vstore_name.as_deref()).await?;

        if !self.model.pool_name.is_empty() {
            let pool = self
                .api
                .get_pool_by_name(&self.model.pool_name)
                .await?
                .ok_or_else(|| Error::NotFound {
                    kind: "storage pool".into(),
                    name: self.model.pool_name.clone(),
                })?;
            self.state.pool_id = pool.id();
        }

        if let Some(workload) = self.model.workload_type.as_deref() {
            let app_type = self
                .api
                .get_application_type_by_name(workload)
                .await?
                .ok_or_else(|| Error::NotFound {
                    kind: "workload type".into(),
                    name: workload.into(),
                })?;
            self.state.workload_type_id = Some(app_type.id());
        }
        debug!(
            volume = %self.model.name,
            pool = %self.state.pool_id,
            vstore = %self.state.vstore_id,
            "Resolved ids"
        );
        Ok(())
    }

    async fn create_filesystem(&mut self) -> Result<()> {
        let existing = find_volume(&self.api, self.model.protocol, &self.model.name, &self.state.vstore_id).await?;
        if let Some(fs) = existing {
            info!(volume = %self.model.name, id = %fs.id(), "Filesystem exists, reusing it");
            self.state.volume = Some(fs);
            return Ok(());
        }

        if let Some(parent) = self.model.clone_from.clone() {
            return self.clone_filesystem(&parent).await;
        }

        let created = self
            .api
            .create_filesystem(&FilesystemParams {
                name: self.model.name.clone(),
                parent_id: self.state.pool_id.clone(),
                capacity: self.model.capacity,
                vstore_id: self.state.vstore_id.clone(),
                description: self.model.description.clone(),
                alloc_type: self.model.alloc_type,
                workload_type_id: self.state.workload_type_id.clone(),
            })
            .await?;
        self.adopt_volume(created);
        Ok(())
    }

    /// Keep the base object; only one this call created is compensated
    fn adopt_volume(&mut self, created: Created) {
        self.state.volume_created = created.is_new();
        if !created.is_new() {
            info!(volume = %self.model.name, "Volume appeared concurrently, reusing it");
        }
        self.state.volume = Some(created.into_object());
    }

    async fn clone_filesystem(&mut self, parent_name: &str) -> Result<()> {
        let parent = self
            .api
            .get_filesystem_by_name(parent_name, &self.state.vstore_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: "clone source filesystem".into(),
                name: parent_name.into(),
            })?;

        let created = self
            .api
            .clone_filesystem(&CloneFilesystemParams {
                name: self.model.name.clone(),
                parent_filesystem_id: parent.id(),
                vstore_id: self.state.vstore_id.clone(),
                description: self.model.description.clone(),
                alloc_type: self.model.alloc_type,
            })
            .await?;
        self.state.clone_unfinished = created.is_new();
        self.adopt_volume(created);
        info!(volume = %self.model.name, parent = %parent_name, "Cloned filesystem");
        Ok(())
    }

    /// Resize and split a fresh clone. Runs as its own step so a failure
    /// here compensates the clone.
    async fn finish_clone(&mut self) -> Result<()> {
        if !self.state.clone_unfinished {
            return Ok(());
        }
        let clone_id = self.volume_id();
        let capacity = match self.state.volume.as_ref() {
            Some(clone) => clone.get_i64("CAPACITY")?,
            None => return Err(Error::Internal("clone not resolved".into())),
        };

        if self.model.capacity > capacity {
            self.api
                .update_filesystem(&clone_id, json!({ "CAPACITY": self.model.capacity }))
                .await?;
        }

        if self.model.split_clone {
            self.api
                .split_clone_filesystem(&clone_id, self.model.split_speed, &self.state.vstore_id)
                .await?;
            self.wait_split_done(&clone_id).await?;
        }

        // The clone handle stays in place for compensation if the refresh misses
        let fs = self
            .api
            .get_filesystem_by_id(&clone_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: "filesystem".into(),
                name: self.model.name.clone(),
            })?;
        self.state.volume = Some(fs);
        self.state.clone_unfinished = false;
        Ok(())
    }

    async fn wait_split_done(&self, id: &str) -> Result<()> {
        let poll = async {
            loop {
                let fs = self.api.get_filesystem_by_id(id).await?.ok_or_else(|| Error::NotFound {
                    kind: "filesystem".into(),
                    name: self.model.name.clone(),
                })?;
                if !fs.get_bool("ISCLONEFS")? {
                    return Ok::<(), Error>(());
                }
                debug!(volume = %self.model.name, "Clone split still running");
                tokio::time::sleep(self.settings.clone_poll_interval).await;
            }
        };

        match tokio::time::timeout(self.settings.clone_split_timeout, poll).await {
            Ok(result) => result,
            Err(_) => {
                if let Err(e) = self.api.stop_split_clone_filesystem(id, &self.state.vstore_id).await {
                    warn!(volume = %self.model.name, error = %e, "Stop clone split failed");
                }
                Err(Error::Timeout {
                    operation: format!("split clone filesystem {}", self.model.name),
                    duration: self.settings.clone_split_timeout,
                })
            }
        }
    }

    async fn create_lun(&mut self) -> Result<()> {
        let existing = find_volume(&self.api, self.model.protocol, &self.model.name, &self.state.vstore_id).await?;
        if let Some(lun) = existing {
            info!(volume = %self.model.name, id = %lun.id(), "Lun exists, reusing it");
            self.state.volume = Some(lun);
            return Ok(());
        }

        let created = self
            .api
            .create_lun(&LunParams {
                name: self.model.name.clone(),
                parent_id: self.state.pool_id.clone(),
                capacity: self.model.capacity,
                alloc_type: self.model.alloc_type,
                description: self.model.description.clone(),
                workload_type_id: self.state.workload_type_id.clone(),
                vstore_id: self.state.vstore_id.clone(),
            })
            .await?;
        self.adopt_volume(created);
        Ok(())
    }

    async fn create_nfs_share(&mut self) -> Result<()> {
        let path = share_path(&self.model.name);
        if let Some(share) = self.api.get_nfs_share_by_path(&path, &self.state.vstore_id).await? {
            self.state.share_id = share.id();
            return Ok(());
        }

        let created = self
            .api
            .create_nfs_share(&NfsShareParams {
                share_path: path,
                fs_id: self.volume_id(),
                description: self.model.description.clone(),
                vstore_id: self.state.vstore_id.clone(),
            })
            .await?;
        self.state.share_created = created.is_new();
        self.state.share_id = created.into_object().id();
        Ok(())
    }

    async fn allow_nfs_access(&mut self) -> Result<()> {
        for client in &self.model.auth_clients {
            if !self.state.share_created {
                let existing = self
                    .api
                    .get_nfs_share_access(&self.state.share_id, client, &self.state.vstore_id)
                    .await?;
                if existing.is_some() {
                    continue;
                }
            }
            self.api
                .allow_nfs_share_access(&NfsShareAccessParams {
                    share_id: self.state.share_id.clone(),
                    name: client.clone(),
                    access_val: self.model.access_val,
                    all_squash: self.model.all_squash,
                    root_squash: self.model.root_squash,
                    vstore_id: self.state.vstore_id.clone(),
                })
                .await?;
        }
        Ok(())
    }

    async fn create_dtfs_share(&mut self) -> Result<()> {
        if let Some(share) = self
            .api
            .get_dtfs_share_by_name(&self.model.name, &self.state.vstore_id)
            .await?
        {
            self.state.share_id = share.id();
            return Ok(());
        }

        let created = self
            .api
            .create_dtfs_share(&DtfsShareParams {
                name: self.model.name.clone(),
                fs_id: self.volume_id(),
                description: self.model.description.clone(),
                vstore_id: self.state.vstore_id.clone(),
            })
            .await?;
        self.state.share_created = created.is_new();
        self.state.share_id = created.into_object().id();
        Ok(())
    }

    async fn add_dtfs_users(&mut self) -> Result<()> {
        for user in &self.model.auth_users {
            self.api
                .add_dtfs_share_auth_user(&self.state.share_id, user, &self.state.vstore_id)
                .await?;
        }
        Ok(())
    }

    async fn create_qos(&mut self) -> Result<()> {
        let Some(params) = self.state.qos.clone() else {
            return Ok(());
        };

        let existing_id = match self.state.volume.as_ref() {
            Some(volume) => volume.get_string_or_default("IOCLASSID")?,
            None => String::new(),
        };
        if !existing_id.is_empty() {
            if self.api.get_qos_by_id(&existing_id, &self.state.vstore_id).await?.is_some() {
                info!(volume = %self.model.name, qos = %existing_id, "Qos already applied");
                self.state.qos_id = existing_id;
                return Ok(());
            }
            warn!(
                volume = %self.model.name,
                qos = %existing_id,
                "Volume references a qos policy that no longer exists, creating a new one"
            );
        }

        let created = self
            .api
            .create_qos(&QosCreateParams {
                name: qos_name(&self.model.name),
                object_type: self.model.protocol.qos_object_type(),
                object_id: self.volume_id(),
                params,
                vstore_id: self.state.vstore_id.clone(),
            })
            .await?;
        self.state.qos_created = created.is_new();
        self.state.qos_id = created.into_object().id();
        Ok(())
    }

    // =========================================================================
    // Compensations
    // =========================================================================

    async fn revert_filesystem(&mut self) -> Result<()> {
        if !self.state.volume_created {
            return Ok(());
        }
        self.api
            .delete_filesystem(&self.volume_id(), &self.state.vstore_id)
            .await
    }

    async fn revert_lun(&mut self) -> Result<()> {
        if !self.state.volume_created {
            return Ok(());
        }
        self.api.delete_lun(&self.volume_id()).await
    }

    async fn revert_nfs_share(&mut self) -> Result<()> {
        if !self.state.share_created {
            return Ok(());
        }
        self.api
            .delete_nfs_share(&self.state.share_id, &self.state.vstore_id)
            .await
    }

    async fn revert_dtfs_share(&mut self) -> Result<()> {
        if !self.state.share_created {
            return Ok(());
        }
        self.api
            .delete_dtfs_share(&self.state.share_id, &self.state.vstore_id)
            .await
    }

    async fn revert_qos(&mut self) -> Result<()> {
        if !self.state.qos_created {
            return Ok(());
        }
        // Delete is attempted even when deactivation fails
        if let Err(e) = self
            .api
            .deactivate_qos(&self.state.qos_id, &self.state.vstore_id)
            .await
        {
            warn!(qos = %self.state.qos_id, error = %e, "Deactivate qos failed, deleting anyway");
        }
        self.api.delete_qos(&self.state.qos_id, &self.state.vstore_id).await
    }
}

/// Policy name for a volume, cut to the array's name limit
pub fn qos_name(volume: &str) -> String {
    let name = format!("k8s_{}", volume);
    name.chars().take(MAX_NAME_LEN).collect()
}
