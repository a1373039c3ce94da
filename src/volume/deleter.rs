//! Volume deletion
//!
//! Removes what hangs off the base object before the object itself: share,
//! replication and HyperMetro pairs, LUN group memberships, QoS. A volume
//! that no longer exists is deleted already.

use crate::client::qos::qos_members;
use crate::domain::object::StorageObject;
use crate::domain::ports::StorageApiRef;
use crate::error::Result;
use crate::transaction::Transaction;
use crate::volume::{find_volume, resolve_vstore, share_path, Protocol, VolumeRef};
use futures::FutureExt;
use tracing::{debug, info};

/// Delete workflow for one volume
pub struct Deleter {
    api: StorageApiRef,
    volume: VolumeRef,
    vstore_id: String,
    target: Option<StorageObject>,
}

impl Deleter {
    pub fn new(api: StorageApiRef, volume: VolumeRef) -> Self {
        Self {
            api,
            volume,
            vstore_id: String::new(),
            target: None,
        }
    }

    pub async fn delete(mut self) -> Result<()> {
        let mut tx: Transaction<Deleter> = Transaction::new(format!("delete volume {}", self.volume.name));
        tx.then("look up volume", |d: &mut Deleter| d.lookup().boxed());

        match self.volume.protocol {
            Protocol::Nfs => {
                tx.then("delete nfs share", |d: &mut Deleter| d.delete_nfs_share().boxed());
            }
            Protocol::DataTurbo => {
                tx.then("delete dtfs share", |d: &mut Deleter| d.delete_dtfs_share().boxed());
            }
            Protocol::Block => {
                tx.then("remove from lun groups", |d: &mut Deleter| d.remove_from_lungroups().boxed());
            }
        }
        if self.volume.protocol.is_filesystem() {
            tx.then("delete pairs", |d: &mut Deleter| d.delete_pairs().boxed());
        }
        tx.then("detach qos", |d: &mut Deleter| d.detach_qos().boxed())
            .then("delete volume", |d: &mut Deleter| d.delete_base().boxed());

        tx.commit(&mut self).await?;
        Ok(())
    }

    fn target_id(&self) -> Option<String> {
        self.target.as_ref().map(StorageObject::id)
    }

    async fn lookup(&mut self) -> Result<()> {
        self.vstore_id = resolve_vstore(&self.api, self.volume.vstore_name.as_deref()).await?;
        self.target = find_volume(&self.api, self.volume.protocol, &self.volume.name, &self.vstore_id).await?;
        if self.target.is_none() {
            info!(volume = %self.volume.name, "Volume does not exist, nothing to delete");
        }
        Ok(())
    }

    async fn delete_nfs_share(&mut self) -> Result<()> {
        if self.target.is_none() {
            return Ok(());
        }
        let path = share_path(&self.volume.name);
        if let Some(share) = self.api.get_nfs_share_by_path(&path, &self.vstore_id).await? {
            self.api.delete_nfs_share(&share.id(), &self.vstore_id).await?;
        }
        Ok(())
    }

    async fn delete_dtfs_share(&mut self) -> Result<()> {
        if self.target.is_none() {
            return Ok(());
        }
        if let Some(share) = self
            .api
            .get_dtfs_share_by_name(&self.volume.name, &self.vstore_id)
            .await?
        {
            self.api.delete_dtfs_share(&share.id(), &self.vstore_id).await?;
        }
        Ok(())
    }

    async fn remove_from_lungroups(&mut self) -> Result<()> {
        let Some(lun_id) = self.target_id() else {
            return Ok(());
        };
        for group in self.api.get_lungroups_of_lun(&lun_id).await? {
            self.api.remove_lun_from_lungroup(&lun_id, &group.id()).await?;
        }
        Ok(())
    }

    async fn delete_pairs(&mut self) -> Result<()> {
        let Some(fs_id) = self.target_id() else {
            return Ok(());
        };
        for pair in self.api.get_hypermetro_pairs_of(&fs_id).await? {
            debug!(volume = %self.volume.name, pair = %pair.id(), "Deleting hypermetro pair");
            self.api.split_hypermetro_pair(&pair.id()).await?;
            self.api.delete_hypermetro_pair(&pair.id()).await?;
        }
        for pair in self.api.get_replication_pairs_of(&fs_id).await? {
            debug!(volume = %self.volume.name, pair = %pair.id(), "Deleting replication pair");
            self.api.split_replication_pair(&pair.id()).await?;
            self.api.delete_replication_pair(&pair.id()).await?;
        }
        Ok(())
    }

    /// Delete the policy when this volume is its only member, otherwise
    /// only take the volume out of it
    async fn detach_qos(&mut self) -> Result<()> {
        let Some(target) = self.target.as_ref() else {
            return Ok(());
        };
        let qos_id = target.get_string_or_default("IOCLASSID")?;
        if qos_id.is_empty() {
            return Ok(());
        }
        let Some(policy) = self.api.get_qos_by_id(&qos_id, &self.vstore_id).await? else {
            return Ok(());
        };

        let object_type = self.volume.protocol.qos_object_type();
        let object_id = target.id();
        let others = qos_members(&policy, object_type)?
            .into_iter()
            .filter(|member| *member != object_id)
            .count();

        if others == 0 {
            self.api.deactivate_qos(&qos_id, &self.vstore_id).await?;
            self.api.delete_qos(&qos_id, &self.vstore_id).await
        } else {
            self.api
                .remove_qos_object(&qos_id, object_type, &object_id, &self.vstore_id)
                .await
        }
    }

    async fn delete_base(&mut self) -> Result<()> {
        let Some(id) = self.target_id() else {
            return Ok(());
        };
        if self.volume.protocol.is_filesystem() {
            self.api.delete_filesystem(&id, &self.vstore_id).await?;
        } else {
            self.api.delete_lun(&id).await?;
        }
        info!(volume = %self.volume.name, id = %id, "Deleted volume");
        Ok(())
    }
}
