//! Host, group and mapping orchestration for controller attach/detach

use crate::attach::{get_mapping_properties, group_name, AttachParams, AttachProtocol, MappingProperties, Targets};
use crate::domain::object::StorageObject;
use crate::domain::ports::{InitiatorKind, MappingMember, StorageApiRef};
use crate::error::{Error, Result};
use crate::transaction::Transaction;
use crate::volume::resolve_vstore;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info, warn};

/// `RUNNINGSTATUS` of an online FC initiator
const INITIATOR_ONLINE: &str = "27";

fn is_offline(kind: InitiatorKind, initiator: &StorageObject) -> Result<bool> {
    Ok(kind == InitiatorKind::Fc && initiator.get_string_or_default("RUNNINGSTATUS")? != INITIATOR_ONLINE)
}

/// `Ok(true)` when the initiator is free to bind, `Ok(false)` when it is
/// already bound to `host_id`.
fn check_owner(
    kind: InitiatorKind,
    id: &str,
    initiator: &StorageObject,
    host_id: Option<&str>,
    host_label: &str,
) -> Result<bool> {
    if initiator.get_bool("ISFREE")? {
        return Ok(true);
    }
    let parent = initiator.get_string_or_default("PARENTID")?;
    if host_id == Some(parent.as_str()) {
        return Ok(false);
    }
    Err(Error::Conflict(format!(
        "{} initiator {} is associated with host {}, not {}",
        kind, id, parent, host_label
    )))
}

/// LUN group a LUN belongs to after `create_lun_group`
#[derive(Debug, Clone)]
pub struct LunGroupBinding {
    pub group: StorageObject,
    /// The LUN was added by this call
    pub added: bool,
}

/// Creates and associates hosts, groups, mapping views and initiators
#[derive(Clone)]
pub struct AttachManager {
    api: StorageApiRef,
}

impl AttachManager {
    pub fn new(api: StorageApiRef) -> Self {
        Self { api }
    }

    // =========================================================================
    // Hosts and groups
    // =========================================================================

    /// Look up a host, creating it when `create` is set
    pub async fn get_host(&self, host_name: &str, create: bool) -> Result<Option<StorageObject>> {
        if let Some(host) = self.api.get_host_by_name(host_name).await? {
            return Ok(Some(host));
        }
        if !create {
            return Ok(None);
        }
        let host = self.api.create_host(host_name).await?;
        info!(host = %host_name, id = %host.id(), "Created host");
        Ok(Some(host))
    }

    /// Put the host into its host group
    pub async fn create_host_group(&self, host: &StorageObject) -> Result<StorageObject> {
        let name = group_name(&host.name());
        let groups = self.api.get_hostgroups_of_host(&host.id()).await?;
        if let Some(group) = groups.iter().find(|g| g.name() == name) {
            return Ok(group.clone());
        }
        if let Some(other) = groups.first() {
            return Err(Error::Conflict(format!(
                "host {} already belongs to host group {}",
                host.name(),
                other.name()
            )));
        }

        let group = match self.api.get_hostgroup_by_name(&name).await? {
            Some(group) => group,
            None => self.api.create_hostgroup(&name).await?,
        };
        self.api.add_host_to_hostgroup(&host.id(), &group.id()).await?;
        debug!(host = %host.name(), hostgroup = %name, "Added host to host group");
        Ok(group)
    }

    /// Put the LUN into the host's LUN group
    pub async fn create_lun_group(&self, host_name: &str, lun_id: &str) -> Result<LunGroupBinding> {
        let name = group_name(host_name);
        let groups = self.api.get_lungroups_of_lun(lun_id).await?;
        if let Some(group) = groups.iter().find(|g| g.name() == name) {
            return Ok(LunGroupBinding {
                group: group.clone(),
                added: false,
            });
        }
        if let Some(other) = groups.first() {
            return Err(Error::Conflict(format!(
                "lun {} already belongs to lun group {}",
                lun_id,
                other.name()
            )));
        }

        let group = match self.api.get_lungroup_by_name(&name).await? {
            Some(group) => group,
            None => self.api.create_lungroup(&name).await?,
        };
        self.api.add_lun_to_lungroup(lun_id, &group.id()).await?;
        debug!(lun = %lun_id, lungroup = %name, "Added lun to lun group");
        Ok(LunGroupBinding { group, added: true })
    }

    /// Join the host group and LUN group in the host's mapping view
    pub async fn create_mapping(
        &self,
        host_name: &str,
        hostgroup_id: &str,
        lungroup_id: &str,
    ) -> Result<StorageObject> {
        let name = group_name(host_name);
        let mapping = match self.api.get_mapping_by_name(&name).await? {
            Some(mapping) => mapping,
            None => self.api.create_mapping(&name).await?,
        };
        self.associate_mapping(&mapping, MappingMember::HostGroup, hostgroup_id)
            .await?;
        self.associate_mapping(&mapping, MappingMember::LunGroup, lungroup_id)
            .await?;
        Ok(mapping)
    }

    async fn associate_mapping(&self, mapping: &StorageObject, member: MappingMember, member_id: &str) -> Result<()> {
        let mappings = self.api.get_mappings_of(member, member_id).await?;
        if mappings.iter().any(|m| m.id() == mapping.id()) {
            return Ok(());
        }
        if let Some(other) = mappings.first() {
            return Err(Error::Conflict(format!(
                "{:?} {} already belongs to mapping view {}",
                member,
                member_id,
                other.name()
            )));
        }
        self.api.add_to_mapping(&mapping.id(), member, member_id).await
    }

    // =========================================================================
    // Initiators
    // =========================================================================

    pub async fn attach_iscsi(&self, host_id: &str, iqn: &str, alua: Option<&Value>) -> Result<()> {
        self.bind_initiators(InitiatorKind::Iscsi, host_id, &[iqn.to_string()], alua)
            .await
            .map(|_| ())
    }

    /// Bind the online WWNs to the host and return them
    pub async fn attach_fc(&self, host_id: &str, wwns: &[String], alua: Option<&Value>) -> Result<Vec<String>> {
        self.bind_initiators(InitiatorKind::Fc, host_id, wwns, alua).await
    }

    pub async fn attach_roce(&self, host_id: &str, nqn: &str) -> Result<()> {
        self.bind_initiators(InitiatorKind::Roce, host_id, &[nqn.to_string()], None)
            .await
            .map(|_| ())
    }

    async fn resolve_initiator(&self, kind: InitiatorKind, id: &str) -> Result<StorageObject> {
        match self.api.get_initiator(kind, id).await? {
            Some(initiator) => Ok(initiator),
            None => {
                info!(kind = %kind, initiator = %id, "Registering initiator");
                self.api.add_initiator(kind, id).await
            }
        }
    }

    /// Read-only pass over the node's initiators, run before anything is
    /// created for the node. `host_id` is `None` while the host does not
    /// exist yet, so any bound initiator belongs to someone else.
    pub async fn check_initiator_owners(
        &self,
        kind: InitiatorKind,
        host_id: Option<&str>,
        host_name: &str,
        ids: &[String],
    ) -> Result<()> {
        for id in ids {
            let Some(initiator) = self.api.get_initiator(kind, id).await? else {
                continue;
            };
            if is_offline(kind, &initiator)? {
                continue;
            }
            check_owner(kind, id, &initiator, host_id, host_id.unwrap_or(host_name))?;
        }
        Ok(())
    }

    /// Every initiator is checked before any is bound, so a conflict on
    /// one leaves the others untouched.
    async fn bind_initiators(
        &self,
        kind: InitiatorKind,
        host_id: &str,
        ids: &[String],
        alua: Option<&Value>,
    ) -> Result<Vec<String>> {
        let mut usable = Vec::new();
        let mut to_bind = Vec::new();

        for id in ids {
            let initiator = self.resolve_initiator(kind, id).await?;
            if is_offline(kind, &initiator)? {
                warn!(initiator = %id, "Skipping offline FC initiator");
                continue;
            }
            if check_owner(kind, id, &initiator, Some(host_id), host_id)? {
                to_bind.push(id.clone());
            }
            usable.push(id.clone());
        }

        if usable.is_empty() {
            return Err(Error::NotFound {
                kind: format!("online {} initiator", kind),
                name: ids.join(","),
            });
        }

        for id in &to_bind {
            self.api.add_initiator_to_host(kind, id, host_id).await?;
            if let Some(fields) = alua {
                self.api.update_initiator(kind, id, fields.clone()).await?;
            }
            info!(kind = %kind, initiator = %id, host = %host_id, "Associated initiator with host");
        }
        Ok(usable)
    }

    // =========================================================================
    // Targets
    // =========================================================================

    async fn discover_targets(&self, params: &AttachParams, initiators: &[String]) -> Result<Targets> {
        match params.protocol {
            AttachProtocol::Iscsi => {
                let targets: Vec<_> = self
                    .api
                    .get_iscsi_targets()
                    .await?
                    .into_iter()
                    .filter(|t| params.portals.is_empty() || params.portals.contains(&t.portal))
                    .collect();
                if targets.is_empty() {
                    return Err(Error::NotFound {
                        kind: "iscsi target portal".into(),
                        name: params.portals.join(","),
                    });
                }
                Ok(Targets::Iscsi(targets))
            }
            AttachProtocol::Fc | AttachProtocol::FcNvme => {
                let mut wwns: Vec<String> = Vec::new();
                for initiator in initiators {
                    for wwn in self.api.get_fc_target_wwns(initiator).await? {
                        if !wwns.contains(&wwn) {
                            wwns.push(wwn);
                        }
                    }
                }
                if wwns.is_empty() {
                    return Err(Error::NotFound {
                        kind: "fc target".into(),
                        name: initiators.join(","),
                    });
                }
                Ok(Targets::Fc(wwns))
            }
            AttachProtocol::Roce => {
                if params.portals.is_empty() {
                    return Err(Error::Configuration("roce attach needs target portals".into()));
                }
                Ok(Targets::Roce(params.portals.clone()))
            }
        }
    }

    // =========================================================================
    // Controller attach / detach
    // =========================================================================

    /// Make the LUN visible to the node. The LUN is taken out of the LUN
    /// group again if a later step fails.
    pub async fn controller_attach(&self, lun_name: &str, params: &AttachParams) -> Result<MappingProperties> {
        let mut flow = AttachFlow::new(self.clone(), lun_name, params.clone());
        let mut tx: Transaction<AttachFlow> = Transaction::new(format!("attach {} to {}", lun_name, flow.host_name));
        tx.then("find lun", |f: &mut AttachFlow| f.find_lun().boxed())
            .then("check initiators", |f: &mut AttachFlow| f.check_initiators().boxed())
            .then("get host", |f: &mut AttachFlow| f.get_host().boxed())
            .then("bind initiators", |f: &mut AttachFlow| f.bind_initiators().boxed())
            .then("create host group", |f: &mut AttachFlow| f.create_host_group().boxed())
            .then_with_compensation(
                "create lun group",
                |f: &mut AttachFlow| f.create_lun_group().boxed(),
                |f: &mut AttachFlow| f.revert_lun_group().boxed(),
            )
            .then("create mapping", |f: &mut AttachFlow| f.create_mapping().boxed())
            .then("build mapping properties", |f: &mut AttachFlow| f.build_properties().boxed());

        if let Err(e) = tx.commit(&mut flow).await {
            let report = tx.rollback(&mut flow).await;
            if !report.is_clean() {
                warn!(lun = %lun_name, host = %flow.host_name, "Attach rollback incomplete");
            }
            return Err(e);
        }

        info!(lun = %lun_name, host = %flow.host_name, protocol = %params.protocol, "Attached lun");
        flow.properties
            .ok_or_else(|| Error::Internal(format!("attach of {} produced no mapping properties", lun_name)))
    }

    /// Take the LUN out of the node's LUN group. Returns the LUN's WWN, or
    /// `None` when the LUN no longer exists.
    pub async fn controller_detach(&self, lun_name: &str, params: &AttachParams) -> Result<Option<String>> {
        let vstore_id = resolve_vstore(&self.api, params.vstore_name.as_deref()).await?;
        let Some(lun) = self.api.get_lun_by_name(lun_name, &vstore_id).await? else {
            info!(lun = %lun_name, "Lun does not exist, nothing to detach");
            return Ok(None);
        };
        let wwn = lun.get_string_or_default("WWN")?;

        let host_name = params.host_name();
        if self.get_host(&host_name, false).await?.is_none() {
            info!(lun = %lun_name, host = %host_name, "Host does not exist, nothing to detach");
            return Ok(Some(wwn));
        }

        let name = group_name(&host_name);
        for group in self.api.get_lungroups_of_lun(&lun.id()).await? {
            if group.name() == name {
                self.api.remove_lun_from_lungroup(&lun.id(), &group.id()).await?;
                info!(lun = %lun_name, lungroup = %name, "Detached lun");
            }
        }
        Ok(Some(wwn))
    }
}

// =============================================================================
// Attach workflow state
// =============================================================================

struct AttachFlow {
    manager: AttachManager,
    lun_name: String,
    params: AttachParams,
    host_name: String,

    lun: Option<StorageObject>,
    host: Option<StorageObject>,
    initiators: Vec<String>,
    hostgroup_id: String,
    lungroup_id: String,
    lun_added: bool,
    properties: Option<MappingProperties>,
}

impl AttachFlow {
    fn new(manager: AttachManager, lun_name: &str, params: AttachParams) -> Self {
        let host_name = params.host_name();
        Self {
            manager,
            lun_name: lun_name.to_string(),
            params,
            host_name,
            lun: None,
            host: None,
            initiators: Vec::new(),
            hostgroup_id: String::new(),
            lungroup_id: String::new(),
            lun_added: false,
            properties: None,
        }
    }

    fn lun(&self) -> Result<&StorageObject> {
        self.lun
            .as_ref()
            .ok_or_else(|| Error::Internal("lun not resolved".into()))
    }

    fn host(&self) -> Result<&StorageObject> {
        self.host
            .as_ref()
            .ok_or_else(|| Error::Internal("host not resolved".into()))
    }

    async fn find_lun(&mut self) -> Result<()> {
        let api = &self.manager.api;
        let vstore_id = resolve_vstore(api, self.params.vstore_name.as_deref()).await?;
        let lun = api
            .get_lun_by_name(&self.lun_name, &vstore_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: "lun".into(),
                name: self.lun_name.clone(),
            })?;
        self.lun = Some(lun);
        Ok(())
    }

    async fn check_initiators(&mut self) -> Result<()> {
        self.host = self.manager.get_host(&self.host_name, false).await?;
        let host_id = self.host.as_ref().map(StorageObject::id);
        self.manager
            .check_initiator_owners(
                self.params.protocol.initiator_kind(),
                host_id.as_deref(),
                &self.host_name,
                &self.params.initiators,
            )
            .await
    }

    async fn get_host(&mut self) -> Result<()> {
        if self.host.is_none() {
            self.host = self.manager.get_host(&self.host_name, true).await?;
        }
        if self.host.is_none() {
            return Err(Error::NotFound {
                kind: "host".into(),
                name: self.host_name.clone(),
            });
        }
        Ok(())
    }

    async fn bind_initiators(&mut self) -> Result<()> {
        let host_id = self.host()?.id();
        let alua = self.params.alua_fields();
        self.initiators = self
            .manager
            .bind_initiators(
                self.params.protocol.initiator_kind(),
                &host_id,
                &self.params.initiators,
                alua.as_ref(),
            )
            .await?;
        Ok(())
    }

    async fn create_host_group(&mut self) -> Result<()> {
        let group = self.manager.create_host_group(self.host()?).await?;
        self.hostgroup_id = group.id();
        Ok(())
    }

    async fn create_lun_group(&mut self) -> Result<()> {
        let lun_id = self.lun()?.id();
        let binding = self.manager.create_lun_group(&self.host_name, &lun_id).await?;
        self.lungroup_id = binding.group.id();
        self.lun_added = binding.added;
        Ok(())
    }

    async fn revert_lun_group(&mut self) -> Result<()> {
        if !self.lun_added {
            return Ok(());
        }
        let lun_id = self.lun()?.id();
        self.manager
            .api
            .remove_lun_from_lungroup(&lun_id, &self.lungroup_id)
            .await?;
        self.lun_added = false;
        Ok(())
    }

    async fn create_mapping(&mut self) -> Result<()> {
        self.manager
            .create_mapping(&self.host_name, &self.hostgroup_id, &self.lungroup_id)
            .await?;
        Ok(())
    }

    async fn build_properties(&mut self) -> Result<()> {
        let host_id = self.host()?.id();
        let lun = self.lun()?;
        let lun_id = lun.id();
        let wwn = lun.get_string_or_default("WWN")?;

        let host_lun_id = self.manager.api.get_host_lun_id(&host_id, &lun_id).await?;
        let targets = self
            .manager
            .discover_targets(&self.params, &self.initiators)
            .await?;
        self.properties = Some(get_mapping_properties(
            self.params.protocol,
            &wwn,
            &host_lun_id,
            &targets,
        ));
        Ok(())
    }
}
