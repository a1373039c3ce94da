//! Test doubles: a scripted HTTP transport and an in-memory array

use crate::client::codes;
use crate::client::pool::BackendConnectionPool;
use crate::client::qos::qos_members;
use crate::client::rest::{RestClient, RestClientConfig, RetryPolicy};
use crate::client::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::domain::object::StorageObject;
use crate::domain::ports::*;
use crate::error::{Error, Result};
use crate::qos::ProductFamily;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Scripted HTTP transport
// =============================================================================

type Handler = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync>;

/// Build a `{error:{code,description}, data}` response
pub fn envelope(code: i64, data: Value) -> HttpResponse {
    let body = json!({
        "error": { "code": code, "description": format!("code {}", code) },
        "data": data,
    });
    HttpResponse {
        status: 200,
        body: body.to_string().into_bytes(),
    }
}

fn login_response() -> HttpResponse {
    envelope(0, json!({ "deviceid": "dev1", "iBaseToken": "token" }))
}

/// Transport that records requests and answers from a closure
pub struct MockTransport {
    handler: Handler,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    /// Logins succeed; every other request is answered by `handler`
    pub fn scripted<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        Self::new(move |req| {
            if req.url.ends_with("/sessions") {
                Ok(login_response())
            } else {
                Ok(handler(req))
            }
        })
    }

    /// Logins succeed; other requests get `responses` in order, the last one repeating
    pub fn scripted_sequence(responses: Vec<HttpResponse>) -> Arc<Self> {
        let next = AtomicUsize::new(0);
        Self::scripted(move |_| {
            let i = next.fetch_add(1, Ordering::SeqCst);
            responses[i.min(responses.len() - 1)].clone()
        })
    }

    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock() = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.url.clone()).collect()
    }

    pub fn count(&self, predicate: impl Fn(&HttpRequest) -> bool) -> usize {
        self.requests.lock().iter().filter(|r| predicate(r)).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = (self.handler)(&request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

/// Client wired to a mock transport with a fast retry policy
pub fn rest_client(transport: Arc<MockTransport>) -> RestClient {
    let pool = BackendConnectionPool::new(100);
    pool.register("array", Some(8));
    RestClient::new(
        RestClientConfig {
            backend: "array".into(),
            urls: vec!["https://10.0.0.1:8088".into()],
            user: "admin".into(),
            password: "secret".into(),
            vstore_name: None,
            product: ProductFamily::DoradoV6,
            retry: RetryPolicy {
                interval: Duration::from_millis(1),
                times: 10,
            },
        },
        transport,
        pool,
    )
}

// =============================================================================
// In-memory array
// =============================================================================

#[derive(Default)]
struct ArrayState {
    next_id: u64,
    /// kind -> id -> object
    objects: HashMap<&'static str, BTreeMap<String, StorageObject>>,
    /// (relation, group id, member id)
    links: HashSet<(&'static str, String, String)>,
    iscsi_targets: Vec<IscsiTarget>,
    fc_links: HashMap<String, Vec<String>>,
}

impl ArrayState {
    fn kind(&mut self, kind: &'static str) -> &mut BTreeMap<String, StorageObject> {
        self.objects.entry(kind).or_default()
    }

    fn find(&self, kind: &str, field: &str, value: &str) -> Option<StorageObject> {
        self.objects.get(kind).and_then(|objs| {
            objs.values()
                .find(|o| o.get_string_or_default(field).ok().as_deref() == Some(value))
                .cloned()
        })
    }

    fn get(&self, kind: &str, id: &str) -> Option<StorageObject> {
        self.objects.get(kind).and_then(|objs| objs.get(id)).cloned()
    }

    fn insert(&mut self, kind: &'static str, mut obj: StorageObject) -> StorageObject {
        if obj.id().is_empty() {
            self.next_id += 1;
            obj.set("ID", self.next_id.to_string());
        }
        self.kind(kind).insert(obj.id(), obj.clone());
        obj
    }

    fn pool_name(&self, id: &str) -> String {
        self.get("pool", id).map(|p| p.name()).unwrap_or_default()
    }

    fn members(&self, relation: &str, group_id: &str) -> Vec<String> {
        self.links
            .iter()
            .filter(|(r, g, _)| *r == relation && g == group_id)
            .map(|(_, _, m)| m.clone())
            .collect()
    }

    fn groups_of(&self, relation: &str, kind: &str, member_id: &str) -> Vec<StorageObject> {
        self.links
            .iter()
            .filter(|(r, _, m)| *r == relation && m == member_id)
            .filter_map(|(_, g, _)| self.get(kind, g))
            .collect()
    }
}

fn initiator_kind(kind: InitiatorKind) -> &'static str {
    match kind {
        InitiatorKind::Iscsi => "iscsi_initiator",
        InitiatorKind::Fc => "fc_initiator",
        InitiatorKind::Roce => "roce_initiator",
    }
}

fn mapping_relation(member: MappingMember) -> &'static str {
    match member {
        MappingMember::HostGroup => "mapping_hostgroup",
        MappingMember::LunGroup => "mapping_lungroup",
    }
}

/// In-memory array implementing every port trait.
///
/// Every call is recorded by name (`CreateFileSystem`, `DeleteNfsShare`,
/// ...); `fail_on` makes the named call return a backend error.
#[derive(Default)]
pub struct FakeArray {
    state: Mutex<ArrayState>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, i64>>,
    /// State changes applied the moment a named call is made
    pending: Mutex<HashMap<String, Vec<PendingChange>>>,
    /// (kind, id) of every delete, in order
    deleted: Mutex<Vec<(String, String)>>,
}

type PendingChange = Box<dyn FnOnce(&mut ArrayState) + Send>;

impl FakeArray {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// Calls other than lookups
    pub fn mutations(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| !c.starts_with("Get"))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn fail_on(&self, call: &str, code: i64) {
        self.failures.lock().insert(call.to_string(), code);
    }

    /// Insert an object of `kind` just before `call` runs, as if a concurrent
    /// request had created it first
    pub fn seed_on<I, K>(&self, call: &str, kind: &'static str, fields: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let obj = StorageObject::from_pairs(fields);
        self.on_call(call, Box::new(move |state: &mut ArrayState| {
            state.insert(kind, obj);
        }));
    }

    /// Drop the named object just before `call` runs, as if another request
    /// had deleted it
    pub fn forget_on(&self, call: &str, kind: &'static str, name: &str) {
        let name = name.to_string();
        self.on_call(call, Box::new(move |state: &mut ArrayState| {
            if let Some(obj) = state.find(kind, "NAME", &name) {
                state.kind(kind).remove(&obj.id());
            }
        }));
    }

    fn on_call(&self, call: &str, change: PendingChange) {
        self.pending.lock().entry(call.to_string()).or_default().push(change);
    }

    /// IDs passed to deletes of `kind`
    pub fn deleted(&self, kind: &str) -> Vec<String> {
        self.deleted
            .lock()
            .iter()
            .filter(|(k, _)| k == kind)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn add_pool(&self, name: &str) -> StorageObject {
        self.seed("pool", [("NAME", json!(name)), ("USERFREECAPACITY", json!("1073741824"))])
    }

    pub fn add_vstore(&self, name: &str) -> StorageObject {
        self.seed("vstore", [("NAME", json!(name))])
    }

    pub fn add_workload_type(&self, name: &str) -> StorageObject {
        self.seed("workload", [("NAME", json!(name))])
    }

    pub fn add_iscsi_target(&self, portal: &str, iqn: &str) {
        self.state.lock().iscsi_targets.push(IscsiTarget {
            portal: portal.into(),
            iqn: iqn.into(),
        });
    }

    pub fn add_fc_link(&self, initiator: &str, target_wwn: &str) {
        self.state
            .lock()
            .fc_links
            .entry(initiator.to_string())
            .or_default()
            .push(target_wwn.to_string());
    }

    /// Insert an object of `kind` directly, bypassing call recording
    pub fn seed<I, K>(&self, kind: &'static str, fields: I) -> StorageObject
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.state.lock().insert(kind, StorageObject::from_pairs(fields))
    }

    pub fn object(&self, kind: &str, id: &str) -> Option<StorageObject> {
        self.state.lock().get(kind, id)
    }

    pub fn object_by_name(&self, kind: &str, name: &str) -> Option<StorageObject> {
        self.state.lock().find(kind, "NAME", name)
    }

    pub fn objects(&self, kind: &str) -> Vec<StorageObject> {
        self.state
            .lock()
            .objects
            .get(kind)
            .map(|objs| objs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_field(&self, kind: &'static str, id: &str, field: &str, value: Value) {
        if let Some(obj) = self.state.lock().kind(kind).get_mut(id) {
            obj.set(field, value);
        }
    }

    pub fn link(&self, relation: &'static str, group_id: &str, member_id: &str) {
        self.state
            .lock()
            .links
            .insert((relation, group_id.to_string(), member_id.to_string()));
    }

    pub fn is_linked(&self, relation: &str, group_id: &str, member_id: &str) -> bool {
        self.state
            .lock()
            .links
            .iter()
            .any(|(r, g, m)| *r == relation && g == group_id && m == member_id)
    }

    fn record(&self, call: &str) -> Result<()> {
        self.calls.lock().push(call.to_string());
        let changes = self.pending.lock().remove(call);
        if let Some(changes) = changes {
            let mut state = self.state.lock();
            for change in changes {
                change(&mut state);
            }
        }
        match self.failures.lock().get(call) {
            Some(code) => Err(Error::backend(call, *code, "injected failure")),
            None => Ok(()),
        }
    }

    fn create_named(&self, call: &str, kind: &'static str, name: &str, extra: Value) -> Result<Created> {
        self.record(call)?;
        let mut state = self.state.lock();
        if let Some(existing) = state.find(kind, "NAME", name) {
            return Ok(Created::Existing(existing));
        }
        let mut obj = StorageObject::from_pairs([("NAME", json!(name))]);
        if let Value::Object(fields) = extra {
            for (k, v) in fields {
                obj.set(k, v);
            }
        }
        Ok(Created::New(state.insert(kind, obj)))
    }

    fn remove(&self, call: &str, kind: &'static str, id: &str) -> Result<()> {
        self.record(call)?;
        self.deleted.lock().push((kind.to_string(), id.to_string()));
        self.state.lock().kind(kind).remove(id);
        Ok(())
    }
}

#[async_trait]
impl FilesystemApi for FakeArray {
    async fn get_filesystem_by_name(&self, name: &str, _vstore_id: &str) -> Result<Option<StorageObject>> {
        self.record("GetFileSystem")?;
        Ok(self.state.lock().find("filesystem", "NAME", name))
    }

    async fn get_filesystem_by_id(&self, id: &str) -> Result<Option<StorageObject>> {
        self.record("GetFileSystemById")?;
        Ok(self.state.lock().get("filesystem", id))
    }

    async fn create_filesystem(&self, params: &FilesystemParams) -> Result<Created> {
        let pool_name = self.state.lock().pool_name(&params.parent_id);
        self.create_named(
            "CreateFileSystem",
            "filesystem",
            &params.name,
            json!({
                "CAPACITY": params.capacity.to_string(),
                "PARENTID": params.parent_id,
                "PARENTNAME": pool_name,
                "workloadTypeId": params.workload_type_id.clone().unwrap_or_default(),
            }),
        )
    }

    async fn update_filesystem(&self, id: &str, fields: Value) -> Result<()> {
        self.record("UpdateFileSystem")?;
        let mut state = self.state.lock();
        match state.kind("filesystem").get_mut(id) {
            Some(fs) => {
                if let Value::Object(fields) = fields {
                    for (k, v) in fields {
                        fs.set(k, v);
                    }
                }
                Ok(())
            }
            None => Err(Error::backend("UpdateFileSystem", codes::FILESYSTEM_NOT_EXIST, "not exist")),
        }
    }

    async fn delete_filesystem(&self, id: &str, _vstore_id: &str) -> Result<()> {
        self.remove("DeleteFileSystem", "filesystem", id)
    }

    async fn clone_filesystem(&self, params: &CloneFilesystemParams) -> Result<Created> {
        self.record("CloneFileSystem")?;
        let mut state = self.state.lock();
        if let Some(existing) = state.find("filesystem", "NAME", &params.name) {
            return Ok(Created::Existing(existing));
        }
        let parent = state
            .get("filesystem", &params.parent_filesystem_id)
            .ok_or_else(|| Error::backend("CloneFileSystem", codes::FILESYSTEM_NOT_EXIST, "parent missing"))?;
        let capacity = parent.get_string_or_default("CAPACITY")?;
        let clone = StorageObject::from_pairs([
            ("NAME", json!(params.name)),
            ("CAPACITY", json!(capacity)),
            ("PARENTFILESYSTEMID", json!(params.parent_filesystem_id)),
            ("ISCLONEFS", json!("true")),
            ("SPLITSTATUS", json!("1")),
        ]);
        Ok(Created::New(state.insert("filesystem", clone)))
    }

    async fn split_clone_filesystem(&self, id: &str, _split_speed: u32, _vstore_id: &str) -> Result<()> {
        self.record("SplitCloneFileSystem")?;
        // Split completes immediately in memory
        if let Some(fs) = self.state.lock().kind("filesystem").get_mut(id) {
            fs.set("ISCLONEFS", "false");
            fs.set("SPLITSTATUS", "3");
        }
        Ok(())
    }

    async fn stop_split_clone_filesystem(&self, _id: &str, _vstore_id: &str) -> Result<()> {
        self.record("StopSplitCloneFileSystem")
    }
}

#[async_trait]
impl NfsShareApi for FakeArray {
    async fn get_nfs_share_by_path(&self, path: &str, _vstore_id: &str) -> Result<Option<StorageObject>> {
        self.record("GetNfsShare")?;
        Ok(self.state.lock().find("nfs_share", "SHAREPATH", path))
    }

    async fn create_nfs_share(&self, params: &NfsShareParams) -> Result<Created> {
        self.record("CreateNfsShare")?;
        let mut state = self.state.lock();
        if let Some(existing) = state.find("nfs_share", "SHAREPATH", &params.share_path) {
            return Ok(Created::Existing(existing));
        }
        let share = StorageObject::from_pairs([
            ("SHAREPATH", json!(params.share_path)),
            ("FSID", json!(params.fs_id)),
        ]);
        Ok(Created::New(state.insert("nfs_share", share)))
    }

    async fn delete_nfs_share(&self, id: &str, _vstore_id: &str) -> Result<()> {
        self.remove("DeleteNfsShare", "nfs_share", id)
    }

    async fn get_nfs_share_access(
        &self,
        share_id: &str,
        client: &str,
        _vstore_id: &str,
    ) -> Result<Option<StorageObject>> {
        self.record("GetNfsShareAccess")?;
        let state = self.state.lock();
        Ok(state.objects.get("nfs_client").and_then(|clients| {
            clients
                .values()
                .find(|c| {
                    c.get_string_or_default("PARENTID").ok().as_deref() == Some(share_id)
                        && c.name() == client
                })
                .cloned()
        }))
    }

    async fn allow_nfs_share_access(&self, params: &NfsShareAccessParams) -> Result<()> {
        self.record("AllowNfsShareAccess")?;
        let client = StorageObject::from_pairs([
            ("NAME", json!(params.name)),
            ("PARENTID", json!(params.share_id)),
            ("ACCESSVAL", json!(params.access_val)),
        ]);
        self.state.lock().insert("nfs_client", client);
        Ok(())
    }
}

#[async_trait]
impl DtfsShareApi for FakeArray {
    async fn get_dtfs_share_by_name(&self, name: &str, _vstore_id: &str) -> Result<Option<StorageObject>> {
        self.record("GetDtfsShare")?;
        Ok(self.state.lock().find("dtfs_share", "NAME", name))
    }

    async fn create_dtfs_share(&self, params: &DtfsShareParams) -> Result<Created> {
        self.create_named("CreateDtfsShare", "dtfs_share", &params.name, json!({ "FSID": params.fs_id }))
    }

    async fn delete_dtfs_share(&self, id: &str, _vstore_id: &str) -> Result<()> {
        self.remove("DeleteDtfsShare", "dtfs_share", id)
    }

    async fn add_dtfs_share_auth_user(&self, share_id: &str, user: &str, _vstore_id: &str) -> Result<()> {
        self.record("AddDtfsShareAuthUser")?;
        self.link("dtfs_user", share_id, user);
        Ok(())
    }
}

#[async_trait]
impl QosApi for FakeArray {
    async fn create_qos(&self, params: &QosCreateParams) -> Result<Created> {
        self.record("CreateQos")?;
        let mut state = self.state.lock();
        if let Some(existing) = state.find("qos", "NAME", &params.name) {
            return Ok(Created::Existing(existing));
        }
        let mut qos = StorageObject::from_pairs([
            ("NAME", json!(params.name)),
            ("ENABLESTATUS", json!("true")),
        ]);
        qos.set(
            params.object_type.list_field(),
            json!([params.object_id]).to_string(),
        );
        for (k, v) in params.params.iter() {
            qos.set(k.clone(), *v);
        }
        let qos = state.insert("qos", qos);

        // The array reports the policy on the object it covers
        let kind = match params.object_type {
            QosObjectType::Filesystem => "filesystem",
            QosObjectType::Lun => "lun",
        };
        if let Some(object) = state.kind(kind).get_mut(&params.object_id) {
            object.set("IOCLASSID", qos.id());
        }
        Ok(Created::New(qos))
    }

    async fn get_qos_by_id(&self, id: &str, _vstore_id: &str) -> Result<Option<StorageObject>> {
        self.record("GetQos")?;
        Ok(self.state.lock().get("qos", id))
    }

    async fn activate_qos(&self, id: &str, _vstore_id: &str) -> Result<()> {
        self.record("ActivateQos")?;
        self.set_field("qos", id, "ENABLESTATUS", json!("true"));
        Ok(())
    }

    async fn deactivate_qos(&self, id: &str, _vstore_id: &str) -> Result<()> {
        self.record("DeactivateQos")?;
        self.set_field("qos", id, "ENABLESTATUS", json!("false"));
        Ok(())
    }

    async fn delete_qos(&self, id: &str, _vstore_id: &str) -> Result<()> {
        self.remove("DeleteQos", "qos", id)
    }

    async fn remove_qos_object(
        &self,
        id: &str,
        object_type: QosObjectType,
        object_id: &str,
        _vstore_id: &str,
    ) -> Result<()> {
        self.record("RemoveQosObject")?;
        let mut state = self.state.lock();
        if let Some(qos) = state.kind("qos").get_mut(id) {
            let remaining: Vec<String> = qos_members(qos, object_type)?
                .into_iter()
                .filter(|m| m != object_id)
                .collect();
            qos.set(object_type.list_field(), json!(remaining).to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl LunApi for FakeArray {
    async fn get_lun_by_name(&self, name: &str, _vstore_id: &str) -> Result<Option<StorageObject>> {
        self.record("GetLun")?;
        Ok(self.state.lock().find("lun", "NAME", name))
    }

    async fn get_lun_by_id(&self, id: &str) -> Result<Option<StorageObject>> {
        self.record("GetLunById")?;
        Ok(self.state.lock().get("lun", id))
    }

    async fn create_lun(&self, params: &LunParams) -> Result<Created> {
        let (id, pool_name) = {
            let state = self.state.lock();
            (state.next_id + 1, state.pool_name(&params.parent_id))
        };
        self.create_named(
            "CreateLun",
            "lun",
            &params.name,
            json!({
                "CAPACITY": params.capacity.to_string(),
                "PARENTID": params.parent_id,
                "PARENTNAME": pool_name,
                "WWN": format!("6643ef1000{:06}", id),
                "WORKLOADTYPEID": params.workload_type_id.clone().unwrap_or_default(),
            }),
        )
    }

    async fn extend_lun(&self, id: &str, capacity: i64) -> Result<()> {
        self.record("ExtendLun")?;
        self.set_field("lun", id, "CAPACITY", json!(capacity.to_string()));
        Ok(())
    }

    async fn delete_lun(&self, id: &str) -> Result<()> {
        self.remove("DeleteLun", "lun", id)
    }
}

#[async_trait]
impl HostApi for FakeArray {
    async fn get_host_by_name(&self, name: &str) -> Result<Option<StorageObject>> {
        self.record("GetHost")?;
        Ok(self.state.lock().find("host", "NAME", name))
    }

    async fn create_host(&self, name: &str) -> Result<StorageObject> {
        self.create_named("CreateHost", "host", name, Value::Null)
            .map(Created::into_object)
    }

    async fn get_hostgroup_by_name(&self, name: &str) -> Result<Option<StorageObject>> {
        self.record("GetHostGroup")?;
        Ok(self.state.lock().find("hostgroup", "NAME", name))
    }

    async fn create_hostgroup(&self, name: &str) -> Result<StorageObject> {
        self.create_named("CreateHostGroup", "hostgroup", name, Value::Null)
            .map(Created::into_object)
    }

    async fn get_hostgroups_of_host(&self, host_id: &str) -> Result<Vec<StorageObject>> {
        self.record("GetHostGroupsOfHost")?;
        Ok(self.state.lock().groups_of("hostgroup", "hostgroup", host_id))
    }

    async fn add_host_to_hostgroup(&self, host_id: &str, hostgroup_id: &str) -> Result<()> {
        self.record("AddHostToHostGroup")?;
        self.link("hostgroup", hostgroup_id, host_id);
        Ok(())
    }

    async fn get_lungroup_by_name(&self, name: &str) -> Result<Option<StorageObject>> {
        self.record("GetLunGroup")?;
        Ok(self.state.lock().find("lungroup", "NAME", name))
    }

    async fn create_lungroup(&self, name: &str) -> Result<StorageObject> {
        self.create_named("CreateLunGroup", "lungroup", name, Value::Null)
            .map(Created::into_object)
    }

    async fn get_lungroups_of_lun(&self, lun_id: &str) -> Result<Vec<StorageObject>> {
        self.record("GetLunGroupsOfLun")?;
        Ok(self.state.lock().groups_of("lungroup", "lungroup", lun_id))
    }

    async fn add_lun_to_lungroup(&self, lun_id: &str, lungroup_id: &str) -> Result<()> {
        self.record("AddLunToLunGroup")?;
        self.link("lungroup", lungroup_id, lun_id);
        Ok(())
    }

    async fn remove_lun_from_lungroup(&self, lun_id: &str, lungroup_id: &str) -> Result<()> {
        self.record("RemoveLunFromLunGroup")?;
        self.state
            .lock()
            .links
            .remove(&("lungroup", lungroup_id.to_string(), lun_id.to_string()));
        Ok(())
    }

    async fn get_mapping_by_name(&self, name: &str) -> Result<Option<StorageObject>> {
        self.record("GetMapping")?;
        Ok(self.state.lock().find("mapping", "NAME", name))
    }

    async fn create_mapping(&self, name: &str) -> Result<StorageObject> {
        self.create_named("CreateMapping", "mapping", name, Value::Null)
            .map(Created::into_object)
    }

    async fn get_mappings_of(&self, member: MappingMember, member_id: &str) -> Result<Vec<StorageObject>> {
        self.record("GetMappingsOf")?;
        let relation = mapping_relation(member);
        Ok(self.state.lock().groups_of(relation, "mapping", member_id))
    }

    async fn add_to_mapping(&self, mapping_id: &str, member: MappingMember, member_id: &str) -> Result<()> {
        self.record("AddToMapping")?;
        let relation = mapping_relation(member);
        self.link(relation, mapping_id, member_id);
        Ok(())
    }

    async fn get_initiator(&self, kind: InitiatorKind, id: &str) -> Result<Option<StorageObject>> {
        self.record("GetInitiator")?;
        Ok(self.state.lock().get(initiator_kind(kind), id))
    }

    async fn add_initiator(&self, kind: InitiatorKind, id: &str) -> Result<StorageObject> {
        self.record("AddInitiator")?;
        let mut state = self.state.lock();
        if let Some(existing) = state.get(initiator_kind(kind), id) {
            return Ok(existing);
        }
        let initiator = StorageObject::from_pairs([
            ("ID", json!(id)),
            ("ISFREE", json!("true")),
            ("RUNNINGSTATUS", json!("27")),
        ]);
        Ok(state.insert(initiator_kind(kind), initiator))
    }

    async fn add_initiator_to_host(&self, kind: InitiatorKind, id: &str, host_id: &str) -> Result<()> {
        self.record("AddInitiatorToHost")?;
        let mut state = self.state.lock();
        match state.kind(initiator_kind(kind)).get_mut(id) {
            Some(initiator) => {
                initiator.set("ISFREE", "false");
                initiator.set("PARENTID", host_id);
                Ok(())
            }
            None => Err(Error::backend("AddInitiatorToHost", codes::OBJECT_NOT_EXIST, "no initiator")),
        }
    }

    async fn update_initiator(&self, kind: InitiatorKind, id: &str, fields: Value) -> Result<()> {
        self.record("UpdateInitiator")?;
        let mut state = self.state.lock();
        if let (Some(initiator), Value::Object(fields)) = (state.kind(initiator_kind(kind)).get_mut(id), fields) {
            for (k, v) in fields {
                initiator.set(k, v);
            }
        }
        Ok(())
    }

    async fn get_iscsi_targets(&self) -> Result<Vec<IscsiTarget>> {
        self.record("GetIscsiTargets")?;
        Ok(self.state.lock().iscsi_targets.clone())
    }

    async fn get_fc_target_wwns(&self, initiator_wwn: &str) -> Result<Vec<String>> {
        self.record("GetFcTargetWwns")?;
        Ok(self
            .state
            .lock()
            .fc_links
            .get(initiator_wwn)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_host_lun_id(&self, host_id: &str, lun_id: &str) -> Result<String> {
        self.record("GetHostLunId")?;
        let state = self.state.lock();
        let visible = state.groups_of("hostgroup", "hostgroup", host_id).iter().any(|hg| {
            state
                .groups_of("mapping_hostgroup", "mapping", &hg.id())
                .iter()
                .any(|mv| {
                    state
                        .members("mapping_lungroup", &mv.id())
                        .iter()
                        .any(|lg| state.members("lungroup", lg).iter().any(|l| l == lun_id))
                })
        });
        if visible {
            Ok("1".to_string())
        } else {
            Err(Error::NotFound {
                kind: "host lun".into(),
                name: lun_id.into(),
            })
        }
    }
}

#[async_trait]
impl ResourceApi for FakeArray {
    async fn get_pool_by_name(&self, name: &str) -> Result<Option<StorageObject>> {
        self.record("GetPool")?;
        Ok(self.state.lock().find("pool", "NAME", name))
    }

    async fn get_vstore_by_name(&self, name: &str) -> Result<Option<StorageObject>> {
        self.record("GetVstore")?;
        Ok(self.state.lock().find("vstore", "NAME", name))
    }

    async fn get_application_type_by_name(&self, name: &str) -> Result<Option<StorageObject>> {
        self.record("GetApplicationType")?;
        Ok(self.state.lock().find("workload", "NAME", name))
    }

    async fn get_system(&self) -> Result<StorageObject> {
        self.record("GetSystem")?;
        Ok(StorageObject::from_pairs([("ID", "2102351234"), ("PRODUCTVERSION", "V600R005C00")]))
    }
}

#[async_trait]
impl PairApi for FakeArray {
    async fn get_hypermetro_pairs_of(&self, local_object_id: &str) -> Result<Vec<StorageObject>> {
        self.record("GetHyperMetroPairs")?;
        let state = self.state.lock();
        Ok(state.objects.get("hypermetro").map_or_else(Vec::new, |pairs| {
            pairs
                .values()
                .filter(|p| p.get_string_or_default("LOCALOBJID").ok().as_deref() == Some(local_object_id))
                .cloned()
                .collect()
        }))
    }

    async fn split_hypermetro_pair(&self, id: &str) -> Result<()> {
        self.record("SplitHyperMetroPair")?;
        self.set_field("hypermetro", id, "RUNNINGSTATUS", json!("41"));
        Ok(())
    }

    async fn delete_hypermetro_pair(&self, id: &str) -> Result<()> {
        self.remove("DeleteHyperMetroPair", "hypermetro", id)
    }

    async fn get_replication_pairs_of(&self, local_object_id: &str) -> Result<Vec<StorageObject>> {
        self.record("GetReplicationPairs")?;
        let state = self.state.lock();
        Ok(state.objects.get("replication").map_or_else(Vec::new, |pairs| {
            pairs
                .values()
                .filter(|p| p.get_string_or_default("LOCALRESID").ok().as_deref() == Some(local_object_id))
                .cloned()
                .collect()
        }))
    }

    async fn split_replication_pair(&self, id: &str) -> Result<()> {
        self.record("SplitReplicationPair")?;
        self.set_field("replication", id, "RUNNINGSTATUS", json!("26"));
        Ok(())
    }

    async fn delete_replication_pair(&self, id: &str) -> Result<()> {
        self.remove("DeleteReplicationPair", "replication", id)
    }
}
