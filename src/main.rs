//! OceanStor CSI Core
//!
//! Command-line front end for the volume workflows and the attachment
//! manager. Each invocation runs one operation against one configured
//! backend and prints the result as JSON.

use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use oceanstor_csi_core::domain::ResourceApi;
use oceanstor_csi_core::{
    AttachManager, AttachParams, AttachProtocol, BackendConnectionPool, CreateVolumeModel, Creator,
    Deleter, DriverConfig, Error, ExpandVolumeModel, Expander, Protocol, Querier, QueryVolumeModel,
    Result, StorageApiRef, VolumeRef,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// OceanStor CSI Core - transactional volume orchestration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Driver configuration file
    #[arg(long, env = "OCEANSTOR_CSI_CONFIG", default_value = "/etc/oceanstor-csi/config.yaml")]
    config: PathBuf,

    /// Backend to operate on
    #[arg(long, env = "OCEANSTOR_CSI_BACKEND")]
    backend: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a volume, or reuse an existing one with the same name
    Create(CreateArgs),
    /// Delete a volume and everything hanging off it
    Delete(VolumeArgs),
    /// Grow a volume
    Expand {
        #[command(flatten)]
        volume: VolumeArgs,
        /// New capacity in 512-byte sectors
        #[arg(long)]
        capacity: i64,
    },
    /// Look up an existing volume
    Query {
        #[command(flatten)]
        volume: VolumeArgs,
        /// Fail unless the volume has this workload type
        #[arg(long)]
        workload_type: Option<String>,
    },
    /// Map a LUN to a node
    Attach(AttachArgs),
    /// Unmap a LUN from a node
    Detach(AttachArgs),
    /// Log in and print the array's system information
    System,
}

#[derive(ClapArgs, Debug)]
struct VolumeArgs {
    /// nfs, dataturbo or block
    #[arg(long, default_value = "nfs")]
    protocol: Protocol,

    #[arg(long)]
    name: String,

    #[arg(long)]
    vstore: Option<String>,
}

#[derive(ClapArgs, Debug)]
struct CreateArgs {
    #[command(flatten)]
    volume: VolumeArgs,

    #[arg(long, default_value = "")]
    pool: String,

    /// Capacity in 512-byte sectors
    #[arg(long)]
    capacity: i64,

    #[arg(long, default_value = "")]
    description: String,

    /// NFS client allowed to mount the share (repeatable)
    #[arg(long = "auth-client")]
    auth_clients: Vec<String>,

    /// DataTurbo user allowed on the share (repeatable)
    #[arg(long = "auth-user")]
    auth_users: Vec<String>,

    /// QoS policy as JSON, e.g. '{"MAXIOPS": 1000}'
    #[arg(long)]
    qos: Option<String>,

    #[arg(long)]
    workload_type: Option<String>,

    /// Clone this filesystem instead of creating an empty one
    #[arg(long)]
    clone_from: Option<String>,

    /// Split the clone from its parent
    #[arg(long)]
    split_clone: bool,

    /// Create thick (fully allocated) instead of thin
    #[arg(long)]
    thick: bool,
}

#[derive(ClapArgs, Debug)]
struct AttachArgs {
    /// LUN name
    #[arg(long)]
    lun: String,

    /// Node the LUN is mapped to
    #[arg(long, env = "NODE_NAME")]
    node: String,

    /// Node initiator: IQN, WWN or NQN (repeatable)
    #[arg(long = "initiator", required = true)]
    initiators: Vec<String>,

    /// Overrides the backend's configured protocol
    #[arg(long)]
    protocol: Option<AttachProtocol>,

    #[arg(long)]
    vstore: Option<String>,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = DriverConfig::from_file(&args.config)?;
    let backend = config.backend(&args.backend)?;
    info!(
        version = oceanstor_csi_core::VERSION,
        backend = %backend.name,
        product = ?backend.product,
        "Starting OceanStor CSI core"
    );

    let pool = BackendConnectionPool::new(config.max_total_requests);
    let client = Arc::new(backend.connect(&pool)?);
    let api: StorageApiRef = client.clone();
    let settings = backend.workflow_settings();

    let outcome = match args.command {
        Command::Create(create) => {
            let model = CreateVolumeModel {
                protocol: create.volume.protocol,
                name: create.volume.name,
                pool_name: create.pool,
                capacity: create.capacity,
                vstore_name: create.volume.vstore.or_else(|| backend.vstore_name.clone()),
                description: create.description,
                alloc_type: if create.thick { 0 } else { 1 },
                auth_clients: create.auth_clients,
                auth_users: create.auth_users,
                qos: create.qos,
                workload_type: create.workload_type,
                clone_from: create.clone_from,
                split_clone: create.split_clone,
                ..Default::default()
            };
            Creator::new(api, settings, model).create().await.and_then(print_json)
        }
        Command::Delete(volume) => {
            let volume = VolumeRef {
                protocol: volume.protocol,
                name: volume.name,
                vstore_name: volume.vstore.or_else(|| backend.vstore_name.clone()),
            };
            Deleter::new(api, volume).delete().await
        }
        Command::Expand { volume, capacity } => {
            let model = ExpandVolumeModel {
                protocol: volume.protocol,
                name: volume.name,
                vstore_name: volume.vstore.or_else(|| backend.vstore_name.clone()),
                capacity,
            };
            Expander::new(api, model).expand().await
        }
        Command::Query { volume, workload_type } => {
            let model = QueryVolumeModel {
                protocol: volume.protocol,
                name: volume.name,
                vstore_name: volume.vstore.or_else(|| backend.vstore_name.clone()),
                workload_type,
            };
            Querier::new(api, model).query().await.and_then(print_json)
        }
        Command::Attach(attach) => {
            let lun = attach.lun.clone();
            let params = attach_params(attach, backend)?;
            AttachManager::new(api)
                .controller_attach(&lun, &params)
                .await
                .and_then(print_json)
        }
        Command::Detach(attach) => {
            let lun = attach.lun.clone();
            let params = attach_params(attach, backend)?;
            AttachManager::new(api)
                .controller_detach(&lun, &params)
                .await
                .and_then(|wwn| print_json(serde_json::json!({ "lunWwn": wwn })))
        }
        Command::System => api.get_system().await.and_then(|system| {
            let version = system.get_string_or_default("PRODUCTVERSION")?;
            info!(backend = %backend.name, system = %system.id(), %version, "Backend reachable");
            print_json(system)
        }),
    };

    client.logout().await;
    outcome
}

fn attach_params(args: AttachArgs, backend: &oceanstor_csi_core::BackendConfig) -> Result<AttachParams> {
    let protocol = args.protocol.or(backend.protocol).ok_or_else(|| {
        Error::Configuration(format!(
            "backend {} has no attach protocol; pass --protocol",
            backend.name
        ))
    })?;
    Ok(AttachParams {
        node_name: args.node,
        protocol,
        initiators: args.initiators,
        portals: backend.portals.clone(),
        alua: backend.alua.clone(),
        vstore_name: args.vstore.or_else(|| backend.vstore_name.clone()),
    })
}

fn print_json<T: Serialize>(value: T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=info", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // stdout carries the command result
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
