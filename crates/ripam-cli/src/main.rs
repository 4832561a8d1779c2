use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use ripam_cidr::Cidr;
use ripam_core::config::Config;
use ripam_core::{
    Address, AddressFilter, AddressStatus, AllocationMode, CustomerId, NewSubnet, PlanId,
    RouterId, RouterStatus, ServiceId, SubnetId, SyncStatus,
};
use ripam_db::LedgerStore;
use ripam_ledger::{AllocationLedger, Directory, ProvisionRequest, ProvisioningCoordinator};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod output;

use output::{Host, OutputFormat};

/// IP address and subnet allocation for ISP access networks
#[derive(Parser)]
#[command(name = "ripam")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value = "human", global = true)]
    output: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Ledger directory (overrides RIPAM_DATA_DIR)
    #[arg(long, value_name = "DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve(ServeArgs),
    /// Validate and normalize a CIDR block
    Validate(ValidateArgs),
    /// List usable host addresses of a block
    Hosts(HostsArgs),
    /// Check a block against existing subnets
    Overlap(OverlapArgs),
    /// Manage subnets
    #[command(subcommand)]
    Subnet(SubnetCommand),
    /// Manage routers
    #[command(subcommand)]
    Router(RouterCommand),
    /// Manage service plans
    #[command(subcommand)]
    Plan(PlanCommand),
    /// Assign, release and reserve addresses
    #[command(subcommand)]
    Ip(IpCommand),
    /// Provision a customer service
    Provision(ProvisionArgs),
    /// Customer service lifecycle
    #[command(subcommand)]
    Service(ServiceCommand),
}

#[derive(Args)]
struct ServeArgs {
    /// Listen address (overrides RIPAM_BIND)
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<SocketAddr>,
}

#[derive(Args)]
struct ValidateArgs {
    /// CIDR block, e.g. 192.168.1.0/24
    #[arg(value_name = "CIDR")]
    cidr: String,
}

#[derive(Args)]
struct HostsArgs {
    #[arg(value_name = "CIDR")]
    cidr: String,

    /// Maximum number of hosts to print
    #[arg(short, long, default_value = "16")]
    limit: usize,
}

#[derive(Args)]
struct OverlapArgs {
    #[arg(value_name = "CIDR")]
    cidr: String,

    /// Subnet id to ignore
    #[arg(short, long)]
    exclude: Option<u64>,
}

#[derive(Subcommand)]
enum SubnetCommand {
    /// Create a subnet
    Create {
        #[arg(value_name = "CIDR")]
        cidr: String,
        #[arg(short, long)]
        router: u64,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        gateway: Option<Ipv4Addr>,
        #[arg(long)]
        vlan: Option<u16>,
    },
    /// List subnets
    List {
        #[arg(short, long)]
        router: Option<u64>,
    },
    /// Generate address rows for a subnet
    Generate {
        id: u64,
        /// Fill in rows a failed run left out
        #[arg(long)]
        resume: bool,
    },
    /// Delete a subnet and its unassigned addresses
    Delete { id: u64 },
    /// Show utilization
    Usage { id: u64 },
}

#[derive(Subcommand)]
enum RouterCommand {
    /// Register a router
    Add {
        name: String,
        /// Register as offline
        #[arg(long)]
        offline: bool,
    },
    /// List routers
    List,
    /// Mark a router online or offline
    Status { id: u64, status: RouterState },
}

#[derive(Subcommand)]
enum PlanCommand {
    /// Register a service plan
    Add {
        name: String,
        #[arg(long)]
        download: Option<u32>,
        #[arg(long)]
        upload: Option<u32>,
    },
    /// List service plans
    List,
}

#[derive(Subcommand)]
enum IpCommand {
    /// Bind an address to a service
    Assign {
        #[arg(short, long)]
        service: u64,
        #[arg(long)]
        subnet: Option<u64>,
        #[arg(short, long)]
        address: Option<Ipv4Addr>,
    },
    /// Return an address to the pool
    Release {
        #[arg(short, long, conflicts_with = "address", required_unless_present = "address")]
        service: Option<u64>,
        #[arg(short, long)]
        address: Option<Ipv4Addr>,
    },
    /// List addresses
    List {
        #[arg(long, value_enum)]
        status: Option<AddressState>,
        #[arg(long)]
        subnet: Option<u64>,
        #[arg(long)]
        customer: Option<u64>,
        #[arg(long)]
        router: Option<u64>,
    },
    /// Hold an address out of the pool
    Reserve {
        address: Ipv4Addr,
        #[arg(short, long)]
        notes: Option<String>,
    },
    /// Lift a reservation
    Unreserve { address: Ipv4Addr },
}

#[derive(Args)]
struct ProvisionArgs {
    #[arg(short, long)]
    customer: u64,
    #[arg(short, long)]
    plan: u64,
    #[arg(short, long)]
    router: u64,
    /// Static address; dynamic allocation when omitted
    #[arg(long = "static", value_name = "ADDRESS")]
    static_address: Option<Ipv4Addr>,
}

#[derive(Subcommand)]
enum ServiceCommand {
    /// Show a service
    Show { id: u64 },
    /// Pending to active
    Activate { id: u64 },
    /// Suspend a service
    Suspend {
        id: u64,
        /// Also release its address
        #[arg(long)]
        release_ip: bool,
    },
    /// Release the address and end the service
    Terminate { id: u64 },
    /// Suspended to active
    Reactivate { id: u64 },
    /// Record the outcome of the router configuration push
    Sync {
        id: u64,
        /// The push failed
        #[arg(long)]
        failed: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RouterState {
    Online,
    Offline,
}

impl From<RouterState> for RouterStatus {
    fn from(state: RouterState) -> Self {
        match state {
            RouterState::Online => RouterStatus::Online,
            RouterState::Offline => RouterStatus::Offline,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AddressState {
    Available,
    Assigned,
    Reserved,
}

impl From<AddressState> for AddressStatus {
    fn from(state: AddressState) -> Self {
        match state {
            AddressState::Available => AddressStatus::Available,
            AddressState::Assigned => AddressStatus::Assigned,
            AddressState::Reserved => AddressStatus::Reserved,
        }
    }
}

/// Ledger handles opened for one command
struct Ledger {
    ledger: Arc<AllocationLedger>,
    coordinator: ProvisioningCoordinator,
    directory: Directory,
}

impl Ledger {
    fn open(config: &Config) -> Result<Self> {
        let store = LedgerStore::open(&config.data_dir)
            .with_context(|| format!("open ledger at {}", config.data_dir.display()))?;
        let store = Arc::new(store);
        let ledger = Arc::new(AllocationLedger::from_config(store.clone(), config));
        Ok(Self {
            coordinator: ProvisioningCoordinator::from_config(ledger.clone(), config),
            directory: Directory::new(store),
            ledger,
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::from_env().context("invalid RIPAM_* environment")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    match cli.command {
        Commands::Serve(args) => handle_serve(args, config, cli.verbose)?,
        Commands::Validate(args) => handle_validate(args, cli.output)?,
        Commands::Hosts(args) => handle_hosts(args, &config, cli.output)?,
        Commands::Overlap(args) => handle_overlap(args, &config, cli.output)?,
        Commands::Subnet(cmd) => handle_subnet(cmd, &config, cli.output)?,
        Commands::Router(cmd) => handle_router(cmd, &config, cli.output)?,
        Commands::Plan(cmd) => handle_plan(cmd, &config, cli.output)?,
        Commands::Ip(cmd) => handle_ip(cmd, &config, cli.output)?,
        Commands::Provision(args) => handle_provision(args, &config, cli.output)?,
        Commands::Service(cmd) => handle_service(cmd, &config, cli.output)?,
    }

    Ok(())
}

/// Logs go to stderr so structured output on stdout stays parseable
fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let var = std::env::var("RUST_LOG").unwrap_or_default();
    let var = format!(
        "warn,ripam_ledger={level},ripam_api={level},ripam_db={level},{var}"
    );
    let filter = EnvFilter::builder().parse_lossy(var);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn handle_serve(args: ServeArgs, mut config: Config, verbose: bool) -> Result<()> {
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if verbose {
        eprintln!("{} Serving {} on {}", "›".blue(), config.data_dir.display(), config.bind);
    }

    tokio::runtime::Runtime::new()?.block_on(ripam_api::serve(config))
}

fn handle_validate(args: ValidateArgs, format: OutputFormat) -> Result<()> {
    let validation = ripam_cidr::validate(&args.cidr);
    output::one(&validation, format)?;
    if !validation.is_valid {
        std::process::exit(2);
    }
    Ok(())
}

fn handle_hosts(args: HostsArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let cidr = Cidr::parse(args.cidr.trim())?;
    let total = config.policy.check(&cidr)?;

    let hosts: Vec<Host> = cidr
        .hosts()
        .take(args.limit)
        .zip(0u64..)
        .map(|(address, index)| Host { index, address })
        .collect();
    output::many(&hosts, format)?;

    if matches!(format, OutputFormat::Human) && total > hosts.len() as u64 {
        println!(
            "{}",
            format!("… {} more of {} usable hosts", total - hosts.len() as u64, total).dimmed()
        );
    }
    Ok(())
}

fn handle_overlap(args: OverlapArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let cidr = Cidr::parse(args.cidr.trim())?;
    let ledger = Ledger::open(config)?;
    let conflicts = ledger
        .ledger
        .find_overlaps(&cidr, args.exclude.map(SubnetId))?;

    if conflicts.is_empty() && matches!(format, OutputFormat::Human) {
        println!("{} {} does not overlap any subnet", "✓".green(), cidr);
        return Ok(());
    }
    output::many(&conflicts, format)
}

fn handle_subnet(cmd: SubnetCommand, config: &Config, format: OutputFormat) -> Result<()> {
    let ledger = Ledger::open(config)?.ledger;
    match cmd {
        SubnetCommand::Create {
            cidr,
            router,
            name,
            gateway,
            vlan,
        } => {
            let subnet = ledger.create_subnet(NewSubnet {
                cidr,
                router_id: RouterId(router),
                gateway,
                vlan_id: vlan,
                name,
            })?;
            output::one(&subnet, format)
        }
        SubnetCommand::List { router } => {
            output::many(&ledger.list_subnets(router.map(RouterId))?, format)
        }
        SubnetCommand::Generate { id, resume } => {
            let report = if resume {
                ledger.resume_generation(SubnetId(id))?
            } else {
                ledger.generate(SubnetId(id))?
            };
            output::one(&report, format)
        }
        SubnetCommand::Delete { id } => {
            let subnet = ledger.delete_subnet(SubnetId(id))?;
            output::one(&subnet, format)
        }
        SubnetCommand::Usage { id } => output::one(&ledger.utilization(SubnetId(id))?, format),
    }
}

fn handle_router(cmd: RouterCommand, config: &Config, format: OutputFormat) -> Result<()> {
    let directory = Ledger::open(config)?.directory;
    match cmd {
        RouterCommand::Add { name, offline } => {
            let status = if offline {
                RouterStatus::Offline
            } else {
                RouterStatus::Online
            };
            output::one(&directory.add_router(&name, status)?, format)
        }
        RouterCommand::List => output::many(&directory.routers()?, format),
        RouterCommand::Status { id, status } => output::one(
            &directory.set_router_status(RouterId(id), status.into())?,
            format,
        ),
    }
}

fn handle_plan(cmd: PlanCommand, config: &Config, format: OutputFormat) -> Result<()> {
    let directory = Ledger::open(config)?.directory;
    match cmd {
        PlanCommand::Add {
            name,
            download,
            upload,
        } => output::one(&directory.add_plan(&name, download, upload)?, format),
        PlanCommand::List => output::many(&directory.plans()?, format),
    }
}

fn handle_ip(cmd: IpCommand, config: &Config, format: OutputFormat) -> Result<()> {
    let ledger = Ledger::open(config)?.ledger;
    match cmd {
        IpCommand::Assign {
            service,
            subnet,
            address,
        } => {
            let row = ledger.assign(ServiceId(service), subnet.map(SubnetId), address)?;
            output::one(&row, format)
        }
        IpCommand::Release { service, address } => {
            let released = match (service, address) {
                (Some(service), _) => ledger.release_by_service(ServiceId(service))?,
                (None, Some(address)) => Some(ledger.release_address(address)?),
                (None, None) => anyhow::bail!("either --service or --address is required"),
            };
            match released {
                Some(row) => output::one(&row, format),
                None => output::many::<Address>(&[], format),
            }
        }
        IpCommand::List {
            status,
            subnet,
            customer,
            router,
        } => {
            let filter = AddressFilter {
                status: status.map(Into::into),
                subnet_id: subnet.map(SubnetId),
                customer_id: customer.map(CustomerId),
                router_id: router.map(RouterId),
            };
            output::many(&ledger.list_addresses(&filter)?, format)
        }
        IpCommand::Reserve { address, notes } => {
            output::one(&ledger.reserve(address, notes)?, format)
        }
        IpCommand::Unreserve { address } => output::one(&ledger.unreserve(address)?, format),
    }
}

fn handle_provision(args: ProvisionArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let ledger = Ledger::open(config)?;
    let mode = if args.static_address.is_some() {
        AllocationMode::Static
    } else {
        AllocationMode::Dynamic
    };

    let provisioned = ledger.coordinator.provision(ProvisionRequest {
        customer_id: CustomerId(args.customer),
        plan_id: PlanId(args.plan),
        router_id: RouterId(args.router),
        mode,
        address: args.static_address,
    })?;
    output::one(&provisioned, format)
}

fn handle_service(cmd: ServiceCommand, config: &Config, format: OutputFormat) -> Result<()> {
    let coordinator = Ledger::open(config)?.coordinator;
    let service = match cmd {
        ServiceCommand::Show { id } => coordinator.service(ServiceId(id))?.service,
        ServiceCommand::Activate { id } => coordinator.activate(ServiceId(id))?,
        ServiceCommand::Suspend { id, release_ip } => {
            coordinator.suspend(ServiceId(id), release_ip)?
        }
        ServiceCommand::Terminate { id } => coordinator.terminate(ServiceId(id))?,
        ServiceCommand::Reactivate { id } => coordinator.reactivate(ServiceId(id))?,
        ServiceCommand::Sync { id, failed } => {
            let status = if failed {
                SyncStatus::Failed
            } else {
                SyncStatus::Synced
            };
            coordinator.record_sync(ServiceId(id), status)?.service
        }
    };
    output::one(&service, format)
}
