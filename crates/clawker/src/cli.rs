//! CLI argument definitions and dispatch
//!
//! Command tree: `container` (the lifecycle surface), `project` (registry
//! veneer), `config` (store veneer), and `proxy` (host proxy
//! supervision). Stdout is reserved for machine-parseable identifiers;
//! everything human goes to stderr.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::commands;

#[derive(Parser, Debug)]
#[command(
    name = "clawker",
    version,
    about = "Run isolated AI-coding-agent workloads in containers",
    long_about = "clawker runs long-lived agent containers that mount your source tree, \
                  inherit selected host credentials, and talk to the host through a local \
                  HTTP side-channel."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage agent containers
    Container {
        #[command(subcommand)]
        command: ContainerCommands,
    },
    /// Manage the project registry
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Read and write configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Supervise the host proxy
    Proxy {
        #[command(subcommand)]
        command: ProxyCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ContainerCommands {
    /// Create a container ("@" as IMAGE resolves the default image)
    Create(CreateArgs),
    /// Start stopped containers
    Start(TargetArgs),
    /// Stop running containers
    Stop(StopArgs),
    /// Restart containers
    Restart(RestartArgs),
    /// Send a signal to running containers
    Kill(KillArgs),
    /// Pause running containers
    Pause(TargetArgs),
    /// Unpause paused containers
    Unpause(TargetArgs),
    /// Remove containers
    #[command(alias = "rm")]
    Remove(RemoveArgs),
    /// Rename a container
    Rename(RenameArgs),
    /// Update resource limits on containers
    Update(UpdateArgs),
    /// Block until containers exit and print their exit codes
    Wait(TargetArgs),
    /// Attach to a running container
    Attach(SingleTargetArgs),
    /// Run a command inside a running container
    Exec(ExecArgs),
    /// Copy files between host and container
    Cp(CpArgs),
    /// Show low-level container details as JSON
    Inspect(TargetArgs),
    /// List containers of the current project
    #[command(alias = "ls")]
    List(ListArgs),
    /// Fetch container logs
    Logs(LogsArgs),
    /// Show processes running in a container
    Top(SingleTargetArgs),
    /// Live resource usage for containers
    Stats(StatsArgs),
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Image reference, or "@" for the configured default
    pub image: String,

    /// Command (and args) to run in the container; flags after IMAGE pass
    /// through to the container command
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// Agent name (container becomes clawker.<project>.<agent>)
    #[arg(long)]
    pub agent: Option<String>,

    /// Explicit container name (mutually exclusive with --agent)
    #[arg(long)]
    pub name: Option<String>,

    /// Workspace mode: bind (live mount) or snapshot (copied volume;
    /// file-level ignore patterns apply only here)
    #[arg(long)]
    pub mode: Option<String>,

    /// Environment variables (KEY=VAL)
    #[arg(short = 'e', long = "env")]
    pub env: Vec<String>,

    /// Extra volumes (SRC:DST[:ro])
    #[arg(short = 'v', long = "volume")]
    pub volumes: Vec<String>,

    /// Port bindings (HOST:CTR[/proto])
    #[arg(short = 'p', long = "publish")]
    pub ports: Vec<String>,

    /// Working directory inside the container
    #[arg(short = 'w', long)]
    pub workdir: Option<String>,

    /// User inside the container
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Override the image entrypoint
    #[arg(long)]
    pub entrypoint: Option<String>,

    /// Allocate a pseudo-TTY
    #[arg(short = 't', long)]
    pub tty: bool,

    /// Keep stdin open
    #[arg(short = 'i', long)]
    pub interactive: bool,

    /// Join this network instead of the managed one
    #[arg(long)]
    pub network: Option<String>,

    /// Extra labels (KEY=VAL)
    #[arg(short = 'l', long = "label")]
    pub labels: Vec<String>,

    /// Remove the container when it exits
    #[arg(long)]
    pub rm: bool,

    /// Run against a git worktree of the project
    #[arg(long)]
    pub worktree: Option<String>,

    /// Memory limit (e.g. 512m, 2g)
    #[arg(long)]
    pub memory: Option<String>,

    /// Memory+swap limit (-1 for unlimited swap)
    #[arg(long)]
    pub memory_swap: Option<String>,

    /// CPU limit as a fraction (e.g. 1.5)
    #[arg(long)]
    pub cpus: Option<String>,

    /// Process-count limit
    #[arg(long)]
    pub pids_limit: Option<i64>,

    /// Block-IO weight: 0 (disabled) or 10-1000
    #[arg(long)]
    pub blkio_weight: Option<u16>,

    /// Restart policy (no, on-failure, always, unless-stopped)
    #[arg(long)]
    pub restart: Option<String>,

    /// Rebuild a missing default image without prompting
    #[arg(long)]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Container names
    pub names: Vec<String>,

    /// Address containers by agent name within the current project
    #[arg(long = "agent")]
    pub agents: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SingleTargetArgs {
    /// Container name
    pub name: Option<String>,

    /// Address the container by agent name within the current project
    #[arg(long)]
    pub agent: Option<String>,
}

#[derive(Args, Debug)]
pub struct StopArgs {
    #[command(flatten)]
    pub targets: TargetArgs,

    /// Seconds to wait before killing
    #[arg(short = 't', long = "time")]
    pub time: Option<u32>,

    /// Signal to send instead of SIGTERM
    #[arg(short = 's', long)]
    pub signal: Option<String>,
}

#[derive(Args, Debug)]
pub struct RestartArgs {
    #[command(flatten)]
    pub targets: TargetArgs,

    /// Seconds to wait before killing
    #[arg(short = 't', long = "time")]
    pub time: Option<u32>,
}

#[derive(Args, Debug)]
pub struct KillArgs {
    #[command(flatten)]
    pub targets: TargetArgs,

    /// Signal to send
    #[arg(short = 's', long, default_value = "KILL")]
    pub signal: String,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    #[command(flatten)]
    pub targets: TargetArgs,

    /// Remove running containers too
    #[arg(short = 'f', long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct RenameArgs {
    /// Current container name
    pub name: String,
    /// New container name
    pub new_name: String,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub targets: TargetArgs,

    /// Memory limit (e.g. 512m, 2g)
    #[arg(long)]
    pub memory: Option<String>,

    /// Memory+swap limit (-1 for unlimited swap)
    #[arg(long)]
    pub memory_swap: Option<String>,

    /// CPU limit as a fraction
    #[arg(long)]
    pub cpus: Option<String>,

    /// Process-count limit
    #[arg(long)]
    pub pids_limit: Option<i64>,

    /// Block-IO weight: 0 (disabled) or 10-1000
    #[arg(long)]
    pub blkio_weight: Option<u16>,

    /// Restart policy
    #[arg(long)]
    pub restart: Option<String>,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    #[command(flatten)]
    pub target: SingleTargetArgs,

    /// Command and args to run
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// Environment variables (KEY=VAL)
    #[arg(short = 'e', long = "env")]
    pub env: Vec<String>,

    /// User to run as
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Working directory
    #[arg(short = 'w', long)]
    pub workdir: Option<String>,

    /// Allocate a pseudo-TTY
    #[arg(short = 't', long)]
    pub tty: bool,

    /// Keep stdin open
    #[arg(short = 'i', long)]
    pub interactive: bool,
}

#[derive(Args, Debug)]
pub struct CpArgs {
    /// Source (PATH or CONTAINER:PATH)
    pub src: String,
    /// Destination (PATH or CONTAINER:PATH)
    pub dst: String,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Include stopped containers
    #[arg(short = 'a', long)]
    pub all: bool,

    /// List managed containers of every project
    #[arg(long)]
    pub all_projects: bool,
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    #[command(flatten)]
    pub target: SingleTargetArgs,

    /// Follow log output
    #[arg(short = 'f', long)]
    pub follow: bool,

    /// Show logs since a timestamp or duration
    #[arg(long)]
    pub since: Option<String>,

    /// Show logs before a timestamp or duration
    #[arg(long)]
    pub until: Option<String>,

    /// Number of lines from the end
    #[arg(long)]
    pub tail: Option<String>,

    /// Prefix lines with timestamps
    #[arg(long)]
    pub timestamps: bool,
}

#[derive(Args, Debug)]
pub struct StatsArgs {
    #[command(flatten)]
    pub targets: TargetArgs,

    /// Print one sample and exit
    #[arg(long)]
    pub no_stream: bool,
}

#[derive(Subcommand, Debug)]
enum ProjectCommands {
    /// Register a project (defaults to the current directory)
    Add {
        /// Display name; defaults to the directory name
        name: Option<String>,
        /// Project root; defaults to the current directory
        #[arg(long)]
        root: Option<String>,
    },
    /// List registered projects
    #[command(alias = "ls")]
    List,
    /// Remove a project by slug
    #[command(alias = "rm")]
    Remove { slug: String },
    /// List a project's worktrees, optionally pruning dead ones
    Worktrees {
        slug: String,
        /// Drop records whose directory and .git pointer are both gone
        #[arg(long)]
        prune: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print a configuration value
    Get { key: String },
    /// Set a configuration value and persist it
    Set {
        key: String,
        value: String,
        /// Force a scope (settings, project, registry)
        #[arg(long)]
        scope: Option<String>,
    },
    /// Flush dirty keys, or export the merged config with --path
    Write {
        /// Export the merged configuration to this file
        #[arg(long)]
        path: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ProxyCommands {
    /// Start the host proxy and stay resident until interrupted
    Start,
    /// Stop a proxy started by this user
    Stop,
    /// Report whether a proxy is serving on the configured port
    Status,
}

impl Cli {
    pub async fn dispatch(self) -> Result<()> {
        match self.command {
            Commands::Container { command } => match command {
                ContainerCommands::Create(args) => commands::create::run(args).await,
                ContainerCommands::Start(args) => commands::lifecycle_ops::run_start(args).await,
                ContainerCommands::Stop(args) => commands::lifecycle_ops::run_stop(args).await,
                ContainerCommands::Restart(args) => {
                    commands::lifecycle_ops::run_restart(args).await
                }
                ContainerCommands::Kill(args) => commands::lifecycle_ops::run_kill(args).await,
                ContainerCommands::Pause(args) => {
                    commands::lifecycle_ops::run_simple(args, commands::lifecycle_ops::Op::Pause)
                        .await
                }
                ContainerCommands::Unpause(args) => {
                    commands::lifecycle_ops::run_simple(args, commands::lifecycle_ops::Op::Unpause)
                        .await
                }
                ContainerCommands::Remove(args) => commands::lifecycle_ops::run_remove(args).await,
                ContainerCommands::Rename(args) => commands::lifecycle_ops::run_rename(args).await,
                ContainerCommands::Update(args) => commands::lifecycle_ops::run_update(args).await,
                ContainerCommands::Wait(args) => {
                    commands::lifecycle_ops::run_simple(args, commands::lifecycle_ops::Op::Wait)
                        .await
                }
                ContainerCommands::Attach(args) => commands::exec::run_attach(args).await,
                ContainerCommands::Exec(args) => commands::exec::run_exec(args).await,
                ContainerCommands::Cp(args) => commands::exec::run_cp(args).await,
                ContainerCommands::Inspect(args) => commands::list::run_inspect(args).await,
                ContainerCommands::List(args) => commands::list::run_list(args).await,
                ContainerCommands::Logs(args) => commands::logs::run_logs(args).await,
                ContainerCommands::Top(args) => commands::logs::run_top(args).await,
                ContainerCommands::Stats(args) => commands::logs::run_stats(args).await,
            },
            Commands::Project { command } => match command {
                ProjectCommands::Add { name, root } => commands::project::run_add(name, root),
                ProjectCommands::List => commands::project::run_list(),
                ProjectCommands::Remove { slug } => commands::project::run_remove(&slug),
                ProjectCommands::Worktrees { slug, prune } => {
                    commands::project::run_worktrees(&slug, prune)
                }
            },
            Commands::Config { command } => match command {
                ConfigCommands::Get { key } => commands::config_cmd::run_get(&key),
                ConfigCommands::Set { key, value, scope } => {
                    commands::config_cmd::run_set(&key, &value, scope.as_deref())
                }
                ConfigCommands::Write { path } => commands::config_cmd::run_write(path.as_deref()),
            },
            Commands::Proxy { command } => match command {
                ProxyCommands::Start => commands::proxy::run_start().await,
                ProxyCommands::Stop => commands::proxy::run_stop().await,
                ProxyCommands::Status => commands::proxy::run_status().await,
            },
        }
    }
}
