use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;
mod tty;

use commands::{delete, exec, gen, install, join, plugins, render};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "converge")]
#[command(version = VERSION)]
#[command(about = "Converge a declared cluster topology onto a fleet of machines")]
struct Cli {
    /// Cluster file to operate on (defaults to ~/.converge/<cluster>/Clusterfile)
    #[arg(short = 'f', long, global = true, value_name = "PATH")]
    clusterfile: Option<String>,

    /// Cluster name used to locate the default cluster file
    #[arg(short = 'c', long, global = true, default_value = "my-cluster")]
    cluster: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join worker nodes to a running cluster
    Join(join::JoinArgs),
    /// Remove worker nodes from a running cluster
    Delete(delete::DeleteArgs),
    /// Run a shell command on hosts selected by role
    Exec(exec::ExecArgs),
    /// Render configs, distribute the rootfs and install the guest
    Install(install::InstallArgs),
    /// Generate a cluster file from a running cluster
    Gen(gen::GenArgs),
    /// Render the cluster file's configs
    Render(render::RenderArgs),
    /// Show registered plugin handlers and declared plugins
    Plugins(plugins::PluginsArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let global = GlobalArgs {
        clusterfile: cli.clusterfile,
        cluster: cli.cluster,
    };

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    // Nothing sensible is left to report if stdout itself is gone.
    let _ = output::print_json_result(json_result);

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
