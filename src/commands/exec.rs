use clap::Args;
use serde::Serialize;

use converge::exec::Exec;
use converge::utils::shell;

use super::{CmdResult, Runtime};

#[derive(Args)]
pub struct ExecArgs {
    /// Comma-separated roles to target (default: all masters and nodes)
    #[arg(short, long, default_value = "")]
    pub roles: String,

    /// Command to run. A single argument is passed to the remote shell as is.
    #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ExecOutput {
    pub command: String,
    pub targets: Vec<String>,
}

pub fn run(args: ExecArgs, global: &crate::commands::GlobalArgs) -> CmdResult<ExecOutput> {
    let (_, file) = global.load()?;
    let runtime = Runtime::load();

    let command = if args.command.len() == 1 {
        args.command[0].clone()
    } else {
        shell::quote_args(&args.command)
    };

    let exec = Exec::new(runtime.connector, file.cluster, &args.roles)?;
    exec.run_cmd(&command)?;

    Ok((
        ExecOutput {
            command,
            targets: exec.ips().to_vec(),
        },
        0,
    ))
}
