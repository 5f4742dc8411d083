//! A vastly simplified GNU parallel: run one shell command per argument,
//! in parallel, with the combined output kept readable.
//!
//! ```text
//! para -t -- wc -l ::: a.txt b.txt c.txt
//! ```

use std::io::Write;
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;

use parout::Group;

/// The token separating the fixed command from its per-run arguments.
const MAGIC: &str = ":::";

#[derive(Parser, Debug)]
#[command(version, about = "Run one command per argument in parallel, output in serial order")]
struct Args {
    /// Print outputs in completion order instead of argument order
    #[arg(short = 'a', long)]
    any_order: bool,

    /// Print each command's stderr after all of its stdout
    #[arg(short = 'g', long)]
    group_stderr: bool,

    /// Prefix every output line with its argument and a tab
    #[arg(short = 't', long)]
    tag: bool,

    /// Separator line printed between command outputs (a newline is added)
    #[arg(short = 's', long)]
    separator: Option<String>,

    /// Maximum commands running at once; 0 runs them all immediately
    #[arg(short = 'j', long, default_value_t = 0)]
    jobs: usize,

    /// The command with its fixed options, then `:::`, then one argument per run
    #[arg(trailing_var_arg = true, required = true)]
    command: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let magic_at = args
        .command
        .iter()
        .position(|word| word == MAGIC)
        .with_context(|| format!("expected `{MAGIC}` between the command and its arguments"))?;
    let (command, run_args) = args.command.split_at(magic_at);
    let run_args = &run_args[1..]; // skip the magic token itself

    if command.is_empty() {
        bail!("no command given before `{MAGIC}`");
    }
    if run_args.is_empty() {
        bail!("no arguments given after `{MAGIC}`");
    }

    let mut builder = Group::builder()
        .order_runners(!args.any_order)
        .order_stderr(args.group_stderr)
        .limit_active_runners(args.jobs);
    if let Some(sep) = &args.separator {
        let sep = format!("{sep}\n");
        builder = builder.stdout_separator(sep.as_bytes()).stderr_separator(sep.as_bytes());
    }
    let mut group = builder.build().context("invalid option combination")?;

    info!("running {} command(s), {} at a time", run_args.len(), args.jobs);

    for run_arg in run_args {
        let tag = if args.tag { format!("{run_arg}\t") } else { String::new() };
        let command = command.to_vec();
        let run_arg = run_arg.clone();
        group.add(&tag, &tag, move |stdout, stderr| {
            match Command::new(&command[0]).args(&command[1..]).arg(&run_arg).output() {
                Ok(output) => {
                    let _ = stdout.write_all(&output.stdout);
                    let _ = stderr.write_all(&output.stderr);
                }
                Err(e) => {
                    let _ = writeln!(stderr, "{run_arg}: failed to run: {e}");
                }
            }
        });
    }

    group.run();
    group.wait();

    Ok(())
}
