/*!
 * Tether CLI
 *
 * The same binary serves both sides of the protocol: on the controller it
 * drives the backend facade (`hosts`, `deploy`, `verify`), and as the
 * deployed executable it parses the bootstrap contract (`run`) and serves a
 * task over stdin/stdout.
 */

use clap::{Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::error;

use tether::error::{Result, EXIT_FAILURE, EXIT_FATAL, EXIT_SUCCESS};
use tether::{
    logging, remote, Backend, ConnectionParameters, HostDirectory, NodeSettings, StaticDirectory,
    TaskRegistry,
};

#[derive(Parser)]
#[command(name = "tether", version, about = "Launch and drive remote workers over SSH", long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log to this file instead of stderr
    #[arg(long, value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve one task over stdin/stdout (the deployed executable's bootstrap)
    Run {
        /// Address the worker should listen on
        #[arg(long)]
        host: String,

        /// Port the worker should listen on
        #[arg(long)]
        port: u16,

        /// Group the worker belongs to
        #[arg(long)]
        group: String,

        /// Detach from the channel after bootstrap
        #[arg(long)]
        background: bool,
    },

    /// List the hosts of a group
    Hosts {
        /// Host directory file
        #[arg(long, value_name = "PATH")]
        hosts_file: PathBuf,

        /// Group to list
        #[arg(long)]
        group: String,
    },

    /// Copy the configured executable to a host
    Deploy {
        /// Connection parameters file
        #[arg(long, value_name = "PATH")]
        config: PathBuf,

        /// Host directory file
        #[arg(long, value_name = "PATH")]
        hosts_file: PathBuf,

        /// Group the host belongs to
        #[arg(long)]
        group: String,

        /// Host to deploy to
        #[arg(long)]
        host: String,
    },

    /// Check a host's deployed executable against the local one
    Verify {
        /// Connection parameters file
        #[arg(long, value_name = "PATH")]
        config: PathBuf,

        /// Host directory file
        #[arg(long, value_name = "PATH")]
        hosts_file: PathBuf,

        /// Group the host belongs to
        #[arg(long)]
        group: String,

        /// Host to verify
        #[arg(long)]
        host: String,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("error: {}", e);
        process::exit(EXIT_FATAL);
    }

    let code = match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {}", e);
            e.exit_code()
        }
    };
    process::exit(code);
}

fn run(command: Command) -> Result<i32> {
    match command {
        Command::Run {
            host,
            port,
            group,
            background,
        } => {
            let mut node = NodeSettings::new(host, port, group);
            if background {
                node = node.background();
            }
            let registry = TaskRegistry::with_builtins();
            let stdin = io::stdin();
            let stdout = io::stdout();
            remote::serve(&mut stdin.lock(), &mut stdout.lock(), &registry, node)?;
            Ok(EXIT_SUCCESS)
        }

        Command::Hosts { hosts_file, group } => {
            let directory = StaticDirectory::load(&hosts_file)?;
            for host in directory.list_hosts(&group)? {
                println!("{}\t{}", host.name, host.address);
            }
            Ok(EXIT_SUCCESS)
        }

        Command::Deploy {
            config,
            hosts_file,
            group,
            host,
        } => {
            let backend = backend_from(&config, &hosts_file, &group)?;
            let target = backend.host(&host)?;
            let size = backend.deploy(&target)?;
            println!("deployed {} bytes to {}", size, target.name);
            Ok(EXIT_SUCCESS)
        }

        Command::Verify {
            config,
            hosts_file,
            group,
            host,
        } => {
            let backend = backend_from(&config, &hosts_file, &group)?;
            let target = backend.host(&host)?;
            if backend.verify(&target)? {
                println!("{}: match", target.name);
                Ok(EXIT_SUCCESS)
            } else {
                println!("{}: mismatch", target.name);
                Ok(EXIT_FAILURE)
            }
        }
    }
}

fn backend_from(config: &Path, hosts_file: &Path, group: &str) -> Result<Backend> {
    let parameters = ConnectionParameters::load(config)?;
    let directory = StaticDirectory::load(hosts_file)?;
    Ok(Backend::new(parameters, group, Arc::new(directory)))
}
