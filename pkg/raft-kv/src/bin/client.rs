//! The `raft-client` binary: submits a single `SET`/`GET`/`DEL` command to
//! whichever node is addressed, following at most a handful of redirect
//! hints until it lands on the current leader.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpStream;

use raft_kv::kv::{Command, CommandResult};
use raft_kv::protocol::ClientResponse;
use raft_kv::wire::{read_frame, write_frame};

#[derive(Parser, Debug)]
#[command(name = "raft-client")]
struct Args {
    /// Address (host:port) of any node's client port to start from.
    #[arg(long)]
    connect: String,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    Set { key: String, value: String },
    Get { key: String },
    Del { key: String },
}

const MAX_REDIRECTS: u32 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let command = match args.command {
        CliCommand::Set { key, value } => Command::Set { key, value },
        CliCommand::Get { key } => Command::Get { key },
        CliCommand::Del { key } => Command::Delete { key },
    };

    let mut addr = args.connect;
    for _ in 0..MAX_REDIRECTS {
        let mut stream = TcpStream::connect(&addr).await.with_context(|| format!("connecting to {addr}"))?;
        write_frame(&mut stream, &command).await?;
        match read_frame(&mut stream).await? {
            ClientResponse::Applied(result) => {
                print_result(result);
                return Ok(());
            }
            ClientResponse::Redirect(Some(next)) => {
                eprintln!("redirected to {next}");
                addr = next;
            }
            ClientResponse::Redirect(None) => {
                bail!("{addr} is not the leader and gave no redirect hint");
            }
        }
    }

    bail!("gave up after {MAX_REDIRECTS} redirects")
}

fn print_result(result: CommandResult) {
    match result {
        CommandResult::Ok => println!("OK"),
        CommandResult::Value(Some(value)) => println!("{value}"),
        CommandResult::Value(None) => println!("(nil)"),
    }
}
