use std::io::Write;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use chat_relay::cli::{Cli, InputCommand, HELP};
use chat_relay::{ChatSession, MessageHistory, SocketIoTransport, User};

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

async fn prompt_username(lines: &mut Lines<BufReader<Stdin>>) -> Result<String> {
    print!("Enter your username: ");
    std::io::stdout().flush()?;
    match lines.next_line().await? {
        Some(name) => Ok(name),
        None => bail!("no username given"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let username = match cli.username.clone() {
        Some(name) => name,
        None => prompt_username(&mut lines).await?,
    };

    let user = User::new(username)?;
    let history = MessageHistory::new();
    let session = ChatSession::new(SocketIoTransport::new(cli.config()), user, history.clone());
    session
        .connect()
        .await
        .context("connecting to chat server")?;
    println!("{HELP}");

    while let Some(line) = lines.next_line().await? {
        match InputCommand::parse(&line) {
            Ok(InputCommand::Say(text)) => {
                session.send_message(&text).await;
            }
            Ok(InputCommand::Direct { recipient, text }) => {
                session.send_private_message(&recipient, &text).await;
            }
            Ok(InputCommand::History) => {
                for message in history.snapshot() {
                    println!("{message}");
                }
            }
            Ok(InputCommand::Help) => println!("{HELP}"),
            Ok(InputCommand::Quit) => break,
            Err(err) => println!("{err}"),
        }
    }

    session.disconnect().await;
    Ok(())
}
