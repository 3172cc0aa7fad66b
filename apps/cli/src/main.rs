use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::parse_server_url, load_settings, ResultsBoard, VoteResult, VotingClient,
};
use shared::domain::{OptionId, SessionId, VotingSession};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "voting", about = "Live audience voting from the terminal")]
struct Cli {
    /// Overrides `server_url` from voting.toml / VOTING_API_URL.
    #[arg(long, global = true)]
    server_url: Option<String>,
    /// Overrides where the login token is kept.
    #[arg(long, global = true)]
    credentials: Option<PathBuf>,
    /// Print machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Email a one-time login code.
    RequestCode { email: String },
    /// Exchange an emailed code for a token.
    VerifyCode { email: String, code: String },
    /// Password login.
    Login { email: String, password: String },
    Logout,
    Whoami,
    /// Show the active session and its options.
    Session,
    /// Vote for an option of the active session.
    Vote { option_id: i64 },
    /// Live results for the active session, or the last session's final results.
    Results {
        /// Keep polling until Ctrl-C.
        #[arg(long)]
        watch: bool,
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    #[command(subcommand)]
    Admin(AdminCommand),
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    Create {
        title: String,
        #[arg(required = true, num_args = 1..)]
        options: Vec<String>,
    },
    Activate { session_id: i64 },
    Close { session_id: i64 },
    Delete { session_id: i64 },
    List,
    Show { session_id: i64 },
    /// Final results of one session.
    Results { session_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings();
    if let Some(server_url) = cli.server_url {
        parse_server_url(&server_url).context("invalid --server-url")?;
        settings.server_url = server_url;
    }
    if let Some(path) = cli.credentials {
        settings.credentials_path = path;
    }
    let client = VotingClient::from_settings(settings).context("failed to build voting client")?;
    let json = cli.json;

    match cli.command {
        Command::RequestCode { email } => {
            client.auth().request_code(&email).await?;
            println!("Login code sent to {}", email.trim());
        }
        Command::VerifyCode { email, code } => {
            let credential = client.auth().verify_code(&email, &code).await?;
            println!("Signed in as {}", credential.email.as_deref().unwrap_or("unknown"));
        }
        Command::Login { email, password } => {
            let credential = client.auth().login(&email, &password).await?;
            println!("Signed in as {}", credential.email.as_deref().unwrap_or("unknown"));
        }
        Command::Logout => {
            client.auth().logout().await?;
            println!("Signed out");
        }
        Command::Whoami => match client.auth().email().await {
            Some(email) if client.auth().is_admin().await => println!("{email} (admin)"),
            Some(email) => println!("{email}"),
            None if client.auth().is_authenticated().await => println!("signed in"),
            None => println!("not signed in"),
        },
        Command::Session => {
            let mut voting = client.voting().await;
            voting.load_session(true).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&voting.session())?);
            } else {
                println!("{}", voting.session_title());
                if let Some(message) = voting.error_message().or(voting.status_message()) {
                    println!("{message}");
                }
                for option in voting.options() {
                    println!("  [{}] {}", option.id, option.label);
                }
            }
        }
        Command::Vote { option_id } => {
            let mut voting = client.voting().await;
            voting.load_session(true).await?;
            if !voting.select_option(OptionId(option_id)) {
                bail!(
                    "{}",
                    voting
                        .error_message()
                        .unwrap_or("That option cannot be selected.")
                );
            }
            voting.submit().await?;
            println!("{}", voting.status_message().unwrap_or("Vote submitted"));
        }
        Command::Results { watch, interval_ms } => {
            if watch {
                let interval = interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(client.settings().poll_interval);
                watch_results(&client, interval, json).await?;
            } else {
                client.poller().refresh().await?;
                print_board(&client.poller().board().await, json)?;
            }
        }
        Command::Admin(command) => run_admin(&client, command, json).await?,
    }

    Ok(())
}

async fn run_admin(client: &VotingClient, command: AdminCommand, json: bool) -> Result<()> {
    let admin = client.admin();
    if !client.auth().is_admin().await {
        tracing::warn!("admin: signed-in identity is not known to be an administrator");
    }
    match command {
        AdminCommand::Create { title, options } => {
            let session = admin.create_session(&title, &options).await?;
            print_sessions(std::slice::from_ref(&session), json)?;
        }
        AdminCommand::Activate { session_id } => {
            println!("{}", admin.activate_session(SessionId(session_id)).await?);
            print_board(&client.poller().board().await, json)?;
            client.poller().stop();
        }
        AdminCommand::Close { session_id } => {
            println!("{}", admin.close_session(SessionId(session_id)).await?);
            print_board(&client.poller().board().await, json)?;
            client.poller().stop();
        }
        AdminCommand::Delete { session_id } => {
            println!("{}", admin.delete_session(SessionId(session_id)).await?);
        }
        AdminCommand::List => {
            let sessions = admin.list_sessions().await?;
            print_sessions(&sessions, json)?;
        }
        AdminCommand::Show { session_id } => {
            match admin.get_session_details(SessionId(session_id)).await? {
                Some(session) => print_sessions(std::slice::from_ref(&session), json)?,
                None => bail!("Session {session_id} not found"),
            }
        }
        AdminCommand::Results { session_id } => {
            let results = admin.final_results(SessionId(session_id)).await?;
            print_results(&results, json)?;
        }
    }
    Ok(())
}

async fn watch_results(client: &VotingClient, interval: Duration, json: bool) -> Result<()> {
    client.poller().start(interval);
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => print_board(&client.poller().board().await, json)?,
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
        }
    }
    client.poller().stop();
    Ok(())
}

fn print_board(board: &ResultsBoard, json: bool) -> Result<()> {
    if let Some(error) = &board.error_message {
        eprintln!("error: {error}");
    }
    let Some(snapshot) = &board.snapshot else {
        if board.is_loading {
            println!("Loading results...");
        } else {
            println!("No results yet.");
        }
        return Ok(());
    };
    if json {
        return print_results(&snapshot.results, true);
    }
    println!("{} ({} votes)", snapshot.heading, snapshot.total_votes);
    print_results(&snapshot.results, false)
}

fn print_results(results: &[VoteResult], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("  (no votes)");
    }
    for result in results {
        println!(
            "  {:>4}%  {:>5}  {}",
            result.percentage, result.votes, result.label
        );
    }
    Ok(())
}

fn print_sessions(sessions: &[VotingSession], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(sessions)?);
        return Ok(());
    }
    for session in sessions {
        let status = session
            .status
            .map(|status| format!("{status:?}").to_ascii_uppercase())
            .unwrap_or_else(|| "ACTIVE".to_string());
        println!("#{} {} [{}]", session.id, session.title, status);
        for option in &session.options {
            println!("    [{}] {}", option.id, option.label);
        }
    }
    Ok(())
}
