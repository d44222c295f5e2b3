use std::path::PathBuf;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use waypoint_client::transfer::plan_upload;
use waypoint_client::{
    ClientConfig, DownloadSpec, JobId, Session, TransferJob, TransferQueue, TransferStatus,
    affects_folder,
};

const DEFAULT_LOG_FILTER: &str = "waypoint_client=info,waypoint_core=info";
const PASSWORD_ENV: &str = "WAYPOINT_PASSWORD";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Login { username: String },
    Logout,
    Ls { path: String },
    Mkdir { path: String },
    Mv { src: String, dst: String, overwrite: bool },
    Rm { path: String, recursive: bool },
    Upload { local: PathBuf, folder: String, overwrite: bool },
    Download { remote: String },
    Watch { folder: String },
    Help,
}

fn parse_cli<I>(args: I) -> anyhow::Result<Command>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let Some(command) = args.next() else {
        return Ok(Command::Help);
    };

    let mut overwrite = false;
    let mut recursive = false;
    let mut positional = Vec::new();
    for arg in args {
        match arg.as_str() {
            "--overwrite" => overwrite = true,
            "--recursive" | "-r" => recursive = true,
            other if other.starts_with("--") => anyhow::bail!("unknown flag: {other}"),
            _ => positional.push(arg),
        }
    }
    if overwrite && !matches!(command.as_str(), "mv" | "upload") {
        anyhow::bail!("--overwrite only applies to mv and upload");
    }
    if recursive && command != "rm" {
        anyhow::bail!("--recursive only applies to rm");
    }

    let mut positional = positional.into_iter();
    let parsed = match command.as_str() {
        "login" => Command::Login {
            username: required_arg(&mut positional, &command, "username")?,
        },
        "logout" => Command::Logout,
        "ls" => Command::Ls {
            path: positional.next().unwrap_or_default(),
        },
        "mkdir" => Command::Mkdir {
            path: required_arg(&mut positional, &command, "path")?,
        },
        "mv" => Command::Mv {
            src: required_arg(&mut positional, &command, "source path")?,
            dst: required_arg(&mut positional, &command, "destination path")?,
            overwrite,
        },
        "rm" => Command::Rm {
            path: required_arg(&mut positional, &command, "path")?,
            recursive,
        },
        "upload" => Command::Upload {
            local: PathBuf::from(required_arg(&mut positional, &command, "local file")?),
            folder: positional.next().unwrap_or_default(),
            overwrite,
        },
        "download" => Command::Download {
            remote: required_arg(&mut positional, &command, "remote path")?,
        },
        "watch" => Command::Watch {
            folder: positional.next().unwrap_or_default(),
        },
        "help" | "--help" | "-h" => Command::Help,
        other => anyhow::bail!("unknown command: {other}"),
    };
    if let Some(extra) = positional.next() {
        anyhow::bail!("unexpected argument: {extra}");
    }
    Ok(parsed)
}

fn required_arg(
    positional: &mut impl Iterator<Item = String>,
    command: &str,
    what: &str,
) -> anyhow::Result<String> {
    positional
        .next()
        .with_context(|| format!("{command}: missing {what}"))
}

fn print_usage() {
    println!("Usage: waypoint <command> [args]");
    println!("  login <username>                     Sign in (password from {PASSWORD_ENV} or stdin)");
    println!("  logout                               Sign out and forget saved tokens");
    println!("  ls [path]                            List a folder");
    println!("  mkdir <path>                         Create a folder (and its parents)");
    println!("  mv <src> <dst> [--overwrite]         Move or rename an entry");
    println!("  rm <path> [--recursive]              Delete an entry");
    println!("  upload <file> [folder] [--overwrite] Upload a local file");
    println!("  download <remote path>               Download into the download directory");
    println!("  watch [folder]                       Print remote changes affecting a folder");
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let command = parse_cli(std::env::args())?;
    if command == Command::Help {
        print_usage();
        return Ok(());
    }
    init_logging();

    let config = ClientConfig::from_env().context("invalid configuration")?;
    let session = Session::open(config).context("failed to open session")?;
    run(&session, command).await
}

async fn run(session: &Session, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Login { username } => {
            let password = read_password().await?;
            session
                .login(&username, &password)
                .await
                .context("login failed")?;
            println!("signed in as {username}");
        }
        Command::Logout => {
            session.logout().await;
            println!("signed out");
        }
        Command::Ls { path } => {
            let listing = session
                .fs()
                .list(&path)
                .await
                .with_context(|| format!("failed to list {path:?}"))?;
            for item in &listing.items {
                let kind = if item.is_dir { 'd' } else { '-' };
                println!("{kind} {:>12} {}", item.size, item.name);
            }
        }
        Command::Mkdir { path } => {
            session.fs().mkdir(&path).await.context("mkdir failed")?;
        }
        Command::Mv {
            src,
            dst,
            overwrite,
        } => {
            session
                .fs()
                .move_entry(&src, &dst, overwrite)
                .await
                .context("move failed")?;
        }
        Command::Rm { path, recursive } => {
            session
                .fs()
                .delete(&path, recursive)
                .await
                .context("delete failed")?;
        }
        Command::Upload {
            local,
            folder,
            overwrite,
        } => {
            let listing = session
                .fs()
                .list(&folder)
                .await
                .with_context(|| format!("failed to list {folder:?}"))?;
            let spec = plan_upload(&listing, &folder, local, overwrite)?;
            let queue = session.transfers();
            let id = queue.enqueue_upload(spec);
            report_outcome(follow_job(&queue, id, interrupted()).await?)?;
        }
        Command::Download { remote } => {
            let queue = session.transfers();
            let id = queue.enqueue_download(DownloadSpec::new(remote));
            report_outcome(follow_job(&queue, id, interrupted()).await?)?;
        }
        Command::Watch { folder } => watch(session, &folder).await?,
        Command::Help => print_usage(),
    }
    Ok(())
}

async fn read_password() -> anyhow::Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    eprint!("password: ");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Resolves on the first Ctrl-C; never resolves if the handler cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Prints progress until the job settles; `interrupt` resolving cancels it.
async fn follow_job<F>(queue: &TransferQueue, id: JobId, interrupt: F) -> anyhow::Result<TransferJob>
where
    F: Future<Output = ()>,
{
    let mut rx = queue.subscribe();
    let mut last_reported = None;
    let mut canceled = false;
    tokio::pin!(interrupt);
    loop {
        let job = rx
            .borrow_and_update()
            .iter()
            .find(|job| job.id == id)
            .cloned()
            .context("transfer disappeared from the queue")?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        if last_reported != Some(job.bytes_transferred) {
            last_reported = Some(job.bytes_transferred);
            match job.bytes_total {
                Some(total) => eprintln!("{}: {}/{} bytes", job.display_name, job.bytes_transferred, total),
                None => eprintln!("{}: {} bytes", job.display_name, job.bytes_transferred),
            }
        }
        tokio::select! {
            changed = rx.changed() => changed.context("transfer queue closed")?,
            _ = &mut interrupt, if !canceled => {
                canceled = true;
                queue.cancel(id);
            }
        }
    }
}

fn report_outcome(job: TransferJob) -> anyhow::Result<()> {
    match job.status {
        TransferStatus::Done => {
            println!("{}: done", job.display_name);
            Ok(())
        }
        TransferStatus::Canceled => {
            println!("{}: canceled", job.display_name);
            Ok(())
        }
        _ => anyhow::bail!(
            "{}: {}",
            job.display_name,
            job.error_message.unwrap_or_else(|| "transfer failed".into())
        ),
    }
}

async fn watch(session: &Session, folder: &str) -> anyhow::Result<()> {
    let mut subscription = session
        .events()
        .connect()
        .await
        .context("failed to connect to the change feed")?;
    let interrupt = interrupted();
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            batch = subscription.next() => match batch {
                Some(paths) if affects_folder(&paths, folder) => {
                    for path in paths {
                        println!("changed: {path}");
                    }
                }
                Some(_) => {}
                None => {
                    eprintln!("change feed closed");
                    return Ok(());
                }
            },
            _ = &mut interrupt => break,
        }
    }
    subscription.close().await;
    Ok(())
}
