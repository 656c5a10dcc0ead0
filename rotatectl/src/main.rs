use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rotate_ipc::rotation::DEFAULT_TEAM;
use rotate_ipc::{
    default_hooks_dir, Command, RotationPolicy, RotationState, RoundRobin, Span,
    DEFAULT_ROTATION_FILE,
};
use std::path::{Path, PathBuf};
use std::process::Stdio;

#[derive(Parser)]
#[command(name = "rotatectl")]
#[command(about = "Control the rotation timer", long_about = None)]
#[command(after_help = "Hooks:\n  Place executable scripts in the hooks/ directory next to the rotation file.\n  The 'expire' hook runs when the timer expires or the daemon stops.")]
struct Cli {
    /// Rotation file to operate on
    #[arg(short, long, global = true, default_value = DEFAULT_ROTATION_FILE)]
    file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new rotation file and its hooks directory
    Init {
        /// Team members, in rotation order
        members: Vec<String>,
        /// Length of one turn (M:SS)
        #[arg(short, long, default_value = "5:00")]
        time: Span,
    },
    /// Start the timer daemon in the background
    Start {
        /// Seconds between updates
        #[arg(short, long)]
        interval: Option<u64>,
    },
    /// Pause the running timer
    Pause,
    /// Resume a paused timer
    Resume,
    /// Stop the running timer daemon
    Stop,
    /// Rotate team members without waiting for the timer
    Rotate {
        #[arg(default_value_t = 1)]
        count: usize,
    },
    /// Print the rotation file
    Cat {
        /// Print the parsed rotation as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let file = cli.file.as_path();

    match cli.command {
        Commands::Init { members, time } => {
            let hooks_dir = init(file, members, time).await?;
            println!("Rotation file created: {}", file.display());
            println!("Hooks directory created: {}", hooks_dir.display());
        }
        Commands::Start { interval } => {
            start(file, interval)?;
            println!("Timer daemon started for {}", file.display());
        }
        Commands::Pause => send_command(file, Command::Pause).await?,
        Commands::Resume => send_command(file, Command::Resume).await?,
        Commands::Stop => send_command(file, Command::Stop).await?,
        Commands::Rotate { count } => {
            rotate(file, count, &RoundRobin).await?;
            let times = if count == 1 { "time" } else { "times" };
            println!("Team rotated {} {} in {}", count, times, file.display());
        }
        Commands::Cat { json } => {
            let content = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("Rotation file not found: {}", file.display()))?;
            if json {
                let state = RotationState::decode(&content)?;
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                print!("{}", content);
            }
        }
    }

    Ok(())
}

/// Writes the starting rotation file and creates the hooks directory.
async fn init(file: &Path, members: Vec<String>, time: Span) -> Result<PathBuf> {
    if tokio::fs::try_exists(file).await? {
        bail!("File already exists: {}", file.display());
    }
    for member in &members {
        RotationState::validate_member(member)?;
    }
    if let Some(parent) = file.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let members = if members.is_empty() {
        DEFAULT_TEAM.iter().map(|m| m.to_string()).collect()
    } else {
        members
    };
    let state = RotationState::template(members, time);
    tokio::fs::write(file, state.encode())
        .await
        .with_context(|| format!("Failed to write {}", file.display()))?;

    let hooks_dir = default_hooks_dir(file);
    tokio::fs::create_dir_all(&hooks_dir).await?;
    Ok(hooks_dir)
}

/// Launches `rotated` next to this executable, detached, with its output
/// appended to `<file>.log`.
fn start(file: &Path, interval: Option<u64>) -> Result<()> {
    if !file.exists() {
        bail!("Rotation file not found: {}", file.display());
    }

    let daemon = std::env::current_exe()
        .context("Could not locate rotatectl")?
        .with_file_name(format!("rotated{}", std::env::consts::EXE_SUFFIX));
    let log_path = log_path(file);
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Could not open {}", log_path.display()))?;

    let mut cmd = std::process::Command::new(&daemon);
    cmd.arg(file)
        .stdin(Stdio::null())
        .stdout(log.try_clone()?)
        .stderr(log);
    if let Some(secs) = interval {
        cmd.arg("--interval").arg(secs.to_string());
    }
    cmd.spawn()
        .with_context(|| format!("Error starting daemon {}", daemon.display()))?;
    Ok(())
}

fn log_path(file: &Path) -> PathBuf {
    let mut path = file.as_os_str().to_owned();
    path.push(".log");
    PathBuf::from(path)
}

async fn send_command(file: &Path, command: Command) -> Result<()> {
    rotate_ipc::send(file, command)
        .await
        .with_context(|| format!("Could not send '{}'", command))?;
    println!("Sent '{}' command for {}", command, file.display());
    Ok(())
}

/// Applies `policy` `count` times directly to the file.
async fn rotate(file: &Path, count: usize, policy: &impl RotationPolicy) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Rotation file not found: {}", file.display()))?;
    let mut state = RotationState::decode(&content)?;
    for _ in 0..count {
        state = policy.apply(&state);
    }
    tokio::fs::write(file, state.encode()).await?;
    Ok(())
}
