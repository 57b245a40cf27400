//! TaskDeck CLI - command-line front end for the TaskDeck client.
//!
//! # Commands
//!
//! - `taskdeck login | register | logout | refresh | whoami`: Session management
//! - `taskdeck tasks <list|show|create|update|delete>`: Task CRUD
//! - `taskdeck watch`: Stream live task changes from the realtime channel
//!
//! # Environment Variables
//!
//! See the [`config`](taskdeck_client::config) module for available configuration options.

use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use taskdeck_client::{
    ApiClient, Config, ConnectionState, CreateTaskRequest, RealtimeChannel, SessionStore, Task,
    TaskChanges, TaskPriority, TaskQuery, TaskStatus, TaskStore, UpdateTaskRequest,
};

/// How often `watch` checks the store for changes to print.
const WATCH_POLL_MS: u64 = 250;

/// TaskDeck - collaborative task management from the terminal.
#[derive(Parser, Debug)]
#[command(name = "taskdeck")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    TASKDECK_API_URL               REST API base URL (default: http://localhost:3001)
    TASKDECK_WS_URL                Realtime base URL (default: ws://localhost:3001)
    TASKDECK_PAGE_SIZE             Tasks per page (default: 20)
    TASKDECK_REQUEST_TIMEOUT_SECS  HTTP timeout in seconds (default: 30)
    TASKDECK_SESSION_FILE          Session file (default: <data dir>/taskdeck/session.json)

EXAMPLES:
    # Sign in (prompts for the password)
    taskdeck login --email ada@example.com

    # List the tasks of a project
    taskdeck tasks list --project p1

    # Move a task along
    taskdeck tasks update t1 --status in-progress

    # Send it for review and raise its priority
    taskdeck tasks update t1 --status review --priority critical

    # Follow changes made by teammates
    taskdeck watch --project p1 --join t1
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session.
    Login {
        #[arg(short, long)]
        email: String,

        /// Read from stdin when omitted.
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Create an account and sign in.
    Register {
        #[arg(short, long)]
        email: String,

        #[arg(short, long)]
        name: String,

        /// Read from stdin when omitted.
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Sign out and forget the stored session.
    Logout,

    /// Exchange the refresh token for a new token pair.
    Refresh,

    /// Show the signed-in user.
    Whoami,

    /// Task operations.
    Tasks {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// Print task changes as they happen until Ctrl+C.
    Watch {
        /// Only load tasks from this project.
        #[arg(long)]
        project: Option<String>,

        /// Announce presence on these tasks while connected.
        #[arg(long)]
        join: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum TaskCommand {
    /// List tasks, one page at a time.
    List {
        #[arg(long)]
        project: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        /// List tasks assigned to this user instead.
        #[arg(long, conflicts_with_all = ["project", "page"])]
        assignee: Option<String>,
    },

    /// Show one task.
    Show { id: String },

    /// Create a task.
    Create {
        title: String,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        priority: Option<TaskPriority>,
    },

    /// Update a task. The change is shown immediately and rolled back if the server rejects it.
    Update {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        status: Option<TaskStatus>,

        #[arg(long)]
        priority: Option<TaskPriority>,

        #[arg(long)]
        assignee: Option<String>,
    },

    /// Delete a task.
    Delete { id: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    init_logging();

    let config = Config::from_env().context("Failed to load configuration")?;
    let api = ApiClient::from_config(&config).context("Failed to create API client")?;
    let session = SessionStore::restore(api.clone(), config.session_file.clone()).context(format!(
        "Failed to restore session from {}",
        config.session_file.display()
    ))?;
    let store = TaskStore::with_page_size(api, config.page_size);

    info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        authenticated = session.is_authenticated(),
        "Configuration loaded"
    );

    match cli.command {
        Command::Login { email, password } => {
            let password = password_or_prompt(password)?;
            session.login(&email, &password).await.context("Login failed")?;
            print_signed_in(&session);
        }
        Command::Register {
            email,
            name,
            password,
        } => {
            let password = password_or_prompt(password)?;
            session
                .register(&email, &password, &name)
                .await
                .context("Registration failed")?;
            print_signed_in(&session);
        }
        Command::Logout => {
            session.logout().await;
            println!("Signed out.");
        }
        Command::Refresh => {
            require_login(&session)?;
            session.refresh().await.context("Token refresh failed")?;
            println!("Session refreshed.");
        }
        Command::Whoami => {
            require_login(&session)?;
            let user = session.load_profile().await.context("Failed to load profile")?;
            println!("{} <{}> ({})", user.name, user.email, user.id);
        }
        Command::Tasks { command } => {
            require_login(&session)?;
            run_task_command(&store, command).await?;
        }
        Command::Watch { project, join } => {
            require_login(&session)?;
            run_watch(&config, &session, &store, project.as_deref(), &join).await?;
        }
    }

    Ok(())
}

async fn run_task_command(store: &TaskStore, command: TaskCommand) -> Result<()> {
    match command {
        TaskCommand::List {
            project,
            page,
            assignee,
        } => {
            if let Some(assignee) = assignee {
                store
                    .fetch_by_assignee(&assignee)
                    .await
                    .context("Failed to list assigned tasks")?;
            } else {
                let mut query = TaskQuery::first_page(project.as_deref(), store.page_size());
                query.page = page;
                store.fetch_page(query).await.context("Failed to list tasks")?;
            }
            print_tasks(&store.tasks());
        }
        TaskCommand::Show { id } => {
            let task = store.fetch_one(&id).await.context("Failed to load task")?;
            print_task_detail(&task);
        }
        TaskCommand::Create {
            title,
            project,
            description,
            priority,
        } => {
            let mut request = CreateTaskRequest::new(title);
            if let Some(project) = project {
                request = request.with_project(project);
            }
            if let Some(description) = description {
                request = request.with_description(description);
            }
            if let Some(priority) = priority {
                request = request.with_priority(priority);
            }
            let task = store.create(request).await.context("Failed to create task")?;
            println!("Created {}", format_task(&task));
        }
        TaskCommand::Update {
            id,
            title,
            description,
            status,
            priority,
            assignee,
        } => {
            let changes = TaskChanges {
                title,
                description,
                status,
                priority,
                assignee_id: assignee,
                ..TaskChanges::default()
            };
            if changes.is_empty() {
                bail!("Nothing to update. Pass at least one field to change.");
            }

            let base = store.fetch_one(&id).await.context("Failed to load task")?;
            store.apply_optimistic(&id, changes.clone());
            if let Some(task) = store.task(&id) {
                println!("Updating {}", format_task(&task));
            }

            match store.update(&id, UpdateTaskRequest::new(base.version, changes)).await {
                Ok(task) => println!("Updated {}", format_task(&task)),
                Err(e) => {
                    if let Some(task) = store.task(&id) {
                        println!("Rolled back to {}", format_task(&task));
                    }
                    return Err(e).context("Failed to update task");
                }
            }
        }
        TaskCommand::Delete { id } => {
            store.delete(&id).await.context("Failed to delete task")?;
            println!("Deleted {id}");
        }
    }
    Ok(())
}

/// Loads the collection, connects the realtime channel and prints changes until shutdown.
async fn run_watch(
    config: &Config,
    session: &SessionStore,
    store: &TaskStore,
    project: Option<&str>,
    join: &[String],
) -> Result<()> {
    store
        .fetch_all(project)
        .await
        .context("Failed to load tasks")?;
    print_tasks(&store.tasks());

    let channel = RealtimeChannel::new(&config.ws_url, store.clone())
        .context("Failed to create realtime channel")?;
    let handle = channel.handle();
    let mut state_rx = handle.state_updates();
    let channel_task = tokio::spawn(channel.run(session.token_updates()));

    let mut ticker = interval(Duration::from_millis(WATCH_POLL_MS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last = store.tasks();

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    info!("Watching for changes. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                println!("[realtime] {state:?}");
                if state == ConnectionState::Connected {
                    for id in join {
                        handle.join_task(id);
                    }
                }
            }
            _ = ticker.tick() => {
                let current = store.tasks();
                if current != last {
                    print_changes(&last, &current);
                    last = current;
                }
            }
        }
    }

    channel_task.abort();
    info!("Watch stopped");
    Ok(())
}

fn require_login(session: &SessionStore) -> Result<()> {
    if !session.is_authenticated() {
        bail!("Not signed in. Run 'taskdeck login' first.");
    }
    Ok(())
}

fn password_or_prompt(password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }

    print!("Password: ");
    io::stdout().flush().context("Failed to flush stdout")?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("Password cannot be empty");
    }
    Ok(password)
}

fn print_signed_in(session: &SessionStore) {
    match session.user() {
        Some(user) => println!("Signed in as {} <{}>", user.name, user.email),
        None => println!("Signed in."),
    }
}

fn format_task(task: &Task) -> String {
    format!(
        "{:<14} {:<12} {:<7} v{:<4} {}",
        task.id,
        task.status.as_str(),
        task.priority.as_str(),
        task.version,
        task.title
    )
}

fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks.");
        return;
    }
    for task in tasks {
        println!("{}", format_task(task));
    }
}

fn print_task_detail(task: &Task) {
    println!("{}", format_task(task));
    if let Some(description) = &task.description {
        println!("  {description}");
    }
    if let Some(assignee) = &task.assignee_id {
        println!("  assignee: {assignee}");
    }
    if let Some(project) = &task.project_id {
        println!("  project:  {project}");
    }
    if let Some(due) = &task.due_date {
        println!("  due:      {}", due.to_rfc3339());
    }
    if let Some(updated) = &task.updated_at {
        println!("  updated:  {}", updated.to_rfc3339());
    }
}

fn print_changes(before: &[Task], after: &[Task]) {
    let previous: HashMap<&str, &Task> = before.iter().map(|t| (t.id.as_str(), t)).collect();
    let remaining: HashMap<&str, &Task> = after.iter().map(|t| (t.id.as_str(), t)).collect();

    for task in after {
        match previous.get(task.id.as_str()) {
            None => println!("+ {}", format_task(task)),
            Some(old) if *old != task => println!("~ {}", format_task(task)),
            Some(_) => {}
        }
    }
    for task in before {
        if !remaining.contains_key(task.id.as_str()) {
            println!("- {}", format_task(task));
        }
    }
}

/// Initializes the logging subsystem.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(io::stderr)
        .init();
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
