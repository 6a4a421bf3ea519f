//! Command tree for the `mail-console` binary.
//!
//! Each subcommand maps to one screen of the web app; `run` is the live
//! conversation view.

use std::future::Future;
use std::io::Write as _;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::{ArgGroup, Args, Parser, Subcommand};
use shared_types::{Context, ContextRequest, SpamEmail, Task, TaskRequest, UpdateUserRequest};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::ApiClient;
use crate::config::{clear_session_token, store_session_token, Config};
use crate::error::ConsoleError;
use crate::listing::{page_count, paginate, search_spams, sort_contexts, sort_spams, Selection};
use crate::notifications::{attach_messages, NotificationFeed};
use crate::refresh::poll_every;
use crate::session::{RunSession, SubmitOutcome};
use crate::transport::TransportEvent;
use crate::view;

#[derive(Parser, Debug)]
#[command(name = "mail-console", author, version, about, long_about = None)]
pub struct Cli {
    /// Origin of the mail-assistant web app (overrides MAIL_CONSOLE_BASE_URL)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage assistant tasks
    #[command(subcommand)]
    Tasks(TaskCommand),

    /// Manage rule sets
    #[command(subcommand)]
    Contexts(ContextCommand),

    /// Review emails flagged as cold outreach
    #[command(subcommand)]
    Spam(SpamCommand),

    /// Task notifications
    #[command(subcommand)]
    Messages(MessageCommand),

    /// Account settings
    #[command(subcommand)]
    Me(MeCommand),

    /// Show where to sign in and optionally store the issued token
    Signin {
        /// Session token copied from the browser's jwt-token cookie
        #[arg(long)]
        token: Option<String>,
    },

    /// Forget the stored session token
    Signout,

    /// Show unread notifications
    Notifications {
        /// Keep polling until interrupted
        #[arg(long)]
        watch: bool,
    },

    /// Open the live conversation for a task
    Run {
        task_id: String,
    },
}

#[derive(Args, Debug, Clone, Copy)]
pub struct PageArgs {
    /// Zero-based page index
    #[arg(long, default_value_t = 0)]
    pub page: usize,

    #[arg(long, default_value_t = 10)]
    pub per_page: usize,

    /// Reprint the list every MAIL_CONSOLE_POLL_INTERVAL_SECS until interrupted
    #[arg(long)]
    pub watch: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DeleteArgs {
    /// Ids to delete
    pub ids: Vec<String>,

    /// Select every listed row
    #[arg(long, conflicts_with = "ids")]
    pub all: bool,

    /// Leave this id out of an `--all` selection; repeatable
    #[arg(long, requires = "all")]
    pub except: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    List {
        #[command(flatten)]
        page: PageArgs,
    },
    Show {
        id: String,
    },
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: String,
        /// Extra free-text instructions
        #[arg(long, default_value = "")]
        context: String,
        /// Rule set to attach; repeatable
        #[arg(long = "context-id")]
        context_ids: Vec<String>,
    },
    Delete(DeleteArgs),
    /// Replace a task's extra context and rule sets
    SetContext {
        id: String,
        #[arg(long, default_value = "")]
        context: String,
        #[arg(long = "context-id")]
        context_ids: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ContextCommand {
    List {
        #[command(flatten)]
        page: PageArgs,
    },
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        content: String,
    },
    Update {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        content: String,
    },
    Delete(DeleteArgs),
}

#[derive(Subcommand, Debug)]
pub enum SpamCommand {
    List {
        #[command(flatten)]
        page: PageArgs,
        /// Only emails whose subject contains this text, ignoring case
        #[arg(long)]
        search: Option<String>,
    },
    Show {
        id: String,
    },
    Delete(DeleteArgs),
    /// Return a falsely flagged email to the inbox
    MoveBack {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum MessageCommand {
    List {
        /// Only notifications for this task
        #[arg(long)]
        task: Option<String>,
    },
    /// Mark a notification as read
    Read {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum MeCommand {
    Show,
    /// Turn the mail subscription on or off
    #[command(group(ArgGroup::new("state").required(true).args(["enable", "disable"])))]
    Subscription {
        #[arg(long)]
        enable: bool,
        #[arg(long)]
        disable: bool,
    },
    /// Turn cold-email screening on or off
    #[command(group(ArgGroup::new("state").required(true).args(["on", "off"])))]
    SpamCheck {
        #[arg(long)]
        on: bool,
        #[arg(long)]
        off: bool,
    },
}

pub async fn dispatch(cli: Cli, mut config: Config) -> Result<()> {
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    let api = ApiClient::from_config(&config)?;

    match cli.command {
        Command::Tasks(cmd) => tasks(&api, &config, cmd).await,
        Command::Contexts(cmd) => contexts(&api, &config, cmd).await,
        Command::Spam(cmd) => spam(&api, &config, cmd).await,
        Command::Messages(cmd) => messages(&api, cmd).await,
        Command::Me(cmd) => me(&api, cmd).await,
        Command::Signin { token } => signin(&api, &config, token).await,
        Command::Signout => signout(&config),
        Command::Notifications { watch } => notifications(api, &config, watch).await,
        Command::Run { task_id } => run(&api, &config, &task_id).await,
    }
}

/// Build the bulk-delete selection from explicit ids or `--all` over `listed`.
///
/// Like the list screens, an empty selection is refused.
fn require_selection(
    args: DeleteArgs,
    listed: &[String],
    what: &str,
) -> Result<Selection<String>> {
    let mut selection = Selection::new();
    if args.all {
        selection.select_all(listed);
        for id in &args.except {
            selection.deselect_one(id);
        }
    } else {
        for id in args.ids {
            selection.select_one(id);
        }
    }
    if selection.is_empty() {
        return Err(ConsoleError::InvalidInput(format!(
            "Must select at least one {what} to delete"
        ))
        .into());
    }
    Ok(selection)
}

/// Ids of every row when `--all` is given; nothing is fetched otherwise.
async fn listed_ids<T, Fut>(
    args: &DeleteArgs,
    fetch: Fut,
    id: impl Fn(&T) -> String,
) -> Result<Vec<String>>
where
    Fut: Future<Output = crate::error::Result<Vec<T>>>,
{
    if !args.all {
        return Ok(Vec::new());
    }
    Ok(fetch.await?.iter().map(id).collect())
}

/// Print `fetch`'s rows once, or on every poll tick until ctrl-c in watch mode.
async fn show_list<T, F, Fut>(
    interval: Duration,
    page: PageArgs,
    mut fetch: F,
    render: impl Fn(&[T]) -> String,
) -> Result<()>
where
    T: Send + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = crate::error::Result<Vec<T>>> + Send + 'static,
{
    if !page.watch {
        let rows = fetch().await?;
        print_page(&rows, page, &render);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(4);
    let poller = tokio::spawn(poll_every(interval, tx, cancel.clone(), fetch));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            rows = rx.recv() => {
                let Some(rows) = rows else { break };
                println!("-- refreshed {} --", Utc::now().format("%H:%M:%S"));
                print_page(&rows, page, &render);
            }
        }
    }

    cancel.cancel();
    let _ = poller.await;
    Ok(())
}

async fn fetch_tasks(api: ApiClient) -> crate::error::Result<Vec<Task>> {
    let mut tasks = api.list_tasks().await?;
    let messages = api.list_messages(None).await?;
    attach_messages(&mut tasks, &messages);
    Ok(tasks)
}

async fn fetch_contexts(api: ApiClient) -> crate::error::Result<Vec<Context>> {
    let mut contexts = api.list_contexts().await?;
    sort_contexts(&mut contexts);
    Ok(contexts)
}

async fn fetch_spams(api: ApiClient, search: String) -> crate::error::Result<Vec<SpamEmail>> {
    let mut spams = search_spams(api.list_spams().await?, &search);
    sort_spams(&mut spams);
    Ok(spams)
}

fn print_page<T>(rows: &[T], page: PageArgs, render: impl Fn(&[T]) -> String) {
    let shown = paginate(rows, page.page, page.per_page);
    print!("{}", render(shown));
    println!(
        "page {} of {} ({} total)",
        page.page + 1,
        page_count(rows.len(), page.per_page),
        rows.len()
    );
}

async fn tasks(api: &ApiClient, config: &Config, cmd: TaskCommand) -> Result<()> {
    match cmd {
        TaskCommand::List { page } => {
            let api = api.clone();
            show_list(
                config.poll_interval,
                page,
                move || fetch_tasks(api.clone()),
                view::render_tasks,
            )
            .await?;
        }
        TaskCommand::Show { id } => {
            let mut task = api.get_task(&id).await?;
            let messages = api.list_messages(Some(&id)).await?;
            attach_messages(std::slice::from_mut(&mut task), &messages);
            let contexts = api.list_contexts().await?;
            print!("{}", view::render_task(&task, &contexts));
        }
        TaskCommand::Create {
            name,
            description,
            context,
            context_ids,
        } => {
            let task = api
                .create_task(&TaskRequest {
                    name,
                    description,
                    context,
                    context_ids,
                })
                .await?;
            info!(task_id = %task.id, "task created");
            println!("Created task {} ({})", task.name, task.id);
        }
        TaskCommand::Delete(args) => {
            let listed = listed_ids(&args, api.list_tasks(), |t: &Task| t.id.clone()).await?;
            let selection = require_selection(args, &listed, "task")?;
            println!("Deleting {} task(s)", selection.len());
            for id in selection.iter() {
                api.delete_task(id).await?;
                println!("Deleted task {id}");
            }
        }
        TaskCommand::SetContext {
            id,
            context,
            context_ids,
        } => {
            let task = api.get_task(&id).await?;
            api.update_task(
                &id,
                &TaskRequest {
                    name: task.name,
                    description: task.description,
                    context,
                    context_ids,
                },
            )
            .await?;
            println!("Updated context for task {id}");
        }
    }
    Ok(())
}

async fn contexts(api: &ApiClient, config: &Config, cmd: ContextCommand) -> Result<()> {
    match cmd {
        ContextCommand::List { page } => {
            let api = api.clone();
            show_list(
                config.poll_interval,
                page,
                move || fetch_contexts(api.clone()),
                view::render_contexts,
            )
            .await?;
        }
        ContextCommand::Create {
            name,
            description,
            content,
        } => {
            let context = api
                .create_context(&ContextRequest {
                    name,
                    description,
                    content,
                })
                .await?;
            println!("Created rule set {} ({})", context.name, context.id);
        }
        ContextCommand::Update {
            id,
            name,
            description,
            content,
        } => {
            api.update_context(
                &id,
                &ContextRequest {
                    name,
                    description,
                    content,
                },
            )
            .await?;
            println!("Updated rule set {id}");
        }
        ContextCommand::Delete(args) => {
            let listed = listed_ids(&args, api.list_contexts(), |c: &Context| c.id.clone()).await?;
            let selection = require_selection(args, &listed, "rule set")?;
            println!("Deleting {} rule set(s)", selection.len());
            for id in selection.iter() {
                api.delete_context(id).await?;
                println!("Deleted rule set {id}");
            }
        }
    }
    Ok(())
}

async fn spam(api: &ApiClient, config: &Config, cmd: SpamCommand) -> Result<()> {
    match cmd {
        SpamCommand::List { page, search } => {
            let api = api.clone();
            let search = search.unwrap_or_default();
            show_list(
                config.poll_interval,
                page,
                move || fetch_spams(api.clone(), search.clone()),
                |rows| view::render_spams(rows, Utc::now()),
            )
            .await?;
        }
        SpamCommand::Show { id } => {
            let spams = api.list_spams().await?;
            let spam = spams
                .iter()
                .find(|s| s.id == id)
                .ok_or_else(|| ConsoleError::InvalidInput(format!("no flagged email with id {id}")))?;
            print!("{}", view::render_spam(spam));
        }
        SpamCommand::Delete(args) => {
            let listed = listed_ids(&args, api.list_spams(), |s: &SpamEmail| s.id.clone()).await?;
            let selection = require_selection(args, &listed, "email")?;
            println!("Deleting {} email(s)", selection.len());
            for id in selection.iter() {
                api.delete_spam(id).await?;
                println!("Deleted {id}");
            }
        }
        SpamCommand::MoveBack { id } => {
            api.move_spam_back(&id).await?;
            println!("Moved {id} back to the inbox");
        }
    }
    Ok(())
}

async fn messages(api: &ApiClient, cmd: MessageCommand) -> Result<()> {
    match cmd {
        MessageCommand::List { task } => {
            let messages = api.list_messages(task.as_deref()).await?;
            print!("{}", view::render_notifications(&messages, Utc::now()));
        }
        MessageCommand::Read { id } => {
            api.mark_message_read(&id).await?;
            println!("Marked {id} as read");
        }
    }
    Ok(())
}

async fn me(api: &ApiClient, cmd: MeCommand) -> Result<()> {
    match cmd {
        MeCommand::Show => {
            let user = api.me().await?;
            print!("{}", view::render_user(&user));
        }
        MeCommand::Subscription { enable, .. } => {
            api.update_me(&UpdateUserRequest {
                subscription_disabled: Some(!enable),
                check_spam: None,
            })
            .await?;
            println!(
                "Mail subscription {}",
                if enable { "enabled" } else { "disabled" }
            );
        }
        MeCommand::SpamCheck { on, .. } => {
            api.update_me(&UpdateUserRequest {
                subscription_disabled: None,
                check_spam: Some(on),
            })
            .await?;
            println!("Cold-email screening {}", if on { "on" } else { "off" });
        }
    }
    Ok(())
}

async fn signin(api: &ApiClient, config: &Config, token: Option<String>) -> Result<()> {
    match token.filter(|t| !t.trim().is_empty()) {
        Some(token) => {
            store_session_token(&config.session_file, &token)?;
            println!("Session stored in {}", config.session_file.display());
        }
        None => {
            let target = api.login_redirect().await?;
            println!("Sign in with Microsoft at:\n  {target}");
            println!(
                "Then run `mail-console signin --token <jwt-token cookie value>`"
            );
        }
    }
    Ok(())
}

fn signout(config: &Config) -> Result<()> {
    if clear_session_token(&config.session_file)? {
        println!("Signed out");
    } else {
        println!("No stored session");
    }
    Ok(())
}

async fn notifications(api: ApiClient, config: &Config, watch: bool) -> Result<()> {
    let mut feed = NotificationFeed::new(api, config.notification_poll_interval);
    if !watch {
        let snapshot = feed.refresh().await?;
        println!("{} unread", snapshot.unread_count());
        print!("{}", view::render_notifications(&snapshot.unread, Utc::now()));
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(4);
    let poller = tokio::spawn(feed.watch(tx, cancel.clone()));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            snapshot = rx.recv() => {
                let Some(snapshot) = snapshot else { break };
                println!("{} unread", snapshot.unread_count());
                print!("{}", view::render_notifications(&snapshot.unread, Utc::now()));
            }
        }
    }

    cancel.cancel();
    let _ = poller.await;
    Ok(())
}

const RUN_HELP: &str = "Type a message and press enter. /trace shows tool calls, /quit leaves.";

async fn run(api: &ApiClient, config: &Config, task_id: &str) -> Result<()> {
    let mut session = RunSession::start(api, task_id, config.reconnect).await?;
    println!("{}  {}", session.task().name, session.task().description);
    println!("{RUN_HELP}\n");
    redraw(&session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "/quit" => break,
                    "/trace" => print_trace(&session),
                    _ => {
                        if session.submit(&line) != SubmitOutcome::Ignored {
                            redraw(&session);
                        }
                    }
                }
            }
            event = session.next_event() => {
                let Some(event) = event else { break };
                let stopped = event == TransportEvent::GaveUp;
                if session.handle_event(event) {
                    redraw(&session);
                }
                if stopped {
                    break;
                }
            }
        }
    }

    session.close().await;
    Ok(())
}

fn redraw(session: &RunSession) {
    let mut stdout = std::io::stdout().lock();
    let _ = write!(stdout, "\x1b[2J\x1b[H{}\n\n", view::render_transcript(session.transcript()));
    let _ = stdout.flush();
}

fn print_trace(session: &RunSession) {
    let calls = session
        .transcript()
        .bot_messages()
        .filter_map(|m| m.calls.as_ref())
        .last();
    match calls {
        Some(calls) => println!("{}\n", view::render_call_tree(calls)),
        None => println!("No tool calls yet\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_task_create() {
        let cli = Cli::try_parse_from([
            "mail-console",
            "tasks",
            "create",
            "--name",
            "Triage",
            "--description",
            "Sort vendor mail",
            "--context-id",
            "a",
            "--context-id",
            "b",
        ])
        .unwrap();
        match cli.command {
            Command::Tasks(TaskCommand::Create { context_ids, context, .. }) => {
                assert_eq!(context_ids, vec!["a", "b"]);
                assert_eq!(context, "");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_subscription_needs_a_state() {
        assert!(Cli::try_parse_from(["mail-console", "me", "subscription"]).is_err());
        assert!(
            Cli::try_parse_from(["mail-console", "me", "subscription", "--enable", "--disable"])
                .is_err()
        );
        assert!(Cli::try_parse_from(["mail-console", "me", "subscription", "--disable"]).is_ok());
    }

    #[test]
    fn test_global_base_url() {
        let cli =
            Cli::try_parse_from(["mail-console", "run", "t1", "--base-url", "https://x.test"])
                .unwrap();
        assert_eq!(cli.base_url.as_deref(), Some("https://x.test"));
    }

    fn ids(selection: &Selection<String>) -> Vec<&str> {
        selection.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_delete_requires_selection() {
        let err = require_selection(DeleteArgs::default(), &[], "task").unwrap_err();
        assert!(err
            .to_string()
            .contains("Must select at least one task to delete"));

        let args = DeleteArgs {
            ids: vec!["b".into(), "a".into(), "a".into()],
            ..Default::default()
        };
        assert_eq!(ids(&require_selection(args, &[], "task").unwrap()), vec!["a", "b"]);
    }

    #[test]
    fn test_delete_all_except() {
        let cli = Cli::try_parse_from([
            "mail-console", "spam", "delete", "--all", "--except", "s2",
        ])
        .unwrap();
        let Command::Spam(SpamCommand::Delete(args)) = cli.command else {
            panic!("unexpected command");
        };
        let listed = vec!["s1".to_string(), "s2".to_string(), "s3".to_string()];
        let selection = require_selection(args, &listed, "email").unwrap();
        assert_eq!(ids(&selection), vec!["s1", "s3"]);

        let everything_excepted = DeleteArgs {
            all: true,
            except: vec!["s1".into()],
            ..Default::default()
        };
        assert!(require_selection(everything_excepted, &listed[..1], "email").is_err());
    }

    #[test]
    fn test_delete_flags_conflict() {
        assert!(Cli::try_parse_from(["mail-console", "tasks", "delete", "t1", "--all"]).is_err());
        assert!(Cli::try_parse_from(["mail-console", "tasks", "delete", "--except", "t1"]).is_err());
    }

    #[test]
    fn test_list_watch_and_search_flags() {
        let cli = Cli::try_parse_from([
            "mail-console", "spam", "list", "--watch", "--search", "seo",
        ])
        .unwrap();
        match cli.command {
            Command::Spam(SpamCommand::List { page, search }) => {
                assert!(page.watch);
                assert_eq!(search.as_deref(), Some("seo"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
