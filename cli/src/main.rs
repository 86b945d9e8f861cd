use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use mdd_client::config::{ClientConfig, ConfigError, DEFAULT_API_URL, Timeouts};
use mdd_client::error::ApiError;
use mdd_client::net::api::ApiClient;
use mdd_client::net::transport::{HttpTransport, ReqwestTransport};
use mdd_client::net::types::{
    CreateCommentPayload, CreatePostPayload, FeedSort, UpdatePasswordPayload, UpdateUserPayload,
};
use mdd_client::pages::login::LoginForm;
use mdd_client::pages::register::RegisterForm;
use mdd_client::state::session::SessionStore;
use mdd_client::util::guard::{GuardOutcome, resolve_navigation};
use mdd_client::util::validation::FieldErrors;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "mdd-cli", about = "MDD client session and content CLI")]
struct Cli {
    #[arg(long, env = "MDD_API_URL", default_value = DEFAULT_API_URL)]
    base_url: String,

    /// Existing `jwt` cookie value to resume a session.
    #[arg(long, env = "MDD_SESSION_COOKIE")]
    session_token: Option<String>,

    #[arg(long, env = "MDD_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    #[arg(long, env = "MDD_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    connect_timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask the server whether the session is valid.
    Session,
    Login {
        #[arg(long)]
        identifier: String,
        #[arg(long)]
        password: String,
    },
    Register {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Defaults to `--password`.
        #[arg(long)]
        confirm: Option<String>,
    },
    Logout,
    Me,
    UpdateMe {
        #[arg(long)]
        email: String,
        #[arg(long)]
        username: String,
    },
    Password {
        #[arg(long)]
        old: String,
        #[arg(long)]
        new: String,
    },
    Topics(TopicsCommand),
    Feed {
        #[arg(long, default_value = "desc")]
        sort: FeedSort,
        #[arg(long, default_value_t = 0)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        size: u32,
    },
    Post(PostCommand),
    /// Resolve the guard for a client route path.
    Navigate { path: String },
}

#[derive(Args, Debug)]
struct TopicsCommand {
    #[command(subcommand)]
    command: TopicsSubcommand,
}

#[derive(Subcommand, Debug)]
enum TopicsSubcommand {
    List,
    Subscribe { topic_id: i64 },
    Unsubscribe { topic_id: i64 },
    /// Ids of subscribed topics.
    Mine,
}

#[derive(Args, Debug)]
struct PostCommand {
    #[command(subcommand)]
    command: PostSubcommand,
}

#[derive(Subcommand, Debug)]
enum PostSubcommand {
    Get {
        post_id: i64,
    },
    Create {
        #[arg(long)]
        topic: i64,
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
    },
    Comment {
        post_id: i64,
        #[arg(long)]
        content: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::new(&cli.base_url)?;
    config.timeouts = Timeouts { request_secs: cli.timeout_secs, connect_secs: cli.connect_timeout_secs };
    config.session_cookie = cli.session_token.filter(|t| !t.trim().is_empty());
    tracing::debug!(api_url = %config.api_url, resumed = config.session_cookie.is_some(), "client configured");

    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(config)?);
    let store = Arc::new(SessionStore::new(transport));

    match cli.command {
        Command::Session => run_session(&store).await,
        Command::Login { identifier, password } => run_login(&store, identifier, password).await,
        Command::Register { username, email, password, confirm } => {
            let confirm = confirm.unwrap_or_else(|| password.clone());
            run_register(&store, RegisterForm::new(username, email, password, confirm)).await
        }
        Command::Logout => {
            store.logout().await;
            print_json(&json!({ "authenticated": store.is_logged_in() }))
        }
        Command::Me => print_json(&serde_json::to_value(store.api().current_user().await?)?),
        Command::UpdateMe { email, username } => {
            let text = store.api().update_me(&UpdateUserPayload { email, username }).await?;
            print_message(text)
        }
        Command::Password { old, new } => {
            let payload = UpdatePasswordPayload { old_password: old, new_password: new };
            print_message(store.api().update_password(&payload).await?)
        }
        Command::Topics(topics) => run_topics(store.api(), topics).await,
        Command::Feed { sort, page, size } => {
            print_json(&serde_json::to_value(store.api().feed(sort, page, size).await?)?)
        }
        Command::Post(post) => run_post(store.api(), post).await,
        Command::Navigate { path } => {
            let outcome = resolve_navigation(&store, &path).await;
            let rendered = match outcome {
                GuardOutcome::Allow => json!({ "path": path, "outcome": "allow" }),
                GuardOutcome::Redirect(target) => {
                    json!({ "path": path, "outcome": "redirect", "target": target.path() })
                }
            };
            print_json(&rendered)
        }
    }
}

async fn run_session(store: &SessionStore) -> Result<(), CliError> {
    let authenticated = store.check_session().await;
    print_json(&json!({ "authenticated": authenticated }))
}

async fn run_login(store: &Arc<SessionStore>, identifier: String, password: String) -> Result<(), CliError> {
    let mut form = LoginForm::new(identifier, password);
    if form.submit(store).await.is_none() {
        return Err(rejected(form.error, form.field_errors));
    }
    // Printed so it can be passed back as MDD_SESSION_COOKIE.
    let token = store.cookies().get("jwt");
    print_json(&json!({ "authenticated": store.is_logged_in(), "jwt": token }))
}

async fn run_register(store: &SessionStore, mut form: RegisterForm) -> Result<(), CliError> {
    if form.submit(store).await.is_none() {
        return Err(rejected(form.error, form.field_errors));
    }
    print_message(form.success.unwrap_or_default())
}

async fn run_topics(api: &ApiClient, topics: TopicsCommand) -> Result<(), CliError> {
    match topics.command {
        TopicsSubcommand::List => print_json(&serde_json::to_value(api.list_topics().await?)?),
        TopicsSubcommand::Subscribe { topic_id } => print_message(api.subscribe(topic_id).await?),
        TopicsSubcommand::Unsubscribe { topic_id } => print_message(api.unsubscribe(topic_id).await?),
        TopicsSubcommand::Mine => print_json(&serde_json::to_value(api.my_subscriptions().await?)?),
    }
}

async fn run_post(api: &ApiClient, post: PostCommand) -> Result<(), CliError> {
    match post.command {
        PostSubcommand::Get { post_id } => print_json(&serde_json::to_value(api.get_post(post_id).await?)?),
        PostSubcommand::Create { topic, title, content } => {
            let payload = CreatePostPayload { topic_id: topic, title, content };
            print_json(&serde_json::to_value(api.create_post(&payload).await?)?)
        }
        PostSubcommand::Comment { post_id, content } => {
            let comment = api.add_comment(post_id, &CreateCommentPayload { content }).await?;
            print_json(&serde_json::to_value(comment)?)
        }
    }
}

fn rejected(error: Option<String>, fields: FieldErrors) -> CliError {
    let message = error.unwrap_or_else(|| {
        fields
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect::<Vec<_>>()
            .join("; ")
    });
    CliError::Rejected(message)
}

fn print_message(text: String) -> Result<(), CliError> {
    print_json(&json!({ "message": text }))
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
