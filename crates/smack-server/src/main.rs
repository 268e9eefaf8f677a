use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::Method;
use axum::routing::{delete, get, post, put};
use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use smack_ai::Mediator;
use smack_api::middleware::require_auth;
use smack_api::{
    apps, auth, bots, channels, commands, kanban, messages, reactions, reminders, users, webhooks,
    AppStateInner,
};
use smack_db::Database;
use smack_gateway::{connection, Hub};
use smack_git::git_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smack=debug,tower_http=debug".into()),
        )
        .init();

    let db_path = std::env::var("DB_PATH").unwrap_or_else(|_| "./smack.db".into());
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".into())
        .parse()?;
    let upload_dir = std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "./uploads".into());
    let apps_dir = std::env::var("SMACK_APPS_DIR").unwrap_or_else(|_| "./apps".into());

    std::fs::create_dir_all(&upload_dir).ok();
    std::fs::create_dir_all(&apps_dir).ok();

    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);

    let hub = Hub::new(db.clone());
    hub.start();

    let mut mediator = Mediator::new(db.clone(), hub.clone());
    bootstrap_openai_bot(&db, &mut mediator)?;
    let mediator = Arc::new(mediator);

    let state = AppStateInner::new(db, hub.clone(), mediator, apps_dir);

    reminders::spawn_scheduler(state.clone());

    let public_routes = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/webhooks/incoming/{id}/{token}", post(webhooks::incoming))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/auth/me", get(auth::me))
        // Channels
        .route("/api/channels", get(channels::list).post(channels::create))
        .route("/api/channels/public", get(channels::list_public))
        .route("/api/channels/muted", get(channels::muted))
        .route("/api/channels/{id}", get(channels::get).put(channels::update))
        .route("/api/channels/{id}/join", post(channels::join))
        .route("/api/channels/{id}/read", post(channels::mark_read))
        .route("/api/channels/{id}/mute", post(channels::mute))
        .route("/api/channels/{id}/unmute", post(channels::unmute))
        .route("/api/channels/{id}/leave", post(channels::leave))
        .route("/api/channels/{id}/clear", post(channels::clear))
        .route("/api/channels/{id}/members", get(channels::members))
        .route("/api/channels/{id}/messages", get(messages::channel_messages))
        .route("/api/dm", post(channels::create_dm))
        // Messages
        .route("/api/messages", post(messages::send))
        .route("/api/messages/{id}", delete(messages::delete))
        .route("/api/messages/{id}/thread", get(messages::thread))
        .route("/api/messages/{id}/reply", post(messages::reply))
        .route("/api/messages/{id}/reactions", get(reactions::for_message))
        .route("/api/tts", post(messages::text_to_speech))
        // Users
        .route("/api/users", get(users::list))
        .route("/api/users/me", get(auth::me).put(users::update_profile))
        .route("/api/users/me/status", put(users::update_status))
        .route("/api/users/{id}", get(users::get))
        // Reminders
        .route("/api/reminders", get(reminders::list).post(reminders::create))
        .route("/api/reminders/{id}", delete(reminders::delete))
        // Bots
        .route("/api/bots", get(bots::list))
        .route("/api/bots/dm", post(bots::create_dm))
        .route("/api/bots/{id}", get(bots::get))
        // Reactions
        .route("/api/reactions", post(reactions::add).delete(reactions::remove))
        // Webhooks (management)
        .route("/api/webhooks", get(webhooks::list).post(webhooks::create))
        .route("/api/webhooks/{id}", get(webhooks::get).delete(webhooks::delete))
        // Kanban boards
        .route("/api/boards", get(kanban::list_boards).post(kanban::create_board))
        .route(
            "/api/boards/{id}",
            get(kanban::get_board)
                .put(kanban::update_board)
                .delete(kanban::delete_board),
        )
        .route(
            "/api/boards/{id}/members",
            get(kanban::board_members).post(kanban::add_board_member),
        )
        .route(
            "/api/boards/{id}/members/{userId}",
            delete(kanban::remove_board_member),
        )
        .route("/api/boards/{id}/columns", post(kanban::create_column))
        .route("/api/boards/{id}/columns/reorder", post(kanban::reorder_columns))
        .route(
            "/api/boards/{id}/labels",
            get(kanban::board_labels).post(kanban::create_label),
        )
        .route("/api/boards/{id}/cards", post(kanban::create_card))
        .route(
            "/api/columns/{id}",
            put(kanban::update_column).delete(kanban::delete_column),
        )
        .route(
            "/api/cards/{id}",
            get(kanban::get_card)
                .put(kanban::update_card)
                .delete(kanban::delete_card),
        )
        .route("/api/cards/{id}/move", post(kanban::move_card))
        .route(
            "/api/cards/{id}/comments",
            get(kanban::card_comments).post(kanban::create_comment),
        )
        .route(
            "/api/labels/{id}",
            put(kanban::update_label).delete(kanban::delete_label),
        )
        .route("/api/comments/{id}", delete(kanban::delete_comment))
        // Apps
        .route("/api/apps", get(apps::list).post(apps::create))
        .route(
            "/api/apps/{id}",
            get(apps::get).put(apps::update).delete(apps::delete),
        )
        .route(
            "/api/apps/{id}/code",
            get(apps::get_code).put(apps::update_code),
        )
        .route("/api/apps/{id}/serve", get(apps::serve))
        .route(
            "/api/apps/{id}/members",
            get(apps::members).post(apps::add_member),
        )
        .route("/api/apps/{id}/members/{userId}", delete(apps::remove_member))
        .route("/api/apps/{id}/query", post(apps::query))
        .route("/api/apps/{id}/chat", post(apps::chat))
        .route("/api/apps/{id}/chat/history", get(apps::chat_history))
        // Custom commands
        .route("/api/commands", get(commands::list).post(commands::create))
        .route(
            "/api/commands/{id}",
            get(commands::get)
                .put(commands::update)
                .delete(commands::delete),
        )
        .route("/api/commands/execute", post(commands::execute))
        .route("/api/commands/ai-generate", post(commands::ai_generate))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/api/ws", get(connection::ws_handler))
        .with_state(hub);

    // Development CORS: wide open, like the rest of the surface expects.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .merge(git_router(state.git.clone()))
        .route("/health", get(|| async { "OK" }))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    info!("Smack server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Materializes the default OpenAI bot: a user row for authorship, the bot
/// configuration, and a registered client. Safe to run on every boot.
fn bootstrap_openai_bot(db: &Database, mediator: &mut Mediator) -> anyhow::Result<()> {
    const BOT_ID: &str = "openai-gpt";
    const BOT_NAME: &str = "openai";
    const DISPLAY_NAME: &str = "ChatGPT";
    const PROVIDER: &str = "openai";
    const MODEL: &str = "gpt-5.2";

    db.create_bot(
        BOT_ID,
        BOT_NAME,
        DISPLAY_NAME,
        "OpenAI's GPT-5.2 language model",
        PROVIDER,
        MODEL,
        "",
    )?;
    mediator.register_client(PROVIDER, MODEL);

    if std::env::var("OPENAI_KEY").unwrap_or_default().is_empty() {
        warn!("OPENAI_KEY not set; the OpenAI bot will fall back to canned replies");
    } else {
        info!("OpenAI bot initialized with model {}", MODEL);
    }

    Ok(())
}
