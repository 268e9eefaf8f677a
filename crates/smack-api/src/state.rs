use std::sync::Arc;
use std::time::Duration;

use smack_ai::Mediator;
use smack_db::appdb::AppStores;
use smack_db::Database;
use smack_gateway::Hub;
use smack_git::GitState;

/// Outbound command requests time out after this long.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub hub: Hub,
    pub mediator: Arc<Mediator>,
    pub app_stores: AppStores,
    pub git: GitState,
    /// Shared client for custom-command execution.
    pub http: reqwest::Client,
}

impl AppStateInner {
    pub fn new(
        db: Arc<Database>,
        hub: Hub,
        mediator: Arc<Mediator>,
        apps_dir: impl Into<std::path::PathBuf>,
    ) -> AppState {
        let apps_dir = apps_dir.into();
        let http = reqwest::Client::builder()
            .timeout(COMMAND_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");

        Arc::new(Self {
            app_stores: AppStores::new(apps_dir.clone()),
            git: GitState::new(db.clone(), hub.clone(), apps_dir),
            db,
            hub,
            mediator,
            http,
        })
    }
}
