pub mod admin_policy;
pub mod auth;
pub mod config;
pub mod coordinator;
pub mod cross_project_router;
pub mod error;
pub mod events;
pub mod gc;
pub mod guards;
pub mod meeting_service;
pub mod models;
pub mod negotiator;
pub mod project_registry;
pub mod protocol_registry;
pub mod reply_transport;
pub mod router;
pub mod routes;
pub mod session_manager;
pub mod stats;
pub mod store;
pub mod task_service;

use std::sync::Arc;

use rocket_cors::CorsOptions;

use admin_policy::AdminPolicy;
use auth::AuthService;
use config::Config;
use coordinator::DiscussionCoordinator;
use cross_project_router::CrossProjectRouter;
use events::EventBus;
use meeting_service::{MeetingService, SqliteMeetingStore};
use negotiator::Negotiator;
use project_registry::{ProjectRegistry, SqliteProjectStore};
use protocol_registry::ProtocolRegistry;
use reply_transport::HttpReplyTransport;
use router::Router;
use session_manager::SessionManager;
use store::SqliteStore;
use task_service::{SqliteTaskStore, TaskService};

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    let config = Config::from_env();
    rocket_with_db(&config.database_path)
}

pub fn rocket_with_db(db_path: &str) -> rocket::Rocket<rocket::Build> {
    let config = Config::from_env();
    rocket_with_db_and_config(db_path, config)
}

pub fn rocket_with_db_and_config(db_path: &str, config: Config) -> rocket::Rocket<rocket::Build> {
    let mut config = config;
    config.database_path = db_path.to_string();
    build_rocket(config)
}

fn build_rocket(config: Config) -> rocket::Rocket<rocket::Build> {
    if config.database_path != ":memory:" {
        if let Some(parent) = std::path::Path::new(&config.database_path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let sqlite = Arc::new(if config.database_path == ":memory:" {
        SqliteStore::in_memory()
    } else {
        SqliteStore::new(&config.database_path)
    });
    let store: Arc<dyn store::Store> = sqlite.clone();

    let projects = Arc::new(ProjectRegistry::new(Box::new(SqliteProjectStore::new(sqlite.clone()))));
    if let Err(err) = projects.ensure_seed_project(&config.seed_project_id) {
        tracing::warn!(error = %err, "failed to provision seed project");
    }

    let policy = Arc::new(AdminPolicy::new(projects.clone(), config.permission_cache_ttl));

    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        projects.clone(),
        config.queue_capacity,
        config.queue_warning_ratio,
        config.stale_threshold,
        config.disconnect_threshold,
    ));

    let protocols = Arc::new(ProtocolRegistry::new(store.clone(), projects.clone()));
    let negotiator = Arc::new(Negotiator::new());
    let router = Arc::new(Router::new(sessions.clone(), projects.clone()));
    let cross_project_router = Arc::new(CrossProjectRouter::new(
        router.clone(),
        sessions.clone(),
        policy.clone(),
        config.cross_project_rate_window,
    ));

    let auth = Arc::new(AuthService::new(
        config.jwt_secret.clone(),
        config.jwt_access_ttl,
        config.jwt_refresh_ttl,
    ));
    if let Err(err) = auth.ensure_admin_user(&config.admin_username, &config.admin_password) {
        tracing::warn!(error = %err, "failed to provision admin user");
    }

    let meetings = Arc::new(MeetingService::new(Box::new(SqliteMeetingStore::new(sqlite.clone()))));
    let tasks = Arc::new(TaskService::new(Box::new(SqliteTaskStore::new(sqlite.clone())), auth.clone()));
    let events = Arc::new(EventBus::new());
    let transport = Arc::new(HttpReplyTransport::new());
    let coordinator = Arc::new(DiscussionCoordinator::new(
        meetings.clone(),
        events.clone(),
        transport.clone() as Arc<dyn coordinator::ReplyTransport>,
        config.max_discussion_rounds,
        config.reply_timeout,
        config.consensus_threshold,
    ));

    let cors = CorsOptions::default().to_cors().expect("Failed to create CORS");
    let gc_sessions = sessions.clone();

    rocket::build()
        .manage(config)
        .manage(projects)
        .manage(policy)
        .manage(sessions)
        .manage(protocols)
        .manage(negotiator)
        .manage(router)
        .manage(cross_project_router)
        .manage(auth)
        .manage(meetings)
        .manage(tasks)
        .manage(events)
        .manage(transport)
        .manage(coordinator)
        .attach(cors)
        .register(
            "/",
            rocket::catchers![routes::not_found, routes::too_many_requests, routes::default_catcher],
        )
        .mount(
            "/",
            rocket::routes![
                routes::project::create_project,
                routes::project::list_projects,
                routes::project::get_project,
                routes::project::update_project,
                routes::project::delete_project,
                routes::project::rotate_keys,
                routes::protocol::register,
                routes::protocol::discover,
                routes::protocol::get_protocol,
                routes::protocol::delete_protocol,
                routes::protocol::share,
                routes::protocol::unshare,
                routes::session::create,
                routes::session::list,
                routes::session::get,
                routes::session::heartbeat,
                routes::session::dequeue,
                routes::session::disconnect,
                routes::message::send,
                routes::message::broadcast,
                routes::message::cross_project_send,
                routes::message::negotiate,
                routes::message::compatibility_matrix,
                routes::meeting::create,
                routes::meeting::get,
                routes::meeting::add_participant,
                routes::meeting::start,
                routes::meeting::messages,
                routes::meeting::decisions,
                routes::meeting::submit_opinion,
                routes::meeting::submit_vote,
                routes::meeting::events_ws,
                routes::auth::register,
                routes::auth::login,
                routes::auth::refresh,
                routes::auth::logout,
                routes::auth::register_agent,
                routes::system::health,
                routes::system::stats,
                routes::task::create,
                routes::task::list,
                routes::task::get,
                routes::task::update,
                routes::task::delete,
                routes::task::assign,
                routes::task::unassign,
                routes::task::set_status,
                routes::task::add_dependency,
                routes::task::remove_dependency,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff("Session GC", move |_rocket| {
            Box::pin(async move {
                gc::spawn_session_gc(gc_sessions);
                println!("session gc sweep started");
            })
        }))
}
