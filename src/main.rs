use tracing_subscriber::EnvFilter;

#[rocket::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = agent_broker::rocket().launch().await {
        tracing::error!(error = %err, "rocket shut down with an error");
        std::process::exit(1);
    }
}
