use danzin::app::TerminalApp;
use danzin::settings::state::SettingsStore;
use tracing_subscriber::{EnvFilter, fmt};

/// Terminal entry point.
///
/// Logs go to stderr so they never interleave with the transcript on stdout.
#[tokio::main]
async fn main() {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let settings = SettingsStore::load();
    tracing::info!(path = ?settings.config_path(), "loaded settings");

    let app = TerminalApp::new(settings, danzin_llm::create_backend());
    if let Err(error) = app.run().await {
        tracing::error!(error = %error, "terminal session ended with an error");
        std::process::exit(1);
    }
}
