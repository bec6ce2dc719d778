// Statement Forensics - Web Server
// REST API with Axum

use anyhow::{Context, Result};
use statement_forensics::api::{router, AppState};
use statement_forensics::{logging, open_database, ForensicsConfig};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    println!("🌐 Statement Forensics - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = ForensicsConfig::from_env()?;

    let conn = open_database(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    println!("✓ Database opened: {}", config.database_path.display());

    let addr = config.server_addr.clone();
    let app = router(AppState::new(conn, config));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/health", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("server stopped")?;
    Ok(())
}
