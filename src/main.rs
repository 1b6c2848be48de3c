//! Todo Sync Demo Entry Point
//!
//! Runs a scripted session against the in-memory backend:
//! register, add and complete todos, then sign out.
//!
//! Usage: `todo-sync [config.json]`

use std::path::PathBuf;
use std::sync::Arc;

use todo_sync::{AppContext, ClientConfig, MemoryBackend, Profile, Route};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        let _ = rolling_logger::error(&e);
        eprintln!("todo-sync: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("todo-sync.json"));
    let config = ClientConfig::load_or_default(&config_path).map_err(|e| e.to_string())?;

    rolling_logger::init_logger(config.log_dir(), &config.app_name)?;
    let _ = rolling_logger::info(&format!("Starting with data dir {}", config.data_dir.display()));

    let backend = Arc::new(MemoryBackend::new());
    let ctx = AppContext::from_config(backend, &config);
    let guard = ctx.guard();
    println!("/todos -> {}", guard.resolve("/todos").path());

    if !ctx.session().is_authenticated() {
        let profile = Profile::new("demo@example.com", "demo-password", "Demo");
        ctx.session().register(&profile).await.map_err(|e| e.to_string())?;
    }
    println!("/todos -> {}", guard.resolve(Route::Todos.path()).path());

    let todos = ctx.todos().await.map_err(|e| e.to_string())?;
    for title in ["Buy milk", "  ", "Write report"] {
        todos.create(title).await.map_err(|e| e.to_string())?;
    }

    let first = todos.snapshot().items().first().cloned();
    if let Some(item) = first {
        todos.toggle(&item).await.map_err(|e| e.to_string())?;
    }

    let snapshot = todos.snapshot();
    for item in &snapshot {
        println!("[{}] {}", if item.completed { "x" } else { " " }, item.title);
    }
    println!("{}/{} done", snapshot.completed_count(), snapshot.len());

    ctx.logout().await;
    println!("signed out, list closed: {}", todos.is_closed());
    Ok(())
}
