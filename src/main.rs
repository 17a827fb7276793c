use vigil::api_server::{start_server, ApiState};
use vigil::core::oracle::GeminiOracle;
use vigil::core::r#loop::{Collaborators, DecisionLoop, LoopConfig};
use vigil::core::session::{SessionControl, SessionSettings};
use vigil::core::state::{VigilConfig, VIGIL_DIR};
use vigil::io::actuation::CommandDispatcher;
use vigil::io::capture::source_from_config;
use vigil::io::history::{stats, to_csv, JsonlHistory};
use vigil::io::status::{ConsoleSink, Fanout, StatusBoard, StatusSink};

use anyhow::{Context, Result};
use colored::*;
use std::env;
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::from_filename(".env").ok();
    let args: Vec<String> = env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("init") => init_workspace(),
        Some("history") => show_history(
            args.iter().any(|a| a == "--csv"),
            args.iter().any(|a| a == "--clear"),
        ),
        Some("run") | None => run(args.iter().any(|a| a == "--start")).await,
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            eprintln!("Usage: vigil [run [--start] | init | history [--csv | --clear]]");
            std::process::exit(2);
        }
    }
}

async fn run(autostart: bool) -> Result<()> {
    // 1. Initialize State
    let config = VigilConfig::load(&VigilConfig::default_path())?;
    let profiles = config.profile_table();

    let (control, control_rx) = SessionControl::new(SessionSettings {
        running: autostart,
        credential: env::var("GEMINI_API_KEY").ok(),
        profile: config.profile.clone(),
        ..SessionSettings::default()
    });
    if control.settings().credential().is_none() {
        println!("{} GEMINI_API_KEY not set; loop stays idle until a credential is provided.", "⚠️".yellow());
    }

    // 2. Collaborators
    let oracle = GeminiOracle::from_config(&config).context("Failed to build oracle client")?;
    let board = Arc::new(StatusBoard::new());
    let sinks: Vec<Arc<dyn StatusSink>> = vec![Arc::new(ConsoleSink) as Arc<dyn StatusSink>, board.clone()];
    let sink: Arc<dyn StatusSink> = Arc::new(Fanout(sinks));
    let parts = Collaborators {
        source: source_from_config(&config.capture),
        oracle: Arc::new(oracle),
        dispatcher: Arc::new(CommandDispatcher::new(config.actuation.clone())),
        sink,
        history: Arc::new(JsonlHistory::new(config.history_path.clone())),
    };

    // 3. Control Surface
    let api_state = ApiState {
        control: control.clone(),
        board,
        profiles: Arc::new(profiles.clone()),
    };
    let listen = config.listen.clone();
    tokio::spawn(async move {
        if let Err(e) = start_server(api_state, &listen).await {
            eprintln!("{} Control API failed: {:#}", "❌".red(), e);
        }
    });

    // 4. Decision Loop
    println!("{}", "🚀 Vigil online".green().bold());
    println!("   - Model: {}", config.model.cyan());
    println!("   - Tick: {} ms, retry window: {} ms", config.tick_interval_ms, config.retry_window_ms);
    let decision_loop = DecisionLoop::new(LoopConfig::from(&config), profiles, parts, control_rx);
    let loop_task = tokio::spawn(decision_loop.run());

    tokio::signal::ctrl_c().await?;
    println!("{}", "🛑 Shutting down...".yellow());
    control.stop();
    drop(control);
    loop_task.abort();
    Ok(())
}

fn init_workspace() -> Result<()> {
    let config_path = VigilConfig::default_path();
    if config_path.exists() {
        println!("{}", "✅ Vigil is already initialized in this workspace.".green());
        return Ok(());
    }
    VigilConfig::default().save(&config_path)?;

    let gitignore_path = Path::new(".gitignore");
    let mut gitignore = if gitignore_path.exists() {
        std::fs::read_to_string(gitignore_path)?
    } else {
        String::new()
    };
    if !gitignore.contains(VIGIL_DIR) {
        gitignore.push_str(&format!("\n# Vigil Data\n{}/\n", VIGIL_DIR));
        std::fs::write(gitignore_path, gitignore)?;
    }
    println!("{} Wrote {}", "🧬".green(), config_path.display());
    Ok(())
}

fn show_history(csv: bool, clear: bool) -> Result<()> {
    let config = VigilConfig::load(&VigilConfig::default_path())?;
    let history = JsonlHistory::new(config.history_path);
    if clear {
        history.clear()?;
        println!("{} Cleared {}", "🧹".green(), history.path().display());
        return Ok(());
    }
    let records = history.read_all()?;

    if csv {
        print!("{}", to_csv(&records));
        return Ok(());
    }
    if records.is_empty() {
        println!("{}", "📭 No decisions recorded yet.".yellow());
        return Ok(());
    }
    let summary = stats(&records);
    let breakdown = summary
        .by_action
        .iter()
        .map(|(action, n)| format!("{} {}", action, n))
        .collect::<Vec<_>>()
        .join(", ");
    println!(
        "{} {} decisions, {}% played ({})",
        "📊".cyan(),
        summary.total.to_string().bold(),
        summary.played_pct,
        breakdown.dimmed()
    );
    for r in records.iter().take(50) {
        println!(
            "{}  {:<10} {:<12} {}{}",
            r.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            r.action.to_string().bold(),
            r.fingerprint.subject_cards,
            r.fingerprint.context,
            if r.retry { " (retry)".yellow().to_string() } else { String::new() }
        );
    }
    Ok(())
}
