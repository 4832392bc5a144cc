use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use forgery_core::{models_present, BackendKind, DocumentAnalyzer};
use forgery_store::Store;
use forgeryd::config::Config;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "forgery", about = "Document forgery detection CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check configuration, models, database and storage
    Check,
    /// Analyse an image locally and print the result as JSON
    Analyze {
        /// Image to analyse
        image: PathBuf,
        /// Directory for ELA, ROI and heatmap artifacts
        #[arg(short, long, default_value = "forgery-out")]
        out: PathBuf,
        /// Inference backend: auto, onnx or mock
        #[arg(short, long)]
        backend: Option<BackendKind>,
    },
    /// Manage user accounts
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Inspect or record model training metrics
    Metrics {
        #[command(subcommand)]
        command: MetricsCommands,
    },
    /// Print a user's upload and prediction history
    History {
        email: String,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Create a user
    Add {
        email: String,
        #[arg(short, long)]
        password: String,
        /// Grant admin privileges
        #[arg(long)]
        admin: bool,
    },
    /// Show a user by email
    Show { email: String },
}

#[derive(Subcommand)]
enum MetricsCommands {
    /// List recorded model runs, newest first
    List,
    /// Record the result of an offline training run
    Record {
        #[arg(long)]
        name: String,
        #[arg(long)]
        version: String,
        #[arg(long)]
        accuracy: f64,
        #[arg(long)]
        f1: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Check => check(&config).await?,
        Commands::Analyze { image, out, backend } => {
            analyze(&config, image, out, backend.unwrap_or(config.inference)).await?
        }
        Commands::User { command } => {
            let store = open_store(&config).await?;
            match command {
                UserCommands::Add { email, password, admin } => {
                    let hash = forgeryd::auth::hash_password(&password)?;
                    let user = store.create_user(&email, &hash, admin).await?;
                    println!("{}", serde_json::to_string_pretty(&user)?);
                }
                UserCommands::Show { email } => {
                    let user = store
                        .get_user_by_email(&email)
                        .await?
                        .with_context(|| format!("no user with email {email}"))?;
                    println!("{}", serde_json::to_string_pretty(&user)?);
                }
            }
        }
        Commands::Metrics { command } => {
            let store = open_store(&config).await?;
            match command {
                MetricsCommands::List => {
                    let metrics = store.get_model_metrics().await?;
                    if metrics.is_empty() {
                        println!("No model runs recorded");
                    }
                    for m in metrics {
                        println!(
                            "{:<16} {:<12} accuracy={:.4} f1={:.4}",
                            m.name, m.version, m.accuracy, m.f1_score
                        );
                    }
                }
                MetricsCommands::Record { name, version, accuracy, f1 } => {
                    let metric = store
                        .create_model_metric(&name, &version, accuracy, f1, forgery_store::now_secs())
                        .await?;
                    println!("Recorded {} {} ({})", metric.name, metric.version, metric.id);
                }
            }
        }
        Commands::History { email } => {
            let store = open_store(&config).await?;
            let user = store
                .get_user_by_email(&email)
                .await?
                .with_context(|| format!("no user with email {email}"))?;
            let history = store.get_history_by_user(&user.id).await?;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
    }

    Ok(())
}

async fn open_store(config: &Config) -> Result<Store> {
    Store::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open database {}", config.db_path.display()))
}

fn check_writable(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let marker = dir.join(".forgery-write-check");
    std::fs::write(&marker, b"ok")?;
    std::fs::remove_file(&marker)?;
    Ok(())
}

fn status(ok: bool) -> &'static str {
    if ok { "ok" } else { "FAIL" }
}

async fn check(config: &Config) -> Result<()> {
    println!("bind:          {}", config.bind);
    println!("storage dir:   {}", config.storage_dir.display());
    println!("database:      {}", config.db_path.display());
    println!("model dir:     {}", config.model_dir.display());
    println!("inference:     {}", config.inference);
    println!("serve /files:  {}", config.serve_files);
    println!(
        "train command: {}",
        config.train_command.as_deref().unwrap_or("(not configured)")
    );
    if config.uses_insecure_secret() {
        println!("WARNING: FORGERY_SECRET_KEY is the insecure development default");
    }
    println!();

    let mut failures = 0;

    let classifiers = models_present(&config.model_dir);
    println!(
        "[{}] classifier models ({}, {})",
        if classifiers { "ok" } else { "--" },
        config.densenet_model_path().display(),
        config.mobilenet_model_path().display()
    );
    if !classifiers && config.inference == BackendKind::Onnx {
        failures += 1;
        println!("      inference=onnx requires both classifier models");
    }
    println!(
        "[{}] face detector ({})",
        if config.face_model_path().exists() { "ok" } else { "--" },
        config.face_model_path().display()
    );

    let db = open_store(config).await;
    println!("[{}] database", status(db.is_ok()));
    if let Err(e) = db {
        failures += 1;
        println!("      {e:#}");
    }

    let storage = check_writable(&config.storage_dir);
    println!("[{}] storage writable", status(storage.is_ok()));
    if let Err(e) = storage {
        failures += 1;
        println!("      {e:#}");
    }

    if failures > 0 {
        bail!("{failures} check(s) failed");
    }
    Ok(())
}

async fn analyze(config: &Config, image: PathBuf, out: PathBuf, backend: BackendKind) -> Result<()> {
    if !image.exists() {
        bail!("image not found: {}", image.display());
    }
    let model_dir = config.model_dir.clone();
    let seed = config.mock_seed;
    let upload_id = uuid::Uuid::new_v4().to_string();

    let analysis = tokio::task::spawn_blocking(move || -> Result<_> {
        let mut analyzer = DocumentAnalyzer::load(backend, &model_dir, out, seed)?;
        tracing::info!(backend = analyzer.backend_name(), image = %image.display(), "analysing");
        Ok(analyzer.analyze(&image, &upload_id)?)
    })
    .await??;

    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}
