use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secure_analytics::anonymization::{AnonymizationMapper, ExposedSymbol, SchemaSymbol, Strategy};
use secure_analytics::intent::{Real, SemanticIntent};
use secure_analytics::security::{Role, UserAccessContext};
use secure_analytics::{explain, load_registry, Pipeline, PipelineConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "secure-analytics")]
#[command(about = "Tenant-scoped natural-language analytics over a cube service and SQL store")]
struct Args {
    /// JSON semantic registry (overrides ANALYTICS_REGISTRY_FILE)
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer one question for one user
    Ask {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        user: String,
        /// admin, analyst, nsm, zsm, asm or so
        #[arg(long, default_value = "analyst")]
        role: String,
        #[arg(long)]
        so_code: Option<String>,
        #[arg(long)]
        asm_code: Option<String>,
        #[arg(long)]
        zsm_code: Option<String>,
        #[arg(long)]
        nsm_code: Option<String>,
        question: String,
    },
    /// Print the vocabulary the interpreter would see
    Anonymize {
        /// sequential, category or content_hash
        #[arg(long)]
        strategy: Option<String>,
        /// Also print the anonymous -> real mapping
        #[arg(long)]
        reveal: bool,
    },
    /// Compile a real intent for every backend without running it
    Explain {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "analyst")]
        role: String,
        #[arg(long)]
        so_code: Option<String>,
        #[arg(long)]
        asm_code: Option<String>,
        #[arg(long)]
        zsm_code: Option<String>,
        #[arg(long)]
        nsm_code: Option<String>,
        /// JSON file holding the intent
        intent: PathBuf,
    },
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = PipelineConfig::from_env()?;
    if args.registry.is_some() {
        config.registry_file = args.registry.clone();
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(run(args.command, config))
}

async fn run(command: Command, config: PipelineConfig) -> Result<()> {
    match command {
        Command::Ask {
            tenant,
            user,
            role,
            so_code,
            asm_code,
            zsm_code,
            nsm_code,
            question,
        } => {
            let ctx = user_context(&tenant, &user, &role, so_code, asm_code, zsm_code, nsm_code)?;
            let pipeline = Pipeline::from_config(&config).await?;
            info!("Pipeline ready");

            let result = pipeline.answer(&tenant, &ctx, &question).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Anonymize { strategy, reveal } => {
            let strategy = match strategy {
                Some(s) => s.parse::<Strategy>()?,
                None => config.strategy,
            };
            let registry = load_registry(&config)?;
            let mut mapper = AnonymizationMapper::new(strategy);
            let (anonymized, _) = mapper.anonymize(&SchemaSymbol::from_registry(registry.as_ref()));
            let exposed: Vec<ExposedSymbol> = anonymized.iter().map(|s| s.exposed()).collect();

            println!("{}", serde_json::to_string_pretty(&exposed)?);
            println!("{}", serde_json::to_string_pretty(&mapper.summary())?);
            if reveal {
                println!("{}", serde_json::to_string_pretty(&mapper.export_mapping())?);
            }
        }
        Command::Explain {
            tenant,
            user,
            role,
            so_code,
            asm_code,
            zsm_code,
            nsm_code,
            intent,
        } => {
            let ctx = user_context(&tenant, &user, &role, so_code, asm_code, zsm_code, nsm_code)?;
            let raw = std::fs::read_to_string(&intent)
                .with_context(|| format!("failed to read {}", intent.display()))?;
            let intent: SemanticIntent<Real> = serde_json::from_str(&raw)?;
            let anchor = config
                .as_of
                .unwrap_or_else(|| chrono::Utc::now().date_naive());

            let explanation = explain(load_registry(&config)?, intent, &ctx, anchor)?;
            println!("{}", serde_json::to_string_pretty(&explanation)?);
        }
    }
    Ok(())
}

fn user_context(
    tenant: &str,
    user: &str,
    role: &str,
    so_code: Option<String>,
    asm_code: Option<String>,
    zsm_code: Option<String>,
    nsm_code: Option<String>,
) -> Result<UserAccessContext> {
    let mut ctx = UserAccessContext::new(user, tenant, role.parse::<Role>()?);
    if let Some(code) = so_code {
        ctx = ctx.with_so_code(code);
    }
    if let Some(code) = asm_code {
        ctx = ctx.with_asm_code(code);
    }
    if let Some(code) = zsm_code {
        ctx = ctx.with_zsm_code(code);
    }
    if let Some(code) = nsm_code {
        ctx = ctx.with_nsm_code(code);
    }
    Ok(ctx)
}
