use clap::{Parser, Subcommand};
use mailsieve_lib::config::AppConfig;
use mailsieve_lib::{init_logging, open_database, AppResult, AppState};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[clap(
    name = "mailsieve",
    about = "Mirror a Gmail mailbox into SQLite and apply labeling rules to it",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    /// Verbose logging (overridden by RUST_LOG)
    #[clap(long, global = true)]
    debug: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the database schema and exit
    InitDb,

    /// Backfill or incrementally sync one mailbox
    Sync {
        /// Mailbox owner address
        #[clap(long, env = "MAILSIEVE_EMAIL")]
        email: String,
    },

    /// Apply a rules file to one mailbox's stored mail
    RunRules {
        /// Mailbox owner address
        #[clap(long, env = "MAILSIEVE_EMAIL")]
        email: String,

        /// JSON rules file (`{"rules": [...]}`)
        #[clap(long, env = "MAILSIEVE_RULES_FILE", default_value = "rules.json")]
        rules_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // .env is read before clap so env-backed flags see it
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.debug);

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("mailsieve: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> AppResult<()> {
    let config = AppConfig::from_env()?;
    let db = open_database(&config)?;

    match command {
        Command::InitDb => {
            println!("Database ready at {}", config.db_path.display());
        }
        Command::Sync { email } => {
            let app = AppState::connect(&config, db)?;
            let result = app.sync(&email).await?;
            println!(
                "{}: {} new, {} already stored, {} skipped ({})",
                email,
                result.inserted,
                result.duplicates,
                result.rejected,
                result.phase.as_str()
            );
        }
        Command::RunRules { email, rules_file } => {
            let app = AppState::connect(&config, db)?;
            let report = app.run_rules(&email, &rules_file).await?;
            println!(
                "{}: {} rules, {} local changes, {} remote calls",
                email,
                report.rules.len(),
                report.mutations(),
                report.remote_calls()
            );
        }
    }
    Ok(())
}
