use std::{process, sync::Arc};

use sectio::{
    cache::{CacheConfig, CacheEngine, CacheSession, GcReport, RequestContext},
    config::{self, CleanCategoriesArgs, CleanSectionArgs, Command, GcArgs, PurgeVarsArgs},
    domain::types::SectionId,
    infra::{
        error::InfraError,
        flags::{FlagError, StoreFlags},
        telemetry,
    },
};
use thiserror::Error;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Flags(#[from] FlagError),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &CliError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), CliError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let cache_config = CacheConfig::from(&settings);
    if let Command::EnableStore = cli_args.command {
        StoreFlags::enable(cache_config.root())?;
        info!(op = "enable_store", root = %cache_config.root().display(), "Store re-enabled");
        return Ok(());
    }

    let engine = CacheEngine::open(cache_config).await?;
    match cli_args.command {
        Command::CleanSection(args) => run_clean_section(&engine, args).await,
        Command::CleanCategories(args) => run_clean_categories(&engine, args).await,
        Command::PurgeVars(args) => run_purge_vars(&engine, args).await,
        Command::CleanAll => run_clean_all(&engine).await,
        Command::Gc(args) => run_gc(&engine, args),
        Command::EnableStore => Ok(()),
    }
}

async fn admin_session(
    engine: &Arc<CacheEngine>,
    section: SectionId,
    lang: Option<String>,
) -> CacheSession {
    let mut request = RequestContext::admin(section);
    if let Some(lang) = lang {
        request = request.with_language(lang);
    }
    engine.session(request).await
}

async fn run_clean_section(engine: &Arc<CacheEngine>, args: CleanSectionArgs) -> Result<(), CliError> {
    let mut session = admin_session(engine, args.section, args.lang).await;
    let report = session.clean_section(args.section, !args.keep_messages).await;
    session.finish().await;
    println!(
        "section {}: store cleared: {}, memory entries: {}, artifacts: {}, files removed: {}",
        args.section, report.store_cleared, report.memory_entries, report.artifacts, report.files.removed
    );
    Ok(())
}

async fn run_clean_categories(
    engine: &Arc<CacheEngine>,
    args: CleanCategoriesArgs,
) -> Result<(), CliError> {
    let mut session = admin_session(engine, args.section.max(0), args.lang).await;
    session.clean_categories(args.section).await;
    session.finish().await;
    Ok(())
}

async fn run_purge_vars(engine: &Arc<CacheEngine>, args: PurgeVarsArgs) -> Result<(), CliError> {
    let mut session = admin_session(engine, args.section, None).await;
    let artifacts = session.purge_section_vars(args.section).await;
    session.finish().await;
    println!("section {}: list artifacts removed: {artifacts}", args.section);
    Ok(())
}

async fn run_clean_all(engine: &Arc<CacheEngine>) -> Result<(), CliError> {
    let mut session = admin_session(engine, 0, None).await;
    session.clean_all().await;
    session.finish().await;
    println!("all cache tiers cleaned");
    Ok(())
}

fn run_gc(engine: &Arc<CacheEngine>, args: GcArgs) -> Result<(), CliError> {
    let config = engine.config();
    let report = config
        .bundle_paths()
        .chain(std::iter::once(config.tmp_dir()))
        .fold(GcReport::default(), |report, dir| {
            report.merge(engine.gc().collect(&dir, args.force))
        });
    println!(
        "files removed: {}, kept: {}, failed: {}",
        report.removed, report.kept, report.failed
    );
    Ok(())
}
