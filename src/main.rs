use std::{process, sync::Arc};

use pixcache::{
    application::{
        error::AppError,
        normalizer::CommandNormalizer,
        pipeline::{PipelineComponents, PipelineHooks, PipelineOrchestrator},
        sources::{SourceProvider, SourceProviderRegistry},
        transform::ImageTransformer,
    },
    cache::{CacheConfig, CacheStore, PhysicalFileSystemCache},
    config::{self, ProviderSettings, TransformEngine},
    infra::{
        error::InfraError,
        http::{self, HttpState},
        providers::{FileSystemProvider, RemoteProvider},
        telemetry,
        transform::{CliTransformer, PassthroughTransformer},
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
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

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::Serve(_) => {
            telemetry::init(&settings.logging)?;
            run_serve(settings).await
        }
        config::Command::Key(args) => run_key(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let pipeline = build_pipeline(&settings)?;
    let router = http::build_router(HttpState { pipeline });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|source| InfraError::Bind {
            addr: settings.server.addr,
            source,
        })?;

    info!(
        target = "pixcache::serve",
        addr = %settings.server.addr,
        cache_directory = %settings.cache.directory.display(),
        providers = settings.sources.providers.len(),
        "Listening"
    );

    let grace = settings.server.graceful_shutdown;
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    let (drained_tx, drained_rx) = tokio::sync::oneshot::channel::<()>();
    let server = async move {
        let result = server.await;
        let _ = drained_tx.send(());
        result
    };
    let handle = tokio::spawn(server);

    // Once a shutdown is requested, in-flight requests get `grace` to drain.
    tokio::select! {
        _ = drained_rx => {}
        _ = async {
            shutdown_signal().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                target = "pixcache::serve",
                grace_secs = grace.as_secs(),
                "Graceful shutdown timed out; aborting open connections"
            );
            handle.abort();
        }
    }

    match handle.await {
        Ok(result) => result.map_err(|err| AppError::unexpected(format!("server error: {err}"))),
        Err(err) if err.is_cancelled() => Ok(()),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn run_key(settings: config::Settings, args: config::KeyArgs) -> Result<(), AppError> {
    let pipeline = build_pipeline(&settings)?;
    let path = if args.path.starts_with('/') {
        args.path
    } else {
        format!("/{}", args.path)
    };
    let key = pipeline
        .cache_key_for_query(&path, args.query.as_deref())
        .await?;
    println!("{key}");
    Ok(())
}

fn build_pipeline(settings: &config::Settings) -> Result<PipelineOrchestrator, AppError> {
    let providers = settings
        .sources
        .providers
        .iter()
        .map(build_provider)
        .collect::<Result<Vec<_>, _>>()?;

    let cache_config = CacheConfig::from(&settings.cache);
    let cache: Arc<dyn CacheStore> = Arc::new(
        PhysicalFileSystemCache::new(&cache_config.directory, cache_config.folder_depth)
            .map_err(|source| InfraError::CacheDirectory {
                path: cache_config.directory.display().to_string(),
                source,
            })?,
    );

    let transformer: Arc<dyn ImageTransformer> = match settings.transform.engine {
        TransformEngine::Passthrough => Arc::new(PassthroughTransformer),
        TransformEngine::Cli => Arc::new(CliTransformer::new(
            settings.transform.cli_path.clone(),
            settings.transform.cli_args.clone(),
            settings.transform.timeout,
        )),
    };

    let components = PipelineComponents {
        normalizer: CommandNormalizer::new(settings.processors.enabled.iter().copied()),
        sources: SourceProviderRegistry::new(providers),
        cache,
        transformer,
        hooks: PipelineHooks::new(),
    };

    Ok(PipelineOrchestrator::new(components, &cache_config))
}

fn build_provider(settings: &ProviderSettings) -> Result<Arc<dyn SourceProvider>, AppError> {
    match settings {
        ProviderSettings::FileSystem { root } => Ok(Arc::new(FileSystemProvider::new(root))),
        ProviderSettings::Remote {
            prefix,
            base_url,
            timeout,
        } => {
            let provider = RemoteProvider::new(prefix, base_url, *timeout).map_err(|err| {
                InfraError::configuration(format!("remote provider `{prefix}`: {err}"))
            })?;
            Ok(Arc::new(provider))
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(
            target = "pixcache::serve",
            error = %err,
            "Failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
}
