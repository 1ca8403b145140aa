use std::{process, sync::Arc};

use formella::{
    application::{error::AppError, images::ImageService},
    config,
    domain::identifier::FormulaId,
    infra::{
        cache::ImageCache,
        descriptors::DescriptorStore,
        error::InfraError,
        http::{self, AppState},
        renderer::HttpRenderer,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
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
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, args).await,
    }
}

fn build_image_service(settings: &config::Settings) -> Result<Arc<ImageService>, AppError> {
    let descriptors = DescriptorStore::new(settings.formulas.directory.clone());
    let cache = ImageCache::new(
        settings.cache.directory.clone(),
        settings.cache.preview_slot,
    )
    .map_err(InfraError::from)?;
    let renderer = HttpRenderer::new(
        settings.renderer.endpoint.clone(),
        settings.renderer.timeout,
    )?;

    Ok(Arc::new(ImageService::new(
        descriptors,
        cache,
        Arc::new(renderer),
    )))
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let images = build_image_service(&settings)?;
    let router = http::build_router(AppState { images });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "formella::serve",
        addr = %settings.server.addr,
        formulas = %settings.formulas.directory.display(),
        cache = %settings.cache.directory.display(),
        renderer = %settings.renderer.endpoint,
        "listening"
    );

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn run_render(
    settings: config::Settings,
    args: config::RenderArgs,
) -> Result<(), AppError> {
    let images = build_image_service(&settings)?;

    let id = FormulaId::parse(&args.formula).map_err(|err| AppError::validation(err.to_string()))?;
    let bytes = images.render_fresh(&id).await?;

    tokio::fs::write(&args.output, &bytes)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "formella::render",
        formula = %id,
        output = %args.output.display(),
        image_bytes = bytes.len(),
        "formula rendered"
    );

    Ok(())
}
