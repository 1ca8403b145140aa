//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{
    Args, Parser, Subcommand, ValueHint,
    builder::BoolishValueParser,
};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "formella";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_FORMULA_DIR: &str = "formulas";
const DEFAULT_CACHE_DIR: &str = "cache";
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 10;

/// Command-line arguments for the formella binary.
#[derive(Debug, Parser)]
#[command(name = "formella", version, about = "Formula image rendering and caching server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FORMELLA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Render a stored formula once and write the PNG to a file.
    Render(RenderArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub pipeline: PipelineOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the cache directory.
    #[arg(long = "cache-directory", value_name = "PATH")]
    pub cache_directory: Option<PathBuf>,

    /// Override the preview slot mode (shared|per-request).
    #[arg(long = "cache-preview-slot", value_name = "MODE")]
    pub cache_preview_slot: Option<String>,
}

/// Overrides shared by `serve` and `render`.
#[derive(Debug, Args, Default, Clone)]
pub struct PipelineOverrides {
    /// Override the formula descriptor directory.
    #[arg(long = "formulas-directory", value_name = "PATH")]
    pub formulas_directory: Option<PathBuf>,

    /// Override the rendering endpoint URL.
    #[arg(long = "renderer-endpoint", value_name = "URL")]
    pub renderer_endpoint: Option<String>,

    /// Override the rendering call timeout.
    #[arg(long = "renderer-timeout-seconds", value_name = "SECONDS")]
    pub renderer_timeout_seconds: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: PipelineOverrides,

    /// Identifier of the stored formula to render.
    #[arg(value_name = "FORMULA")]
    pub formula: String,

    /// Path of the PNG file to write.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub formulas: FormulaSettings,
    pub cache: CacheSettings,
    pub renderer: RendererSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct FormulaSettings {
    pub directory: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub directory: PathBuf,
    pub preview_slot: PreviewSlot,
}

/// How inline-preview renders are written to disk. The shared slot matches
/// the historical single-file behavior and its last-writer-wins race;
/// per-request slots trade disk churn for isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewSlot {
    Shared,
    PerRequest,
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub endpoint: Url,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("FORMELLA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => raw.apply_pipeline_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    formulas: RawFormulaSettings,
    cache: RawCacheSettings,
    renderer: RawRendererSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(directory) = overrides.cache_directory.as_ref() {
            self.cache.directory = Some(directory.clone());
        }
        if let Some(slot) = overrides.cache_preview_slot.as_ref() {
            self.cache.preview_slot = Some(slot.clone());
        }

        self.apply_pipeline_overrides(&overrides.pipeline);
    }

    fn apply_pipeline_overrides(&mut self, overrides: &PipelineOverrides) {
        if let Some(directory) = overrides.formulas_directory.as_ref() {
            self.formulas.directory = Some(directory.clone());
        }
        if let Some(endpoint) = overrides.renderer_endpoint.as_ref() {
            self.renderer.endpoint = Some(endpoint.clone());
        }
        if let Some(seconds) = overrides.renderer_timeout_seconds {
            self.renderer.timeout_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            formulas,
            cache,
            renderer,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let formulas = build_formula_settings(formulas)?;
        let cache = build_cache_settings(cache)?;
        let renderer = build_renderer_settings(renderer)?;

        Ok(Self {
            server,
            logging,
            formulas,
            cache,
            renderer,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings { addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_formula_settings(formulas: RawFormulaSettings) -> Result<FormulaSettings, LoadError> {
    let directory = formulas
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_FORMULA_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "formulas.directory",
            "path must not be empty",
        ));
    }

    Ok(FormulaSettings { directory })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let directory = cache
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "cache.directory",
            "path must not be empty",
        ));
    }

    let preview_slot = match cache.preview_slot.as_deref() {
        None | Some("shared") => PreviewSlot::Shared,
        Some("per-request") => PreviewSlot::PerRequest,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.preview_slot",
                format!("expected `shared` or `per-request`, got `{other}`"),
            ));
        }
    };

    Ok(CacheSettings {
        directory,
        preview_slot,
    })
}

fn build_renderer_settings(renderer: RawRendererSettings) -> Result<RendererSettings, LoadError> {
    let endpoint = renderer
        .endpoint
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| LoadError::invalid("renderer.endpoint", "must be configured"))?;
    let endpoint = Url::parse(endpoint)
        .map_err(|err| LoadError::invalid("renderer.endpoint", format!("invalid URL: {err}")))?;

    let timeout_seconds = renderer
        .timeout_seconds
        .unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS);
    if timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "renderer.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(RendererSettings {
        endpoint,
        timeout: Duration::from_secs(timeout_seconds),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFormulaSettings {
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    directory: Option<PathBuf>,
    preview_slot: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRendererSettings {
    endpoint: Option<String>,
    timeout_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_with_endpoint() -> RawSettings {
        let mut raw = RawSettings::default();
        raw.renderer.endpoint = Some("http://127.0.0.1:8090/render".to_string());
        raw
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = raw_with_endpoint();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());

        let overrides = ServeOverrides {
            server_port: Some(4321),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    }

    #[test]
    fn renderer_endpoint_is_required() {
        let raw = RawSettings::default();
        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid {
                key: "renderer.endpoint",
                ..
            })
        ));
    }

    #[test]
    fn directories_default_when_unset() {
        let settings = Settings::from_raw(raw_with_endpoint()).expect("valid settings");
        assert_eq!(settings.formulas.directory, PathBuf::from(DEFAULT_FORMULA_DIR));
        assert_eq!(settings.cache.directory, PathBuf::from(DEFAULT_CACHE_DIR));
    }

    #[test]
    fn preview_slot_defaults_to_shared_and_parses_per_request() {
        let settings = Settings::from_raw(raw_with_endpoint()).expect("valid settings");
        assert_eq!(settings.cache.preview_slot, PreviewSlot::Shared);

        let mut raw = raw_with_endpoint();
        raw.cache.preview_slot = Some("per-request".to_string());
        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.cache.preview_slot, PreviewSlot::PerRequest);

        let mut raw = raw_with_endpoint();
        raw.cache.preview_slot = Some("elsewhere".to_string());
        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid {
                key: "cache.preview_slot",
                ..
            })
        ));
    }

    #[test]
    fn renderer_timeout_rejects_zero() {
        let mut raw = raw_with_endpoint();
        raw.renderer.timeout_seconds = Some(0);
        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid {
                key: "renderer.timeout_seconds",
                ..
            })
        ));
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = raw_with_endpoint();
        let overrides = ServeOverrides {
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["formella"]);
        let command = args
            .command
            .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
        assert!(matches!(command, Command::Serve(_)));
    }

    #[test]
    fn parse_render_arguments() {
        let args = CliArgs::parse_from([
            "formella",
            "render",
            "--renderer-endpoint",
            "http://render.internal/png",
            "--output",
            "/tmp/eq1.png",
            "eq1",
        ]);

        match args.command.expect("render command") {
            Command::Render(render) => {
                assert_eq!(render.formula, "eq1");
                assert_eq!(render.output, std::path::Path::new("/tmp/eq1.png"));
                assert_eq!(
                    render.overrides.renderer_endpoint.as_deref(),
                    Some("http://render.internal/png")
                );
            }
            _ => panic!("wrong command parsed"),
        }
    }
}
