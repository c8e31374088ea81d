use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8080";
const DEFAULT_STATIC_DIR: &str = "static";
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 16 * 1024 * 1024;
const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 300;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
/// `EX_DATAERR` from sysexits.h
pub const DEFAULT_INCOMPATIBLE_EXIT_CODE: i32 = 65;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_bind_address: SocketAddr,
    pub static_dir: PathBuf,
    /// Parent of per-request workspaces. System temp dir when unset.
    pub scratch_root: Option<PathBuf>,
    /// Where materialized archives live until the response is sent. System temp dir when unset.
    pub artifact_dir: Option<PathBuf>,
    pub generator_program: Option<PathBuf>,
    pub generator_args: Vec<String>,
    pub incompatible_exit_code: i32,
    /// `None` disables the bound.
    pub generation_timeout: Option<Duration>,
    pub max_upload_bytes: u64,
    pub graceful_shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_bind_address: default_bind(),
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
            scratch_root: None,
            artifact_dir: None,
            generator_program: None,
            generator_args: Vec::new(),
            incompatible_exit_code: DEFAULT_INCOMPATIBLE_EXIT_CODE,
            generation_timeout: Some(Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SECS)),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            graceful_shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

impl ServerConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            http_bind: cli_http_bind,
            static_dir: cli_static_dir,
            scratch_root: cli_scratch_root,
            artifact_dir: cli_artifact_dir,
            generator: cli_generator,
            generator_args: cli_generator_args,
            incompatible_exit_code: cli_incompatible_exit_code,
            generation_timeout_secs: cli_generation_timeout_secs,
            max_upload_bytes: cli_max_upload_bytes,
            graceful_shutdown_timeout_secs: cli_shutdown_timeout_secs,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            http_bind: file_http_bind,
            static_dir: file_static_dir,
            scratch_root: file_scratch_root,
            artifact_dir: file_artifact_dir,
            generator: file_generator,
            generator_args: file_generator_args,
            incompatible_exit_code: file_incompatible_exit_code,
            generation_timeout_secs: file_generation_timeout_secs,
            max_upload_bytes: file_max_upload_bytes,
            graceful_shutdown_timeout_secs: file_shutdown_timeout_secs,
        } = file_config;

        let http_bind_address = match cli_http_bind.or(file_http_bind) {
            Some(addr) => addr,
            None => DEFAULT_HTTP_BIND
                .parse()
                .context("default bind address invalid")?,
        };

        let generation_timeout_secs = cli_generation_timeout_secs
            .or(file_generation_timeout_secs)
            .unwrap_or(DEFAULT_GENERATION_TIMEOUT_SECS);
        let generation_timeout =
            (generation_timeout_secs > 0).then(|| Duration::from_secs(generation_timeout_secs));

        let max_upload_bytes = cli_max_upload_bytes
            .or(file_max_upload_bytes)
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        anyhow::ensure!(max_upload_bytes > 0, "max upload size must be positive");

        Ok(Self {
            http_bind_address,
            static_dir: cli_static_dir
                .or(file_static_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR)),
            scratch_root: cli_scratch_root.or(file_scratch_root),
            artifact_dir: cli_artifact_dir.or(file_artifact_dir),
            generator_program: cli_generator.or(file_generator),
            generator_args: cli_generator_args
                .or(file_generator_args)
                .unwrap_or_default(),
            incompatible_exit_code: cli_incompatible_exit_code
                .or(file_incompatible_exit_code)
                .unwrap_or(DEFAULT_INCOMPATIBLE_EXIT_CODE),
            generation_timeout,
            max_upload_bytes,
            graceful_shutdown_timeout_secs: cli_shutdown_timeout_secs
                .or(file_shutdown_timeout_secs)
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        })
    }

    /// Fail-fast checks run before the listener is bound.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.generator_program.is_some(),
            "no project generator configured (set --generator or UML_TOOL_GENERATOR)"
        );
        for (label, dir) in [
            ("scratch root", self.scratch_root.as_ref()),
            ("artifact dir", self.artifact_dir.as_ref()),
        ] {
            if let Some(dir) = dir {
                anyhow::ensure!(dir.exists(), "{label} {:?} does not exist", dir);
                anyhow::ensure!(dir.is_dir(), "{label} {:?} is not a directory", dir);
            }
        }
        Ok(())
    }

    /// Directory under which per-request workspaces are created.
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Directory receiving materialized archives.
    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "uml-tool",
    about = "Generate projects from uploaded XMI models",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "UML_TOOL_HTTP_BIND",
        value_name = "ADDR",
        help = "HTTP bind address"
    )]
    pub http_bind: Option<SocketAddr>,

    #[arg(
        long,
        env = "UML_TOOL_STATIC_DIR",
        value_name = "DIR",
        help = "Directory holding the landing page (index.html)"
    )]
    pub static_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "UML_TOOL_SCRATCH_ROOT",
        value_name = "DIR",
        help = "Parent directory for per-request workspaces"
    )]
    pub scratch_root: Option<PathBuf>,

    #[arg(
        long,
        env = "UML_TOOL_ARTIFACT_DIR",
        value_name = "DIR",
        help = "Directory for archives awaiting delivery"
    )]
    pub artifact_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "UML_TOOL_GENERATOR",
        value_name = "PROGRAM",
        help = "Project generator executable, invoked as <PROGRAM> [ARGS..] <input.xmi> <output-dir>"
    )]
    pub generator: Option<PathBuf>,

    #[arg(
        long = "generator-arg",
        env = "UML_TOOL_GENERATOR_ARGS",
        value_name = "ARG",
        value_delimiter = ',',
        help = "Extra arguments passed to the generator before the paths"
    )]
    pub generator_args: Option<Vec<String>>,

    #[arg(
        long,
        env = "UML_TOOL_INCOMPATIBLE_EXIT_CODE",
        value_name = "CODE",
        help = "Generator exit code signalling an incompatible XMI file"
    )]
    pub incompatible_exit_code: Option<i32>,

    #[arg(
        long,
        env = "UML_TOOL_GENERATION_TIMEOUT_SECS",
        value_name = "SECS",
        help = "Upper bound for one generator run (0 disables)"
    )]
    pub generation_timeout_secs: Option<u64>,

    #[arg(
        long,
        env = "UML_TOOL_MAX_UPLOAD_BYTES",
        value_name = "BYTES",
        help = "Largest accepted upload"
    )]
    pub max_upload_bytes: Option<u64>,

    #[arg(
        long,
        env = "UML_TOOL_SHUTDOWN_TIMEOUT_SECS",
        value_name = "SECS",
        help = "Time allowed for in-flight requests after a shutdown signal"
    )]
    pub graceful_shutdown_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    http_bind: Option<SocketAddr>,
    static_dir: Option<PathBuf>,
    scratch_root: Option<PathBuf>,
    artifact_dir: Option<PathBuf>,
    generator: Option<PathBuf>,
    generator_args: Option<Vec<String>>,
    incompatible_exit_code: Option<i32>,
    generation_timeout_secs: Option<u64>,
    max_upload_bytes: Option<u64>,
    graceful_shutdown_timeout_secs: Option<u64>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
