//! pyrun CLI
//!
//! Runs a piece of Python code once and prints the JSON result on stdout.
//! Logs go to stderr.

use clap::{Parser, Subcommand};
use pyrun::config::{self, Config, ExecutionEnv};
use pyrun::sandbox::{
    create_executor, shared_engine, EnvironmentProbe, ExecutionRequest, PythonVersion,
    SystemProbe,
};
use pyrun::{Error, Result, VERSION};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pyrun",
    author = "pyrun Contributors",
    version = VERSION,
    about = "Run Python code once, on the host or in a disposable container",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $PYRUN_CONFIG or the user config dir)
    #[arg(long, global = true, env = "PYRUN_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute code and print the result as JSON
    Run {
        /// Code to execute (reads --file or stdin when omitted)
        #[arg(long, short, conflicts_with = "file")]
        code: Option<String>,

        /// Read the code from a file
        #[arg(long, short)]
        file: Option<PathBuf>,

        /// Requirements file, one specifier per line
        #[arg(long, short = 'r')]
        requirements: Option<PathBuf>,

        /// Extra requirement specifier (repeatable)
        #[arg(long = "package", short = 'p')]
        packages: Vec<String>,

        /// Timeout in seconds
        #[arg(long, short)]
        timeout: Option<u64>,

        /// Execution environment (host or container)
        #[arg(long, short)]
        env: Option<ExecutionEnv>,

        /// Interpreter version for the host path (e.g. 3.11)
        #[arg(long)]
        python: Option<PythonVersion>,

        /// Leave stdout/stderr out of successful host results
        #[arg(long)]
        no_capture: bool,

        /// Pretty-print the result
        #[arg(long)]
        pretty: bool,
    },

    /// Validate configuration and report what this machine supports
    Check,

    /// Write a default configuration file
    InitConfig {
        /// Destination (defaults to the config path)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match cli.command {
        Commands::Run {
            code,
            file,
            requirements,
            packages,
            timeout,
            env,
            python,
            no_capture,
            pretty,
        } => {
            let mut config = load(cli.config.as_deref())?;
            if let Some(env) = env {
                config.execution_env = env;
            }

            let code = read_code(code, file.as_deref())?;
            let mut specs = match requirements {
                Some(path) => pyrun::sandbox::parse_requirements(&std::fs::read_to_string(path)?),
                None => Vec::new(),
            };
            specs.extend(packages);

            let request = ExecutionRequest::new(code)
                .with_requirements(specs)
                .with_timeout_secs(timeout.unwrap_or(config.default_timeout_secs))
                .with_python_version(python.unwrap_or(config.host.python_version))
                .with_capture_output(!no_capture);

            run(&config, request, pretty).await
        }
        Commands::Check => check(cli.config.as_deref()).await,
        Commands::InitConfig { path, force } => init_config(path, force),
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pyrun=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            let mut config = config::load_config_from_path(path)?;
            config::apply_env_overrides(&mut config);
            Ok(config)
        }
        None => config::load_config(),
    }
}

fn read_code(code: Option<String>, file: Option<&Path>) -> Result<String> {
    if let Some(code) = code {
        return Ok(code);
    }
    if let Some(file) = file {
        return Ok(std::fs::read_to_string(file)?);
    }
    let mut code = String::new();
    std::io::stdin().read_to_string(&mut code)?;
    Ok(code)
}

async fn run(config: &Config, request: ExecutionRequest, pretty: bool) -> Result<()> {
    debug!("Executing with {} executor", config.execution_env);

    let outcome = match create_executor(config).await {
        Ok(executor) => executor.execute(request).await,
        Err(e) => Err(e),
    };

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            std::process::exit(2);
        }
    };

    let rendered = if pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{}", rendered);

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn check(path: Option<&Path>) -> Result<()> {
    let config = load(path)?;

    println!("pyrun {}", VERSION);
    println!("Execution environment: {}", config.execution_env);

    let validation = config::validate_config(&config);
    for issue in &validation.errors {
        println!("  error: {}", issue);
    }
    for issue in &validation.warnings {
        println!("  warning: {}", issue);
    }

    let probe = SystemProbe::new();
    println!("Running inside a container: {}", probe.is_containerized());

    let version = config.host.python_version;
    match version.candidates().into_iter().find_map(|n| probe.find_executable(n)) {
        Some(python) => println!("Python ({}): {}", version, python.display()),
        None => println!("Python ({}): not found", version),
    }
    match ["pip3", "pip"].into_iter().find_map(|n| probe.find_executable(n)) {
        Some(pip) => println!("pip: {}", pip.display()),
        None => println!("pip: not found"),
    }

    match tokio::time::timeout(Duration::from_secs(5), shared_engine()).await {
        Ok(Ok(_)) => println!("Docker: reachable"),
        Ok(Err(e)) => println!("Docker: {}", e),
        Err(_) => println!("Docker: no answer within 5 seconds"),
    }

    if !validation.valid {
        return Err(Error::Config("configuration has errors".to_string()));
    }
    Ok(())
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = path.unwrap_or_else(config::config_path);
    if path.exists() && !force {
        return Err(Error::Config(format!(
            "{} already exists; pass --force to overwrite",
            path.display()
        )));
    }

    config::save_config(&Config::default(), &path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
