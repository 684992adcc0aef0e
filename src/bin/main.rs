use std::{
    collections::HashMap,
    env,
    error::Error,
    fs,
    path::{self, Path},
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use beatprobe::{
    cli::{Cli, Commands, parse_args},
    config::{ProbeConfig, load_config},
    error::RenderError,
    probe::{LivenessProbe, template_vars},
    template,
};

fn main() -> ExitCode {
    let args = parse_args();
    init_logging(&args);

    match dispatch(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(args: Cli) -> Result<(), Box<dyn Error>> {
    match args.command {
        Commands::Run {
            config,
            vars,
            timeout,
            keep,
            json,
        } => {
            let mut config = load_config(&config)?;
            if let Some(timeout) = timeout {
                config.readiness.timeout = timeout;
            }
            run_probe(config, vars.into_iter().collect(), keep, json)?;
        }
        Commands::Render {
            config,
            vars,
            output,
        } => {
            let config = load_config(&config)?;
            render_only(config, vars.into_iter().collect(), output.as_deref())?;
        }
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_probe(
    config: ProbeConfig,
    vars: HashMap<String, String>,
    keep: bool,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    let interrupted = Arc::new(AtomicBool::new(false));
    register_signal_handler(interrupted.clone())?;

    let mut probe = LivenessProbe::new(config)?.with_cancel(interrupted);
    if keep {
        probe.keep_working_dir();
        info!("Keeping working directory {:?}", probe.working_dir());
    }

    let report = probe.run(&vars)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "PASS {} (pid {}) ready after {}ms, exited with code {}",
            report.beat, report.pid, report.ready_after_ms, report.exit_code
        );
    }

    Ok(())
}

/// Renders the beat config without launching anything.
///
/// `{{ working_dir }}` points at the configured working directory, else the
/// output file's directory, else the current directory. No temporary directory
/// is created.
fn render_only(
    config: ProbeConfig,
    vars: HashMap<String, String>,
    output: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let working_dir = match (&config.working_dir, output) {
        (Some(dir), _) => config.resolve(dir),
        (None, Some(path)) => path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf(),
        (None, None) => env::current_dir()?,
    };
    let working_dir = path::absolute(working_dir)?;
    info!("Rendering with working_dir {:?}", working_dir);

    let vars = template_vars(&config, &working_dir, &vars)?;
    let template_path = config.resolve(&config.template);

    match output {
        Some(path) => {
            let rendered = template::render_file(&template_path, path, &vars)?;
            println!("{}", rendered.display());
        }
        None => {
            let text =
                fs::read_to_string(&template_path).map_err(|source| RenderError::ReadError {
                    path: template_path.clone(),
                    source,
                })?;
            print!("{}", template::render_str(&text, &vars)?);
        }
    }

    Ok(())
}

fn register_signal_handler(flag: Arc<AtomicBool>) -> Result<(), Box<dyn Error>> {
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            warn!("Second interrupt; exiting immediately");
            std::process::exit(130);
        }
        warn!("Interrupted; stopping beat...");
    })?;

    Ok(())
}
