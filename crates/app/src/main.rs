use std::{path::PathBuf, sync::Arc, thread, time::Duration};

use clap::{Args, Parser, Subcommand};
use light_sync_core::{
    effects::{custom, PaletteName},
    AppConfig, AudioSync, CustomEffect, EffectEngine, EffectKind, GeneratorConfig, LightSink,
    LightSyncError, MemorySink, StartOutcome, SyncStrategy, TargetSelector,
};
use tracing_subscriber::EnvFilter;

fn main() -> light_sync_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Devices => run_devices(),
        Commands::Effect { kind, params } => {
            let kind: EffectKind = kind.parse()?;
            let lights = params.lights;
            run_effect(&config, kind, params.into_config(None)?, lights)
        }
        Commands::Custom {
            file,
            template,
            params,
        } => {
            let program = load_program(file.as_ref(), template.as_deref())?;
            let report = program.validate();
            for warning in &report.warnings {
                tracing::warn!(program = %program.name, "{warning}");
            }
            if !report.valid() {
                return Err(LightSyncError::msg(format!(
                    "program `{}` is invalid: {}",
                    program.name,
                    report.issues.join("; ")
                )));
            }
            let lights = params.lights;
            run_effect(&config, EffectKind::Custom, params.into_config(Some(program))?, lights)
        }
        Commands::Templates => run_templates(),
        Commands::Sync {
            device,
            strategy,
            sensitivity,
            seconds,
            lights,
        } => run_sync(&config, device, strategy.parse()?, sensitivity, seconds, lights),
    }
}

fn run_devices() -> light_sync_core::Result<()> {
    let devices = light_sync_core::default_backend().list_input_devices()?;
    println!("{}", serde_json::to_string_pretty(&devices)?);
    Ok(())
}

fn run_templates() -> light_sync_core::Result<()> {
    for program in custom::templates() {
        let report = program.validate();
        println!(
            "{:<16} {:>6.1}s  {}",
            program.name, report.total_duration_secs, program.description
        );
    }
    Ok(())
}

fn run_effect(
    config: &AppConfig,
    kind: EffectKind,
    params: GeneratorConfig,
    lights: usize,
) -> light_sync_core::Result<()> {
    let sink = Arc::new(MemorySink::with_lights(lights));
    let engine = EffectEngine::new(sink.clone(), config.safety.clone());

    let outcome = engine.start(kind, params)?;
    tracing::info!(effect = %outcome.id(), kind = %kind, "running effect");
    match outcome {
        StartOutcome::Started(task) => task.join()?,
        StartOutcome::AlreadyRunning(id) => {
            return Err(LightSyncError::msg(format!("`{id}` is already running")))
        }
    }

    let commands = sink.commands()?;
    tracing::info!(commands = commands.len(), "effect finished");
    println!("{}", serde_json::to_string_pretty(&sink.snapshot()?)?);
    Ok(())
}

fn run_sync(
    config: &AppConfig,
    device: Option<usize>,
    strategy: SyncStrategy,
    sensitivity: f32,
    seconds: u64,
    lights: usize,
) -> light_sync_core::Result<()> {
    let sink = Arc::new(MemorySink::with_lights(lights));
    let engine = EffectEngine::new(sink.clone(), config.safety.clone());
    let sync = AudioSync::new(engine, light_sync_core::default_backend(), config);

    let id = sync.start_sync(device, strategy, sensitivity)?;
    tracing::info!(effect = %id, seconds, "audio sync running");
    thread::sleep(Duration::from_secs(seconds));

    let status = sync.status()?;
    sync.stop_sync()?;
    tracing::info!(commands = sink.commands()?.len(), "audio sync finished");
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn load_program(
    file: Option<&PathBuf>,
    template: Option<&str>,
) -> light_sync_core::Result<CustomEffect> {
    match (file, template) {
        (Some(path), _) => {
            let raw = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        (None, Some(name)) => custom::template(name)
            .ok_or_else(|| LightSyncError::msg(format!("unknown template `{name}`"))),
        (None, None) => Err(LightSyncError::msg("pass --file or --template")),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Lighting effects and live audio sync", long_about = None)]
struct Cli {
    /// JSON configuration file. Missing fields use the defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List audio input devices.
    Devices,
    /// Run one built-in effect against a simulated gateway.
    Effect {
        /// Effect kind, e.g. `strobe`, `wave` or `ultra_strobe`.
        kind: String,
        #[command(flatten)]
        params: EffectParams,
    },
    /// Run a custom step program.
    Custom {
        /// JSON file holding the program.
        #[arg(long, conflicts_with = "template")]
        file: Option<PathBuf>,
        /// Name of a built-in template.
        #[arg(long)]
        template: Option<String>,
        #[command(flatten)]
        params: EffectParams,
    },
    /// List the built-in custom programs.
    Templates,
    /// Drive the simulated lights from audio input.
    Sync {
        /// Input device index. The default input is used when omitted.
        #[arg(long)]
        device: Option<usize>,
        /// `frequency`, `amplitude`, `beat` or `spectrum`.
        #[arg(long, default_value = "frequency")]
        strategy: String,
        #[arg(long, default_value_t = 0.5)]
        sensitivity: f32,
        /// How long to run before stopping.
        #[arg(long, default_value_t = 10)]
        seconds: u64,
        /// Number of simulated lights.
        #[arg(long, default_value_t = 3)]
        lights: usize,
    },
}

#[derive(Args, Debug)]
struct EffectParams {
    /// `all`, `light:<id>` or `group:<id>`.
    #[arg(long, default_value = "all")]
    target: String,
    /// Seconds to run; 0 runs until interrupted.
    #[arg(long, default_value_t = 10.0)]
    duration: f32,
    /// Strobe frequency in Hz.
    #[arg(long, default_value_t = 2.0)]
    frequency: f32,
    #[arg(long, default_value_t = 1.0)]
    speed: f32,
    #[arg(long, default_value_t = 1.0)]
    intensity: f32,
    #[arg(long, default_value = "full")]
    palette: String,
    /// `forward`, `backward` or `ping_pong`.
    #[arg(long, default_value = "forward")]
    direction: String,
    /// Strobe mode (`single`, `multi`, `rainbow`) or ultra strobe mode
    /// (`ultra`, `burst`, `police`, `disco_flash`).
    #[arg(long)]
    mode: Option<String>,
    /// Seed for reproducible random effects.
    #[arg(long)]
    seed: Option<u64>,
    /// Number of simulated lights.
    #[arg(long, default_value_t = 3)]
    lights: usize,
}

impl EffectParams {
    fn into_config(self, program: Option<CustomEffect>) -> light_sync_core::Result<GeneratorConfig> {
        let target: TargetSelector = self.target.parse()?;
        let palette: PaletteName = self.palette.parse()?;
        let mut config = GeneratorConfig {
            target,
            duration_secs: self.duration,
            frequency_hz: self.frequency,
            speed: self.speed,
            intensity: self.intensity,
            palette,
            direction: self.direction.parse()?,
            program,
            seed: self.seed,
            ..GeneratorConfig::default()
        };
        if let Some(mode) = self.mode {
            let value = serde_json::Value::String(mode.replace('-', "_"));
            // the same string selects either mode family
            if let Ok(strobe) = serde_json::from_value(value.clone()) {
                config.strobe_mode = strobe;
            } else {
                config.ultra_mode = serde_json::from_value(value)?;
            }
        }
        Ok(config)
    }
}
