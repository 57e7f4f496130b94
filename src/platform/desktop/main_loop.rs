use std::{path::Path, time::Instant};

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use log::{debug, error, info, LevelFilter};

use crate::{
    properties_window::{lock, properties_window_main, SharedControls},
    simulation_parameters::SimulationConfig,
    software_backend::SoftwareBackend,
    surface::Surface,
    SimulationSession,
};

use super::{rendering::SimulationWindow, snapshot::run_snapshot};

const CARGO_PKG_AUTHORS: &'static str = env!("CARGO_PKG_AUTHORS");
const CARGO_PKG_VERSION: &'static str = env!("CARGO_PKG_VERSION");
const CARGO_PKG_DESCRIPTION: &'static str = env!("CARGO_PKG_DESCRIPTION");

const DEFAULT_WINDOW_SIZE: (u32, u32) = (800, 600);

pub fn start() {
    let matches = App::new("Stable Smoke")
        .version(CARGO_PKG_VERSION)
        .author(CARGO_PKG_AUTHORS)
        .about(CARGO_PKG_DESCRIPTION)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .global(true)
                .help("Sets the level of verbosity"),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("Open an interactive smoke window")
                .arg(
                    Arg::with_name("CONFIG")
                        .help("YAML simulation config (defaults are used if omitted)")
                        .required(false)
                        .index(1),
                )
                .arg(
                    Arg::with_name("MAX_SECONDS")
                        .long("max-seconds")
                        .short("s")
                        .required(false)
                        .takes_value(true)
                        .help("Close the window after the given amount of seconds"),
                ),
        )
        .subcommand(
            SubCommand::with_name("snapshot")
                .about("Run a scripted pointer path headlessly and write the last frame as PNG")
                .arg(
                    Arg::with_name("CONFIG")
                        .help("YAML simulation config (defaults are used if omitted)")
                        .required(false)
                        .index(1),
                )
                .arg(
                    Arg::with_name("STEPS")
                        .long("steps")
                        .short("n")
                        .takes_value(true)
                        .default_value("120")
                        .help("Number of simulation steps"),
                )
                .arg(
                    Arg::with_name("OUTPUT")
                        .long("output")
                        .short("o")
                        .takes_value(true)
                        .required(true)
                        .help("PNG file to write"),
                ),
        )
        .get_matches();

    init_logging(matches.occurrences_of("v"));

    let result = if let Some(run_matches) = matches.subcommand_matches("run") {
        run(run_matches)
    } else if let Some(snapshot_matches) = matches.subcommand_matches("snapshot") {
        snapshot(snapshot_matches)
    } else {
        Err(String::from("missing subcommand"))
    };

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbosity: u64) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env().filter_level(level).init();
}

fn load_config(matches: &ArgMatches) -> Result<SimulationConfig, String> {
    match matches.value_of("CONFIG") {
        Some(path) => {
            let yaml = std::fs::read_to_string(Path::new(path))
                .map_err(|e| format!("failed reading config `{}`: {}", path, e))?;
            let config = SimulationConfig::from_yaml(&yaml).map_err(|e| e.to_string())?;
            info!("loaded config from `{}`", path);
            Ok(config)
        }
        None => Ok(SimulationConfig::default()),
    }
}

fn snapshot(matches: &ArgMatches) -> Result<(), String> {
    let config = load_config(matches)?;
    let steps = matches
        .value_of("STEPS")
        .unwrap_or("120")
        .parse::<usize>()
        .map_err(|e| format!("invalid --steps: {}", e))?;
    let output = matches.value_of("OUTPUT").ok_or("missing --output")?;

    let (width, height) = DEFAULT_WINDOW_SIZE;
    run_snapshot(config, width, height, steps, output)
}

fn run(matches: &ArgMatches) -> Result<(), String> {
    let config = load_config(matches)?;
    let max_seconds = match matches.value_of("MAX_SECONDS") {
        Some(s) => Some(s.parse::<f64>().map_err(|e| format!("invalid --max-seconds: {}", e))?),
        None => None,
    };

    let controls = SharedControls::new(config);

    let simulation_thread = {
        let controls = controls.clone();
        std::thread::spawn(move || {
            if let Err(e) = simulation_main(&controls, max_seconds) {
                error!("{}", e);
            }
            controls.cancel();
            std::process::exit(0);
        })
    };

    properties_window_main(Some(simulation_thread), controls);
    Ok(())
}

fn new_session(config: SimulationConfig, width: u32, height: u32) -> Result<SimulationSession<SoftwareBackend>, String> {
    let surface = Surface::acquire(SoftwareBackend::new(width, height)).map_err(|e| e.to_string())?;
    let mut session = SimulationSession::new(surface, config).map_err(|e| e.to_string())?;
    session.initialize().map_err(|e| e.to_string())?;
    Ok(session)
}

fn simulation_main(controls: &SharedControls, max_seconds: Option<f64>) -> Result<(), String> {
    let (width, height) = DEFAULT_WINDOW_SIZE;
    let mut window = SimulationWindow::new(width, height)?;

    let config = *lock(&controls.config);
    let mut session = new_session(config, width, height)?;

    let start = Instant::now();

    loop {
        if controls.is_cancelled() {
            break;
        }

        if let Some(config) = controls.take_restart() {
            let (width, height) = window.size();
            session.dispose().map_err(|e| e.to_string())?;
            session = new_session(config, width, height)?;
            info!("restarted simulation");
        }
        session.set_visualization(controls.visualization());

        if !window.process_events(&mut session)? {
            break;
        }

        let a = Instant::now();
        let report = session.step(start.elapsed().as_secs_f64()).map_err(|e| e.to_string())?;
        let b = Instant::now();
        window.present(session.surface().backend())?;

        debug!(
            "{:05}: step {:.2}msec, present {:.2}msec",
            report.frame,
            (b - a).as_secs_f32() * 1000.,
            b.elapsed().as_secs_f32() * 1000.
        );

        if let Some(max_seconds) = max_seconds {
            if start.elapsed().as_secs_f64() >= max_seconds {
                break;
            }
        }
    }

    session.dispose().map_err(|e| e.to_string())
}
