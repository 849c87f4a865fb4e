use embedbridge::logging::{init_dev_logging, Level, LogConfig};
use embedbridge::{
    BridgeConfig, HostObject, LifecycleCoordinator, LifecycleState, LocalHost, ManagedRuntime,
    ModuleBootstrap, TypeTag,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug)]
struct Config {
    config_file: Option<PathBuf>,
    resource: Option<PathBuf>,
    objects: usize,
    strict: bool,
    verbose: bool,
}

impl Config {
    fn from_args() -> Result<Self, String> {
        let args: Vec<String> = std::env::args().collect();
        let prog = args.first().map(String::as_str).unwrap_or("embedbridge");

        match args.get(1).map(String::as_str) {
            Some("check") => {}
            Some("--help") | Some("-h") | None => return Err(Self::usage(prog)),
            Some(other) => return Err(format!("Unknown command: {}\n\n{}", other, Self::usage(prog))),
        }

        let mut config = Self {
            config_file: None,
            resource: None,
            objects: 8,
            strict: false,
            verbose: false,
        };

        let mut rest = args[2..].iter();
        while let Some(arg) = rest.next() {
            match arg.as_str() {
                "--help" | "-h" => return Err(Self::usage(prog)),
                "--strict" => config.strict = true,
                "--verbose" | "-v" => config.verbose = true,
                "--config" => config.config_file = Some(Self::value(&mut rest, arg)?.into()),
                "--resource" => config.resource = Some(Self::value(&mut rest, arg)?.into()),
                "--objects" => {
                    let value = Self::value(&mut rest, arg)?;
                    config.objects = value
                        .parse()
                        .map_err(|_| format!("--objects expects a number, got '{}'", value))?;
                }
                opt => return Err(format!("Unknown option: {}\n\n{}", opt, Self::usage(prog))),
            }
        }

        Ok(config)
    }

    fn value<'a>(rest: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<&'a String, String> {
        rest.next().ok_or_else(|| format!("{} expects a value", flag))
    }

    fn usage(prog: &str) -> String {
        format!(
            "embedbridge - host object bridge self-check\n\n\
            USAGE:\n    {} check [OPTIONS]\n\n\
            OPTIONS:\n    \
            -h, --help          Print help information\n    \
            --config FILE       Bridge configuration (bridge.toml)\n    \
            --resource PATH     Runtime resource directory\n    \
            --objects N         Host objects to wrap (default 8)\n    \
            --strict            Abort on callbacks outside the registration window\n    \
            -v, --verbose       Debug logging\n\n\
            EXAMPLES:\n    \
            {} check --resource ./_bridge.env\n    \
            {} check --config bridge.toml --objects 100",
            prog, prog, prog
        )
    }
}

/// Drive one full bring-up, wrapper round trip and teardown
fn run_check(cli: &Config, mut bridge_config: BridgeConfig) -> Result<String, String> {
    if cli.strict {
        bridge_config.callbacks.strict = true;
    }
    let resource = match (&cli.resource, &bridge_config.runtime.resource_path) {
        (Some(path), _) => path.clone(),
        (None, Some(path)) => path.clone(),
        (None, None) => std::env::current_dir().map_err(|e| e.to_string())?,
    };

    let host = Arc::new(LocalHost::new());
    let mut coordinator = LifecycleCoordinator::new(
        Arc::new(ManagedRuntime::new()),
        Arc::clone(&host),
        ModuleBootstrap::from_config(&bridge_config),
        &bridge_config,
    );
    coordinator.set_resource_path(resource);

    let state = coordinator.start();
    if state != LifecycleState::BridgeActive {
        let report: Vec<String> = coordinator.diagnostics().iter().map(|d| d.to_string()).collect();
        return Err(format!("bridge stopped at {}:\n  {}", state, report.join("\n  ")));
    }
    let index = coordinator
        .language_index()
        .ok_or_else(|| "bridge active without a language index".to_string())?;

    let tag = TypeTag::new(1);
    let mut wrappers = Vec::with_capacity(cli.objects);
    for i in 0..cli.objects {
        let object = HostObject::from_addr(0x1000 + i * 0x40);
        let wrapper = host
            .bind(index, tag, object)
            .ok_or_else(|| format!("no wrapper for host object #{}", i))?;
        host.retain(index, wrapper.as_ptr());
        wrappers.push(wrapper);
    }
    for wrapper in &wrappers {
        if !host.release(index, wrapper.as_ptr()) {
            return Err(format!("{:?} reported dead while the host still owns it", wrapper));
        }
        host.destroy_object(index, wrapper.as_ptr());
    }

    let stats = coordinator.bridge().stats();
    debug!(?stats, "bridge counters");
    coordinator.shutdown();

    serde_json::to_string_pretty(&stats).map_err(|e| e.to_string())
}

fn main() {
    let cli = match Config::from_args() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let _guard = if cli.verbose {
        init_dev_logging()
    } else {
        embedbridge::logging::init_logging(LogConfig::new().with_level(Level::WARN))
    };
    info!("embedbridge check starting");

    let bridge_config = match &cli.config_file {
        Some(path) => BridgeConfig::load(path),
        None => Ok(BridgeConfig::default()),
    };
    let bridge_config = match bridge_config {
        Ok(config) => config.with_env_overrides(),
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    match run_check(&cli, bridge_config) {
        Ok(report) => println!("{}", report),
        Err(e) => {
            error!(error = %e, "Bridge check failed");
            eprintln!("Bridge check failed: {}", e);
            std::process::exit(1);
        }
    }
}
