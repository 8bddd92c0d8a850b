use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use cluster_e2e::config::HarnessConfig;
use cluster_e2e::platform::Platform;
use cluster_e2e::scenario::{mount_scenario, upgrade_scenario, Outcome};
use cluster_e2e::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const SCENARIOS: &str = "mount, version-upgrade, all";

fn report(name: &str, result: Result<Outcome, Error>) -> bool {
    match result {
        Ok(outcome) => {
            info!("{} end-to-end test {}", name, outcome);
            true
        }
        Err(e) => {
            error!("{} end-to-end test failed: {}", name, e);
            if let Some((stdout, stderr)) = e.command_output() {
                error!("stdout:\n{}", stdout);
                error!("stderr:\n{}", stderr);
            }
            false
        }
    }
}

fn parse_args(args: &[String]) -> anyhow::Result<(String, Option<PathBuf>)> {
    let Some(cmd) = args.get(1) else {
        bail!("Please specify one scenario: {}", SCENARIOS);
    };
    let config = match &args[2..] {
        [] => None,
        [flag, path] if flag == "--config" => Some(PathBuf::from(path)),
        rest => bail!("unexpected arguments: {}", rest.join(" ")),
    };
    Ok((cmd.clone(), config))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let (cmd, config_path) = parse_args(&args)?;
    let config = HarnessConfig::load(config_path.as_deref())
        .with_context(|| format!("loading configuration for {}", cmd))?;
    let platform = Platform::current();
    info!("running on {} with driver {}", platform, config.driver);

    let passed = match cmd.as_str() {
        "mount" => {
            info!("Running mount end-to-end test");
            report("mount", mount_scenario(&config, &platform).await)
        }
        "version-upgrade" => {
            info!("Running version upgrade end-to-end test");
            report("version-upgrade", upgrade_scenario(&config, &platform).await)
        }
        "all" => {
            info!("Running every end-to-end test");
            let (mount, upgrade) = tokio::join!(
                mount_scenario(&config, &platform),
                upgrade_scenario(&config, &platform)
            );
            let mount = report("mount", mount);
            let upgrade = report("version-upgrade", upgrade);
            mount && upgrade
        }
        other => bail!("unknown scenario {:?}; expected one of: {}", other, SCENARIOS),
    };
    Ok(if passed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
