use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info, warn};

use crate::cli::{Args, Commands};
use crate::config::Config;
use crate::manager::Manager;
use crate::rpc::NodeClient;
use crate::zmq::ZmqListener;

pub async fn execute(args: Args) -> Result<()> {
    setup_logging(&args)?;

    let config_path = args.config.clone();
    match args.command {
        Commands::Start {
            bind,
            rpc_url,
            rpc_user,
            rpc_pass,
            payout,
            use_easier_target,
        } => {
            let mut config = match &config_path {
                Some(path) => Config::load_from_file(path)?,
                None => Config::default(),
            };

            if let Some(bind) = bind {
                config.server.bind_address = bind.parse()?;
            }
            if let Some(rpc_url) = rpc_url {
                config.primary.rpc_url = rpc_url;
            }
            if let Some(rpc_user) = rpc_user {
                config.primary.rpc_user = rpc_user;
            }
            if let Some(rpc_pass) = rpc_pass {
                config.primary.rpc_pass = rpc_pass;
            }
            if let Some(payout) = payout {
                config.primary.payout_address = Some(payout);
            }
            if use_easier_target {
                config.mining.use_easier_target = true;
            }

            start_relay(config).await
        }
        Commands::Config { file, show } => {
            let config = Config::load_from_file(&file)?;
            config.validate()?;
            info!("configuration {} is valid", file.display());
            if show {
                println!("{}", toml::to_string_pretty(&config)?);
            }
            Ok(())
        }
        Commands::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    output.display()
                );
            }
            std::fs::write(&output, toml::to_string_pretty(&Config::default())?)?;
            info!("wrote example configuration to {}", output.display());
            Ok(())
        }
    }
}

async fn start_relay(config: Config) -> Result<()> {
    config.validate()?;
    info!("starting rxd-stratum relay");

    let config = Arc::new(config);

    let primary: Arc<dyn crate::rpc::ChainClient> = Arc::new(NodeClient::new(
        config.primary.name.clone(),
        config.primary.rpc_url.clone(),
        config.primary.rpc_user.clone(),
        config.primary.rpc_pass.clone(),
        config.mining.submit_timeout,
    )?);

    let aux: Option<Arc<dyn crate::rpc::ChainClient>> = match &config.aux {
        Some(aux_config) => Some(Arc::new(NodeClient::new(
            aux_config.name.clone(),
            aux_config.rpc_url.clone(),
            aux_config.rpc_user.clone(),
            aux_config.rpc_pass.clone(),
            config.mining.submit_timeout,
        )?)),
        None => None,
    };

    let manager = Arc::new(Manager::new(config.clone(), primary, aux)?);

    // Dedup bookkeeping resets when a clean job invalidates prior work.
    {
        let shares = manager.shares().clone();
        let mut jobs_rx = manager.jobs().subscribe();
        tokio::spawn(async move {
            loop {
                match jobs_rx.recv().await {
                    Ok(job) => shares.on_new_job(&job),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
        });
    }

    // Template refresh: the poll loop always runs (it also drives the
    // time-roll); block notifications tighten latency when configured.
    let poll_interval = if config.primary.zmq_endpoint.is_some() {
        config.mining.poll_interval
    } else {
        // Without notifications, polling is the only refresh source.
        config.mining.poll_interval / 2
    };
    let updater_task = manager.updater().clone().spawn_poll_loop(poll_interval.max(
        std::time::Duration::from_secs(1),
    ));

    let mut zmq_tasks = Vec::new();
    if let Some(endpoint) = &config.primary.zmq_endpoint {
        zmq_tasks.push(
            ZmqListener::new(
                config.primary.name.clone(),
                endpoint.clone(),
                manager.updater().clone(),
            )
            .spawn(),
        );
    }
    if let Some(aux_config) = &config.aux {
        if let Some(endpoint) = &aux_config.zmq_endpoint {
            zmq_tasks.push(
                ZmqListener::new(
                    aux_config.name.clone(),
                    endpoint.clone(),
                    manager.updater().clone(),
                )
                .spawn(),
            );
        }
    }

    // Vardiff decay sweep.
    let vardiff_task = manager.vardiff().cloned().map(|vardiff| {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                tick.tick().await;
                vardiff.tick();
            }
        })
    });

    let listener = crate::Listener::new(manager.clone()).await?;
    let server = tokio::spawn(async move {
        if let Err(e) = listener.accept().await {
            error!("listener error: {}", e);
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        result = server => {
            if let Err(e) = result {
                error!("server task failed: {}", e);
            }
        }
    }

    info!("shutting down");
    updater_task.abort();
    for task in zmq_tasks {
        task.abort();
    }
    if let Some(task) = vardiff_task {
        task.abort();
    }
    Ok(())
}

fn setup_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_level = match args.verbose {
        0 => args.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if args.log_format.eq_ignore_ascii_case("json") {
        let subscriber = tracing_subscriber::registry().with(env_filter).with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_line_number(true)
                .with_file(true),
        );
        subscriber.init();
    } else {
        let subscriber = tracing_subscriber::registry().with(env_filter).with(
            fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .with_file(false)
                .compact(),
        );
        subscriber.init();
    }

    if args.verbose > 0 {
        warn!("verbose logging enabled");
    }
    Ok(())
}
