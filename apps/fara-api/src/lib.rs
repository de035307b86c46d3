pub mod routes;
pub mod state;

use std::{future::IntoFuture, net::SocketAddr};

use clap::Parser;
use color_eyre::eyre;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::state::AppState;
use fara_cli::ConfigArgs;

#[derive(Debug, Parser)]
#[command(
	version = fara_cli::VERSION,
	rename_all = "kebab",
	styles = fara_cli::styles(),
)]
pub struct Args {
	#[command(flatten)]
	pub config: ConfigArgs,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = fara_config::load(&args.config.config)?;

	init_tracing(&config.service.log_level);

	let http_addr = config.service.http_bind.parse::<SocketAddr>()?;
	let admin_addr = config.service.admin_bind.parse::<SocketAddr>()?;

	eyre::ensure!(admin_addr.ip().is_loopback(), "admin_bind must be a loopback address.");

	let http_listener = TcpListener::bind(http_addr).await?;
	let admin_listener = TcpListener::bind(admin_addr).await?;
	let state = AppState::new(config).await?;
	let sweeper = state.service.memory.spawn_sweeper();

	tracing::info!(%http_addr, %admin_addr, "fara-api listening.");

	let served = tokio::try_join!(
		axum::serve(http_listener, routes::router(state.clone())).into_future(),
		axum::serve(admin_listener, routes::admin_router(state)).into_future(),
	);

	if let Some(sweeper) = sweeper {
		sweeper.abort();
	}

	served?;

	Ok(())
}

fn init_tracing(log_level: &str) {
	let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();
}
