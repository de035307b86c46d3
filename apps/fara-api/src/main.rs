use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = fara_api::Args::parse();

	fara_api::run(args).await
}
