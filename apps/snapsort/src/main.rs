use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;
	let args = snapsort::Args::parse();
	snapsort::run(args).await
}
