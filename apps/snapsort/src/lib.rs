use std::{
	fs,
	path::{Path, PathBuf},
	sync::Arc,
};

use clap::{
	Parser, Subcommand,
	builder::{
		Styles,
		styling::{AnsiColor, Effects},
	},
};
use color_eyre::eyre::WrapErr;
use serde::de::DeserializeOwned;
use tracing_subscriber::EnvFilter;

use snapsort_config::Config;
use snapsort_domain::{ImageFilters, ImageRecord, SortRequest};
use snapsort_service::{Dispatcher, MemoryImageStore, Providers, dispatch::classify};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(version = VERSION, rename_all = "kebab", styles = styles())]
pub struct Args {
	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Sort a set of images for a natural-language query and print the response as JSON.
	Sort(SortArgs),
	/// Show how a query would be classified.
	Classify(ClassifyArgs),
}

#[derive(Debug, clap::Args)]
pub struct SortArgs {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	/// JSON sort request.
	#[arg(long, value_name = "FILE")]
	pub request: PathBuf,
	/// JSON array of image records backing the image store. When the request carries no images,
	/// all of the owner's images from this catalog are sorted.
	#[arg(long, value_name = "FILE")]
	pub images: Option<PathBuf>,
	/// Cost the caller may still spend on visual analysis.
	#[arg(long, value_name = "AMOUNT")]
	pub remaining_budget: Option<f64>,
	#[arg(long)]
	pub pretty: bool,
}

#[derive(Debug, clap::Args)]
pub struct ClassifyArgs {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	pub query: String,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	match args.command {
		Command::Sort(sort_args) => run_sort(sort_args).await,
		Command::Classify(classify_args) => run_classify(classify_args).await,
	}
}

async fn run_sort(args: SortArgs) -> color_eyre::Result<()> {
	let config = load_config(&args.config)?;
	let req: SortRequest = read_json(&args.request)?;
	let catalog: Vec<ImageRecord> = match &args.images {
		Some(path) => read_json(path)?,
		None => req.images.clone(),
	};
	let store = Arc::new(MemoryImageStore::new(catalog));
	let dispatcher = Dispatcher::new(config, Providers::default(), store);
	let response = if req.images.is_empty() {
		tracing::info!(owner_id = %req.owner_id, "Request carries no images; sorting the owner's catalog.");

		dispatcher
			.sort_owner_images(
				&req.query,
				&req.owner_id,
				&ImageFilters::default(),
				req.options,
				args.remaining_budget,
			)
			.await?
	} else {
		dispatcher.sort(req, args.remaining_budget).await?
	};
	let rendered = if args.pretty {
		serde_json::to_string_pretty(&response)?
	} else {
		serde_json::to_string(&response)?
	};

	println!("{rendered}");

	Ok(())
}

async fn run_classify(args: ClassifyArgs) -> color_eyre::Result<()> {
	let config = load_config(&args.config)?;
	let providers = Providers::default();
	let analysis = classify::analyze_query(&args.query, &config, providers.classifier.as_ref()).await;
	let rendered = serde_json::json!({
		"sortType": analysis.sort_type,
		"confidence": analysis.confidence,
		"source": analysis.source,
		"visionTerms": analysis.vision_terms,
		"timeOrder": analysis.time_order,
		"terms": analysis.terms,
		"colors": analysis.colors,
	});

	println!("{}", serde_json::to_string_pretty(&rendered)?);

	Ok(())
}

fn load_config(path: &Path) -> color_eyre::Result<Config> {
	let config = snapsort_config::load(path)?;

	init_tracing(&config)?;

	Ok(config)
}

pub fn read_json<T>(path: &Path) -> color_eyre::Result<T>
where
	T: DeserializeOwned,
{
	let raw = fs::read_to_string(path).wrap_err_with(|| format!("Failed to read {}.", path.display()))?;

	serde_json::from_str(&raw).wrap_err_with(|| format!("Failed to parse {}.", path.display()))
}

fn styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Red.on_default() | Effects::BOLD)
		.usage(AnsiColor::Red.on_default() | Effects::BOLD)
		.literal(AnsiColor::Blue.on_default() | Effects::BOLD)
		.placeholder(AnsiColor::Green.on_default())
}

fn init_tracing(config: &Config) -> color_eyre::Result<()> {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	// Logs go to stderr so stdout stays valid JSON.
	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

	Ok(())
}
