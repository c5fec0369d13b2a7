use std::{env, fs, path::PathBuf};

use clap::Parser;

use snapsort::{Args, Command, read_json};
use snapsort_domain::SortRequest;

fn temp_path(name: &str) -> PathBuf {
	env::temp_dir().join(format!("snapsort_cli_{}_{name}", std::process::id()))
}

#[test]
fn sort_command_parses_kebab_case_flags() {
	let args = Args::try_parse_from([
		"snapsort",
		"sort",
		"-c",
		"config.toml",
		"--request",
		"request.json",
		"--images",
		"images.json",
		"--remaining-budget",
		"2.5",
		"--pretty",
	])
	.expect("Expected valid arguments.");
	let Command::Sort(sort) = args.command else { panic!("Expected the sort command.") };

	assert_eq!(sort.config, PathBuf::from("config.toml"));
	assert_eq!(sort.request, PathBuf::from("request.json"));
	assert_eq!(sort.images, Some(PathBuf::from("images.json")));
	assert_eq!(sort.remaining_budget, Some(2.5));
	assert!(sort.pretty);
}

#[test]
fn sort_command_requires_a_config() {
	let err = Args::try_parse_from(["snapsort", "sort", "--request", "request.json"])
		.expect_err("Expected a missing config error.");

	assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
}

#[test]
fn classify_command_takes_the_query_positionally() {
	let args = Args::try_parse_from(["snapsort", "classify", "-c", "config.toml", "best beach photos"])
		.expect("Expected valid arguments.");
	let Command::Classify(classify) = args.command else { panic!("Expected the classify command.") };

	assert_eq!(classify.query, "best beach photos");
}

#[test]
fn request_files_use_camel_case_fields() {
	let path = temp_path("request.json");

	fs::write(
		&path,
		r#"{
			"query": "sunset",
			"ownerId": "owner-1",
			"images": [{ "id": "a", "ownerId": "owner-1", "location": "s3://a.jpg" }],
			"options": { "maxResults": 5, "useVisualAnalysis": true }
		}"#,
	)
	.expect("Failed to write request.");

	let req: SortRequest = read_json(&path).expect("Expected request to parse.");

	fs::remove_file(&path).expect("Failed to remove request.");

	assert_eq!(req.owner_id, "owner-1");
	assert_eq!(req.images.len(), 1);
	assert_eq!(req.options.max_results, Some(5));
	assert!(req.options.use_visual_analysis);
}

#[test]
fn unreadable_request_names_the_file() {
	let path = temp_path("missing.json");
	let err = read_json::<SortRequest>(&path).expect_err("Expected read error.");

	assert!(err.to_string().contains("missing.json"), "Unexpected error: {err}");
}
