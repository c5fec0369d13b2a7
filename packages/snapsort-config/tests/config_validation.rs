use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use toml::Value;

use snapsort_config::{Config, Error};

const SAMPLE_CONFIG_TEMPLATE_TOML: &str = include_str!("fixtures/sample_config.template.toml");

fn sample_toml_with(section: &str, key: &str, value: Value) -> String {
	let mut root: Value =
		toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse template config.");
	let mut table = root.as_table_mut().expect("Template config must be a table.");

	for part in section.split('.') {
		table = table
			.get_mut(part)
			.and_then(Value::as_table_mut)
			.unwrap_or_else(|| panic!("Template config must include [{section}]."));
	}

	table.insert(key.to_string(), value);

	toml::to_string(&root).expect("Failed to render template config.")
}

fn write_temp_config(payload: String) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let pid = std::process::id();
	let mut path = env::temp_dir();

	path.push(format!("snapsort_config_test_{nanos}_{pid}_{ordinal}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn load_payload(payload: String) -> snapsort_config::Result<Config> {
	let path = write_temp_config(payload);
	let result = snapsort_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	result
}

fn base_config() -> Config {
	toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse test config.")
}

#[test]
fn sample_config_loads() {
	let cfg = load_payload(SAMPLE_CONFIG_TEMPLATE_TOML.to_string()).expect("Expected valid config.");

	assert_eq!(cfg.atlas.grid_size, 3);
	assert_eq!(cfg.cache.result_ttl_secs, 3_600);
	assert_eq!(cfg.dispatch.max_visual_images, 50);
	assert_eq!(cfg.dispatch.hybrid_sample_size, 18);
}

#[test]
fn omitted_sections_fall_back_to_defaults() {
	let mut root: Value =
		toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse template config.");
	let table = root.as_table_mut().expect("Template config must be a table.");

	table.remove("aggregation");
	table.remove("embedding");

	let cfg =
		load_payload(toml::to_string(&root).expect("Failed to render config.")).expect("Valid.");

	assert_eq!(cfg.aggregation.conflict_penalty, 0.1);
	assert_eq!(cfg.embedding.similarity_threshold, 0.5);
}

#[test]
fn atlas_grid_size_is_bounded() {
	let err = load_payload(sample_toml_with("atlas", "grid_size", Value::Integer(4)))
		.expect_err("Expected grid size validation error.");

	assert!(
		err.to_string().contains("atlas.grid_size must be between 1 and 3."),
		"Unexpected error: {err}"
	);
}

#[test]
fn cache_ttl_must_be_positive() {
	let err = load_payload(sample_toml_with("cache", "result_ttl_secs", Value::Integer(0)))
		.expect_err("Expected cache TTL validation error.");

	assert!(
		err.to_string().contains("cache.result_ttl_secs must be greater than zero."),
		"Unexpected error: {err}"
	);
}

#[test]
fn ranking_weights_must_be_non_negative() {
	let mut cfg = base_config();

	cfg.ranking.weights.quality = -0.5;

	let err = snapsort_config::validate(&cfg).expect_err("Expected weight validation error.");

	assert!(
		err.to_string().contains("ranking.weights.quality must be zero or greater."),
		"Unexpected error: {err}"
	);
}

#[test]
fn hybrid_bounds_must_be_ordered() {
	let mut cfg = base_config();

	cfg.dispatch.hybrid_min_images = 200;

	let err = snapsort_config::validate(&cfg).expect_err("Expected hybrid bounds error.");

	assert!(matches!(err, Error::Validation { ref key, .. } if key == "dispatch.hybrid_min_images"));
}

#[test]
fn api_key_can_come_from_environment() {
	let var = format!("SNAPSORT_TEST_KEY_{}", std::process::id());
	let payload =
		sample_toml_with("providers.vision", "api_key", Value::String(format!("env:{var}")));

	// SAFETY: the variable name is unique to this test process.
	unsafe { env::set_var(&var, "from-env") };

	let cfg = load_payload(payload.clone()).expect("Expected env-backed key to resolve.");

	assert_eq!(cfg.providers.vision.api_key, "from-env");

	// SAFETY: see above.
	unsafe { env::remove_var(&var) };

	let err = load_payload(payload).expect_err("Expected missing env error.");

	assert!(matches!(err, Error::MissingEnv { .. }), "Unexpected error: {err}");
}

#[test]
fn missing_file_is_reported() {
	let err = snapsort_config::load(&env::temp_dir().join("snapsort_missing_config.toml"))
		.expect_err("Expected read error.");

	assert!(matches!(err, Error::ReadConfig { .. }));
}
