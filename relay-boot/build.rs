#![expect(missing_docs, reason = "build scripts don't need docs")]
#![expect(
	clippy::panic,
	reason = "build scripts are allowed to panic on bad configuration, as this is a build-time \
	          error that should be caught during development"
)]

use std::{env, fs, path::PathBuf};

/// Reads a numeric setting from the environment.
fn setting(name: &str, default: usize) -> usize {
	println!("cargo:rerun-if-env-changed={name}");

	match env::var(name) {
		Ok(value) => {
			value
				.trim()
				.parse()
				.unwrap_or_else(|_| panic!("{name} must be a non-negative integer (got {value:?})"))
		}
		Err(env::VarError::NotPresent) => default,
		Err(err) => panic!("{name} is not valid: {err}"),
	}
}

fn main() {
	let cores = setting("RELAY_NUM_CORES", 1);
	let stack = setting("RELAY_CORE_STACK_SIZE", 4096);

	if cores == 0 {
		panic!("RELAY_NUM_CORES must be at least 1");
	}

	if !stack.is_power_of_two() || stack < 1024 {
		panic!("RELAY_CORE_STACK_SIZE must be a power of two no smaller than 1024 (got {stack})");
	}

	let out = PathBuf::from(env::var_os("OUT_DIR").unwrap_or_else(|| panic!("OUT_DIR not set")));
	let config = format!(
		"/// Configured number of cores, including the boot core.\n\
		 pub const NUM_CORES: usize = {cores};\n\
		 /// Stack size of each secondary core, in bytes.\n\
		 pub const CORE_STACK_SIZE: usize = {stack};\n"
	);

	fs::write(out.join("config.rs"), config).unwrap_or_else(|err| panic!("cannot write config.rs: {err}"));
}
