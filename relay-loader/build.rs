#![expect(missing_docs, reason = "build scripts don't need docs")]
#![expect(
	clippy::unwrap_used,
	clippy::panic,
	reason = "build scripts are allowed to panic if environment variables are missing, as this is \
	          a build-time error that should be caught during development"
)]

use std::{env, fs, path::PathBuf};

/// Where the previous stage puts the loader on each platform.
const LOAD_ADDRESSES: &[(&str, u64)] = &[
	("QEMU_VIRT", 0x4008_0000),
	("FVP", 0x8008_0000),
	("TX1", 0x8008_0000),
	("RPI3", 0x0008_0000),
	("ZYNQ7000", 0x0010_0000),
	("RISCV_VIRT", 0x8020_0000),
];

/// The link address of the selected platform.
fn load_address() -> u64 {
	let mut selected = LOAD_ADDRESSES
		.iter()
		.filter(|(feature, _)| env::var_os(format!("CARGO_FEATURE_{feature}")).is_some());

	match (selected.next(), selected.next()) {
		(Some(&(_, addr)), None) => addr,
		(None, _) => panic!("no platform feature selected"),
		(Some(_), Some(_)) => panic!("more than one platform feature selected"),
	}
}

fn main() {
	let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap();

	let (bin, script) = match target_arch.as_str() {
		"aarch64" => ("relay-aarch64", "relay-loader/bin/aarch64.x"),
		"arm" => ("relay-armv7", "relay-loader/bin/armv7.x"),
		"riscv64" => ("relay-riscv64", "relay-loader/bin/riscv64.x"),
		_ => {
			panic!("unsupported target architecture: {target_arch}");
		}
	};

	println!("cargo:rustc-link-arg-bin={bin}=-T");
	println!("cargo:rustc-link-arg-bin={bin}={script}");
	println!("cargo:rerun-if-changed={script}");
	println!("cargo:rustc-link-arg-bin={bin}=--defsym=__relay_load_addr={:#x}", load_address());

	// The blob is embedded as-is; building it is a separate step.
	let out = PathBuf::from(env::var_os("OUT_DIR").unwrap()).join("blob.bin");
	println!("cargo:rerun-if-env-changed=RELAY_BLOB");

	match env::var_os("RELAY_BLOB") {
		Some(path) => {
			let path = PathBuf::from(path);
			println!("cargo:rerun-if-changed={}", path.display());
			fs::copy(&path, &out).unwrap_or_else(|err| panic!("cannot read RELAY_BLOB {}: {err}", path.display()));
		}
		None => {
			println!("cargo:warning=RELAY_BLOB is not set; the loader will have nothing to boot");
			fs::write(&out, []).unwrap();
		}
	}
}
