use std::process::Command;

fn main() {
	println!("cargo:rerun-if-changed=.git/HEAD");
	println!("cargo:rerun-if-changed=.git/refs/");

	let cargo_version = env!("CARGO_PKG_VERSION");
	let version = match git_describe() {
		// v0.2.0 -> 0.2.0, v0.2.0-3-gabc1234 -> 0.2.0-3-gabc1234
		Some(described) => described
			.strip_prefix('v')
			.map_or_else(|| format!("{cargo_version}+{described}"), str::to_string),
		None => cargo_version.to_string(),
	};

	println!("cargo:rustc-env=KDIFF_VERSION={version}");
}

fn git_describe() -> Option<String> {
	let output = Command::new("git")
		.args(["describe", "--tags", "--always", "--dirty"])
		.output()
		.ok()?;
	if !output.status.success() {
		return None;
	}
	let described = String::from_utf8(output.stdout).ok()?;
	let described = described.trim();
	(!described.is_empty()).then(|| described.to_string())
}
