//! Build script for hotcmd-runtime
//!
//! Records the compiler that builds the host. Handler sources link against the
//! host's rlibs, so they must be compiled by the very same `rustc`.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=RUSTC");

    let meta = rustc_version::version_meta().expect("Failed to query the rustc version");
    println!("cargo:rustc-env=HOTCMD_HOST_RUSTC={}", meta.short_version_string);
}
