use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Only add rpath for the swipl feature
    if std::env::var_os("CARGO_FEATURE_SWIPL").is_none() {
        return;
    }

    // Get SWI-Prolog library directory dynamically
    let Ok(output) = Command::new("swipl").arg("--dump-runtime-variables").output() else {
        println!("cargo:warning=swipl not found on PATH; libswipl must be on the loader path");
        return;
    };
    let output_str = String::from_utf8_lossy(&output.stdout);

    // Format: PLLIBDIR="/usr/lib/swi-prolog/lib/x86_64-linux";
    if let Some(line) = output_str.lines().find(|l| l.starts_with("PLLIBDIR=")) {
        let lib_dir = line
            .trim_start_matches("PLLIBDIR=\"")
            .trim_end_matches("\";")
            .trim_end_matches('"');

        // Add rpath so the runtime linker can find libswipl.so
        println!("cargo:rustc-link-arg=-Wl,-rpath,{}", lib_dir);
    }
}
