use std::{env, fs, path::PathBuf};

fn main() {
    // 1) Handle memory.x based on target
    let target = env::var("TARGET").unwrap_or_default();
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    let memory_file = if target.starts_with("thumbv8m") {
        Some("memory-pico2.x")
    } else if target.starts_with("thumbv6m") {
        Some("memory-pico1w.x")
    } else {
        None
    };
    if let Some(memory_file) = memory_file {
        let memory_x = fs::read_to_string(memory_file)
            .unwrap_or_else(|err| panic!("Failed to read {memory_file}: {err}"));
        fs::write(out_dir.join("memory.x"), memory_x).expect("Failed to write memory.x");
        println!("cargo:rustc-link-search={}", out_dir.display());
        println!("cargo:rerun-if-changed={memory_file}");
    }

    // 2) Load optional env files
    let _ = dotenvy::from_filename(".env");
    load_home_env(".pico.env");

    // 3) Fallback network tried when nothing is stored; also the portal's broadcast name
    let portal_ssid = env_or_default("PORTAL_SSID", "ESP32");
    let portal_pass = env_or_default("PORTAL_PASS", "password");
    if portal_ssid.len() > 32 {
        println!("cargo:warning=PORTAL_SSID is longer than 32 bytes and will be ignored");
    }

    // 4) Expose as compile-time constants
    println!("cargo:rustc-env=PORTAL_SSID={portal_ssid}");
    println!("cargo:rustc-env=PORTAL_PASS={portal_pass}");

    println!("cargo:rerun-if-env-changed=PORTAL_SSID");
    println!("cargo:rerun-if-env-changed=PORTAL_PASS");
    println!("cargo:rerun-if-changed=.env");
}

fn load_home_env(file: &str) {
    let home = match env::var_os("USERPROFILE").or_else(|| env::var_os("HOME")) {
        Some(path) => PathBuf::from(path),
        None => return,
    };
    let _ = dotenvy::from_path(home.join(file));
}

fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
