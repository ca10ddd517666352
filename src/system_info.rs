use crate::config::Config;
use serde::Serialize;
use sysinfo::System;

#[derive(Serialize, Debug)]
pub struct SystemInfo {
    pub version: String,
    pub platform: String,
    pub arch: String,
    pub cpus: usize,
    pub cpu_model: String,
    pub memory_total_gb: f64,
    pub memory_free_gb: f64,
}

pub fn get_system_info() -> SystemInfo {
    let mut system = System::new();
    system.refresh_all();

    let memory_total = system.total_memory() as f64 / 1024.0 / 1024.0 / 1024.0;
    let memory_free = system.free_memory() as f64 / 1024.0 / 1024.0 / 1024.0;

    let cpu_model = system
        .cpus()
        .first()
        .map(|cpu| cpu.brand().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    SystemInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        cpus: system.cpus().len(),
        cpu_model,
        memory_total_gb: memory_total,
        memory_free_gb: memory_free,
    }
}

fn configured(value: &Option<String>) -> &'static str {
    if value.is_some() {
        "configured"
    } else {
        "MISSING"
    }
}

/// Secrets are reported as present or missing, never printed.
pub fn print_startup_info(config: &Config) {
    println!("{}", "=".repeat(60));
    println!("🚀 Video Share Backend Starting...");
    println!("{}", "=".repeat(60));

    let sys_info = get_system_info();
    println!("📊 System Information:");
    println!("  Version: {}", sys_info.version);
    println!("  Platform: {} ({})", sys_info.platform, sys_info.arch);
    println!("  CPUs: {} ({})", sys_info.cpus, sys_info.cpu_model);
    println!(
        "  Memory: {:.2} GB total, {:.2} GB free",
        sys_info.memory_total_gb, sys_info.memory_free_gb
    );
    println!("  Datastore: {}", datastore_kind(&config.database_url));
    println!("  Upload endpoint: {}", config.imagekit.upload_endpoint);
    println!("  Upload folder: {}", config.imagekit.folder);
    println!("  Private key: {}", configured(&config.imagekit.private_key));
    println!("  Public key: {}", configured(&config.imagekit.public_key));
    println!("  Session secret: {}", configured(&config.session_secret));
    println!("{}", "=".repeat(60));
}

/// The scheme of the connection string; a path may name private locations.
fn datastore_kind(url: &str) -> &str {
    url.split(':').next().unwrap_or("unknown")
}
