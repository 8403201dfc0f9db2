use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use ota_core::image::{self, FirmwareHeader, ImageSummary};
use ota_core::OtaConfig;
use reqwest::blocking::{Body, Client};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_FIRMWARE: &str = "target/xtensa-esp32-espidf/release/esp32-ota-server.bin";

#[derive(Parser)]
#[command(name = "ota-tool")]
#[command(about = "ESP32 OTA Update Tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check an image and upload it to a device
    Push {
        /// Device host name or IP address
        host: String,

        #[arg(short, long, default_value_t = OtaConfig::default().port)]
        port: u16,

        /// Firmware image to upload
        #[arg(short, long, default_value = DEFAULT_FIRMWARE)]
        firmware: PathBuf,

        /// Only check size and header magic before uploading
        #[arg(long)]
        no_verify: bool,
    },
    /// Show the firmware version a device is running
    Version {
        host: String,
        #[arg(short, long, default_value_t = OtaConfig::default().port)]
        port: u16,
    },
    /// Check that a device's OTA server is up
    Health {
        host: String,
        #[arg(short, long, default_value_t = OtaConfig::default().port)]
        port: u16,
    },
    /// Scan a /24 subnet for OTA servers
    Scan {
        /// Network subnet to scan (e.g., 192.168.1)
        #[arg(short, long, default_value = "192.168.1")]
        subnet: String,
        #[arg(short, long, default_value_t = OtaConfig::default().port)]
        port: u16,
    },
    /// Print the header and segments of a firmware image
    Inspect { file: PathBuf },
}

struct Device {
    host: String,
    port: u16,
}

impl Device {
    fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Push { host, port, firmware, no_verify } => {
            push(&Device { host, port }, &firmware, !no_verify)
        }
        Commands::Version { host, port } => {
            fetch_version(&client(Duration::from_secs(5)), &Device { host, port })
                .map(|v| println!("{}", v.green()))
        }
        Commands::Health { host, port } => health(&Device { host, port }),
        Commands::Scan { subnet, port } => {
            scan_devices(&subnet, port);
            Ok(())
        }
        Commands::Inspect { file } => inspect(&file),
    };

    if let Err(e) = result {
        println!("{} {:#}", "❌".red(), e);
        std::process::exit(1);
    }
}

fn client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Local checks the device would otherwise reject the upload for.
fn check_image(data: &[u8], full: bool) -> Result<Option<ImageSummary>> {
    let min = OtaConfig::default().min_firmware_size;
    if data.is_empty() {
        bail!("firmware file is empty");
    }
    if data.len() < min {
        bail!("firmware is {} bytes, below the {} byte minimum", data.len(), min);
    }
    FirmwareHeader::parse(data).context("not an ESP application image")?;
    if full {
        let summary = image::verify(data).context("image verification failed")?;
        return Ok(Some(summary));
    }
    Ok(None)
}

fn push(device: &Device, firmware_path: &Path, verify: bool) -> Result<()> {
    if !firmware_path.exists() {
        bail!(
            "Firmware not found: {} (build it and convert with espflash save-image)",
            firmware_path.display()
        );
    }
    let firmware_data = fs::read(firmware_path)
        .with_context(|| format!("Failed to read {}", firmware_path.display()))?;
    let file_size = firmware_data.len();

    if let Some(summary) = check_image(&firmware_data, verify)? {
        println!(
            "   Image ok: {} segment(s), entry 0x{:08x}",
            summary.segments.len(),
            summary.header.entry_addr
        );
    }

    let quick = client(Duration::from_secs(5));
    health(device)?;
    let running = fetch_version(&quick, device).unwrap_or_else(|_| "unknown".to_string());

    println!("\n📤 {} {} (running {})", "Updating".cyan(), device, running);
    println!("   Firmware: {} bytes ({:.2} MB)", file_size, file_size as f64 / 1024.0 / 1024.0);

    let pb = ProgressBar::new(file_size as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("   {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let body = Body::sized(
        ProgressReader { inner: std::io::Cursor::new(firmware_data), pb: pb.clone() },
        file_size as u64,
    );
    let response = client(Duration::from_secs(300))
        .post(device.url("/ota"))
        .header("Content-Type", "application/octet-stream")
        .body(body)
        .send();
    pb.finish_and_clear();

    let response = response.context("Upload failed")?;
    let status = response.status();
    let text = response.text().unwrap_or_default();
    if !status.is_success() {
        bail!("Device rejected the update: HTTP {} {}", status.as_u16(), text.trim());
    }

    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(json) => println!("   {} {}", "✅".green(), json["message"].as_str().unwrap_or("OK")),
        Err(_) => println!("   {} {}", "✅".green(), text),
    }
    println!("\n✨ {}", "OTA update completed successfully!".green());
    Ok(())
}

struct ProgressReader<R> {
    inner: R,
    pb: ProgressBar,
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pb.inc(n as u64);
        Ok(n)
    }
}

fn fetch_version(client: &Client, device: &Device) -> Result<String> {
    let json: serde_json::Value = client
        .get(device.url("/version"))
        .send()
        .with_context(|| format!("{} is not reachable", device))?
        .error_for_status()?
        .text()
        .map_err(anyhow::Error::from)
        .and_then(|t| serde_json::from_str(&t).context("bad /version response"))?;
    json["version"]
        .as_str()
        .map(str::to_string)
        .context("/version response has no version field")
}

fn health(device: &Device) -> Result<()> {
    let response = client(Duration::from_secs(5))
        .get(device.url("/health"))
        .send()
        .with_context(|| format!("{} is not reachable", device))?;
    if !response.status().is_success() {
        bail!("{} health check failed: HTTP {}", device, response.status());
    }
    println!("   {} {} is up", "✓".green(), device);
    Ok(())
}

fn scan_devices(subnet: &str, port: u16) -> Vec<(Device, String)> {
    println!("🔍 {} {}.0/24...", "Scanning network".cyan(), subnet);

    let client = client(Duration::from_millis(500));

    // Probe all hosts in parallel using threads
    let handles: Vec<_> = (1..255)
        .map(|i| {
            let device = Device { host: format!("{}.{}", subnet, i), port };
            let client = client.clone();
            std::thread::spawn(move || {
                let version = fetch_version(&client, &device).ok()?;
                Some((device, version))
            })
        })
        .collect();

    let mut devices = Vec::new();
    for handle in handles {
        if let Ok(Some((device, version))) = handle.join() {
            println!("  ✓ Found: {}", format!("{} v{}", device, version).green());
            devices.push((device, version));
        }
    }

    if devices.is_empty() {
        println!("{}", "❌ No devices found".red());
    } else {
        println!("\n📱 Found {} device(s)", devices.len());
    }
    devices
}

fn inspect(path: &Path) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let header = FirmwareHeader::parse(&data).context("not an ESP application image")?;

    println!("{} {} ({} bytes)", "Image".bold().blue(), path.display(), data.len());
    println!("  segments:      {}", header.segment_count);
    println!("  entry:         0x{:08x}", header.entry_addr);
    println!("  spi mode:      {}", header.spi_mode);
    println!("  chip id:       {}", header.chip_id);
    println!(
        "  chip rev:      {}..={}",
        header.min_chip_rev_full, header.max_chip_rev_full
    );
    println!("  hash appended: {}", header.hash_appended);

    match image::verify(&data) {
        Ok(summary) => {
            for (i, seg) in summary.segments.iter().enumerate() {
                println!(
                    "  [{}] load 0x{:08x}  len {:>7}  at offset 0x{:06x}",
                    i, seg.load_addr, seg.len, seg.offset
                );
            }
            println!("  {}", "checksum ok".green());
            if header.hash_appended {
                println!("  {}", "sha256 ok".green());
            }
        }
        Err(e) => println!("  {} {}", "verification failed:".red(), e),
    }
    Ok(())
}
