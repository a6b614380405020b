use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::engine::general_purpose;
use base64::Engine as _;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "turnstile", about = "Turnstile attendance CLI")]
struct Cli {
    /// Base URL of the turnstiled HTTP API.
    #[arg(long, default_value = "http://127.0.0.1:8088", global = true)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity from image files
    Enroll {
        /// Identity code (e.g., an employee number)
        code: String,
        /// Image files, one per frame
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Replace the identity's existing templates
        #[arg(long)]
        replace: bool,
    },
    /// Recognize a face at a location and print the verdict
    Recognize {
        image: PathBuf,
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lng: f64,
        /// Reported GPS accuracy in meters
        #[arg(long, default_value_t = 0.0)]
        accuracy: f64,
        /// Attendance kind, e.g. checkin or checkout
        #[arg(long, default_value = "checkin")]
        kind: String,
        /// Per-call match threshold override in (0, 1)
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// List enrolled identity codes
    Faces,
    /// Clear every enrolled template
    Reset,
    /// Show the configured sites
    Sites,
    /// Replace the site registry from a JSON file: {"sites": [...]}
    SetSites { file: PathBuf },
    /// Download the attendance log
    Attendance,
    /// Show daemon status
    Status,
}

fn encode_image(path: &PathBuf) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("cannot read image {}", path.display()))?;
    Ok(general_purpose::STANDARD.encode(bytes))
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.server.trim_end_matches('/').to_string();

    match cli.command {
        Commands::Enroll { code, images, replace } => {
            let images = images
                .iter()
                .map(encode_image)
                .collect::<Result<Vec<_>>>()?;
            let body: serde_json::Value = client
                .post(format!("{base}/api/enroll"))
                .json(&serde_json::json!({ "code": code, "images": images, "replace": replace }))
                .send()
                .await?
                .json()
                .await?;
            print_json(&body);
        }
        Commands::Recognize { image, lat, lng, accuracy, kind, threshold } => {
            let mut payload = serde_json::json!({
                "image": encode_image(&image)?,
                "type": kind,
                "lat": lat,
                "lng": lng,
                "accuracy": accuracy,
            });
            if let Some(t) = threshold {
                payload["threshold"] = serde_json::json!(t);
            }
            let body: serde_json::Value = client
                .post(format!("{base}/api/recognize"))
                .json(&payload)
                .send()
                .await?
                .json()
                .await?;
            print_json(&body);
        }
        Commands::Faces => {
            let body: serde_json::Value =
                client.get(format!("{base}/api/faces")).send().await?.json().await?;
            print_json(&body);
        }
        Commands::Reset => {
            let body: serde_json::Value =
                client.post(format!("{base}/api/reset")).send().await?.json().await?;
            print_json(&body);
        }
        Commands::Sites => {
            let body: serde_json::Value =
                client.get(format!("{base}/api/sites")).send().await?.json().await?;
            print_json(&body);
        }
        Commands::SetSites { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let payload: serde_json::Value =
                serde_json::from_str(&raw).context("sites file is not valid JSON")?;
            let body: serde_json::Value = client
                .put(format!("{base}/api/sites"))
                .json(&payload)
                .send()
                .await?
                .json()
                .await?;
            print_json(&body);
        }
        Commands::Attendance => {
            let csv = client
                .get(format!("{base}/api/attendance.csv"))
                .send()
                .await?
                .text()
                .await?;
            print!("{csv}");
        }
        Commands::Status => {
            let body: serde_json::Value =
                client.get(format!("{base}/health")).send().await?.json().await?;
            print_json(&body);
        }
    }

    Ok(())
}
