use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use faceauth_core::{FaceEncoder, OnnxFaceEncoder};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "faceauth", about = "Face registration and authentication CLI")]
struct Cli {
    /// Base URL of the faceauthd server
    #[arg(long, env = "FACEAUTH_URL", default_value = "http://localhost:5001", global = true)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register (or replace) the face for a user
    Register {
        /// User identifier
        #[arg(short, long)]
        user: String,
        /// Image containing exactly one face
        image: PathBuf,
    },
    /// Find which registered user an image belongs to
    Authenticate {
        image: PathBuf,
    },
    /// Check that the server is up
    Health,
    /// Encode an image locally and print the feature vector (bypasses the server)
    Encode {
        image: PathBuf,
        /// Directory containing det_10g.onnx and w600k_r50.onnx
        #[arg(long, env = "FACEAUTH_MODEL_DIR")]
        model_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let base = cli.server.trim_end_matches('/');
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Register { user, image } => {
            let form = Form::new().text("userId", user).part("image", image_part(&image)?);
            let body = send(client.post(format!("{base}/register")).multipart(form)).await?;
            println!("{}", body["message"].as_str().unwrap_or("registered"));
        }
        Commands::Authenticate { image } => {
            let form = Form::new().part("image", image_part(&image)?);
            let body = send(client.post(format!("{base}/authenticate")).multipart(form)).await?;
            match body["userId"].as_str() {
                Some(user) => println!("{user}"),
                None => bail!("server response missing userId: {body}"),
            }
        }
        Commands::Health => {
            let body = send(client.get(format!("{base}/health"))).await?;
            println!("{}", body["status"].as_str().unwrap_or("unknown"));
        }
        Commands::Encode { image, model_dir } => {
            let model_dir = model_dir.unwrap_or_else(faceauth_core::default_model_dir);
            let mut encoder = OnnxFaceEncoder::load(&model_dir)
                .with_context(|| format!("loading models from {}", model_dir.display()))?;
            let vector = encoder
                .encode_file(&image)
                .with_context(|| format!("encoding {}", image.display()))?;
            println!(
                "{}",
                serde_json::json!({
                    "image": image.display().to_string(),
                    "dim": vector.len(),
                    "vector": vector,
                })
            );
        }
    }

    Ok(())
}

fn image_part(path: &Path) -> Result<Part> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    Ok(Part::bytes(bytes).file_name(file_name))
}

/// Send the request and return its JSON body; non-2xx responses become errors
/// carrying the server's message.
async fn send(request: reqwest::RequestBuilder) -> Result<Value> {
    let response = request.send().await.context("request failed")?;
    let status = response.status();
    let body: Value = response.json().await.context("response was not JSON")?;
    tracing::debug!(%status, %body, "server response");

    if !status.is_success() {
        let message = body["message"].as_str().unwrap_or("no message");
        bail!("{} {message}", status.as_u16());
    }
    Ok(body)
}
