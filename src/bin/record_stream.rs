use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures::StreamExt;

use boardroom::api::{CouncilApi, HttpCouncilApi};
use boardroom::config::{self, API_BASE_ENV, CONFIG_PATH};
use boardroom::replay::{BODY_SEPARATOR, ReplayCase};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cases_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/cases");
    let config = config::load(Path::new(CONFIG_PATH))?
        .with_overrides(std::env::var(API_BASE_ENV).ok(), None);
    let api = HttpCouncilApi::new(&config)?;
    eprintln!("Backend: {}", api.base_url());

    let names: Vec<String> = if args.len() > 1 {
        args[1..].to_vec()
    } else {
        // Record all cases
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&cases_dir)?
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();
        paths
            .iter()
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()))
            .map(str::to_string)
            .collect()
    };

    for name in &names {
        eprintln!("Recording: {name}");
        record_case(&api, &cases_dir, name).await?;
        eprintln!("  Done: {name}.sse");
    }
    Ok(())
}

async fn record_case(api: &HttpCouncilApi, cases_dir: &Path, name: &str) -> Result<()> {
    let toml_path = cases_dir.join(format!("{name}.toml"));
    let sse_path = cases_dir.join(format!("{name}.sse"));

    let toml_content = std::fs::read_to_string(&toml_path)
        .with_context(|| format!("Failed to read {}", toml_path.display()))?;
    let case: ReplayCase = toml::from_str(&toml_content)?;

    // Scratch conversation, removed once the bodies are captured.
    let conversation = api.create_conversation().await?;
    let mut bodies = Vec::new();
    for content in case.sends() {
        let mut chunks = api.open_message_stream(&conversation.id, content).await?;
        let mut body = Vec::new();
        while let Some(chunk) = chunks.next().await {
            body.extend_from_slice(&chunk?);
        }
        bodies.push(String::from_utf8(body).context("response body is not UTF-8")?);
    }
    api.delete_conversation(&conversation.id).await.ok();

    std::fs::write(&sse_path, bodies.join(BODY_SEPARATOR))
        .with_context(|| format!("Failed to write {}", sse_path.display()))?;
    Ok(())
}
