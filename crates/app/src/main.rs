use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lens_ocr::{list_providers, AnalyzerConfig, BackendRegistry, UploadOrchestrator, UploadRequest, UploadedImage};

mod logger;

#[derive(Debug, Parser)]
#[command(name = "receipt-lens", version, about = "Turn receipt photos into structured JSON")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging for the analyzer crates
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze one receipt photographed in one or more parts, top to bottom
    Analyze {
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Primary provider, overriding the configuration
        #[arg(short, long)]
        provider: Option<String>,

        /// API key for the primary provider
        #[arg(long)]
        credential: Option<String>,

        #[arg(long)]
        pretty: bool,
    },
    /// List supported providers
    Providers,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AnalyzerConfig> {
    let Some(path) = path else {
        return Ok(AnalyzerConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    AnalyzerConfig::from_toml(&content).with_context(|| format!("Invalid config file {}", path.display()))
}

async fn analyze(
    config: AnalyzerConfig,
    images: &[PathBuf],
    provider: Option<String>,
    credential: Option<String>,
) -> anyhow::Result<lens_core::StructuredReceipt> {
    let mut uploads = Vec::with_capacity(images.len());
    for path in images {
        uploads.push(
            UploadedImage::from_path(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?,
        );
    }

    let mut request = UploadRequest::new(uploads);
    if let Some(provider) = provider {
        request = request.with_provider(provider);
    }
    if let Some(credential) = credential {
        request = request.with_credential(credential);
    }
    let orchestrator = UploadOrchestrator::new(Arc::new(BackendRegistry::new(config)));
    Ok(orchestrator.process(request).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    match cli.command {
        Command::Providers => {
            for provider in list_providers() {
                let note = if provider.requires_credential() { "credential required" } else { "no credential needed" };
                println!("{provider:<14} {note}");
            }
        }
        Command::Analyze { images, provider, credential, pretty } => {
            let config = load_config(cli.config.as_deref())?;
            tracing::info!(images = images.len(), provider = %provider.as_deref().unwrap_or(&config.provider), "starting analysis");

            let receipt = analyze(config, &images, provider, credential).await?;
            let json = if pretty {
                serde_json::to_string_pretty(&receipt)?
            } else {
                serde_json::to_string(&receipt)?
            };
            println!("{json}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn analyze_requires_an_image() {
        assert!(Cli::try_parse_from(["receipt-lens", "analyze"]).is_err());
        let cli = Cli::try_parse_from(["receipt-lens", "analyze", "a.jpg", "b.jpg", "-p", "ocrspace", "-c", "lens.toml"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("lens.toml")));
        match cli.command {
            Command::Analyze { images, provider, .. } => {
                assert_eq!(images.len(), 2);
                assert_eq!(provider.as_deref(), Some("ocrspace"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn config_file_is_optional() {
        assert_eq!(load_config(None).unwrap(), AnalyzerConfig::default());
    }

    #[test]
    fn config_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lens.toml");
        std::fs::write(&path, "provider = \"ocrspace\"\nfallback_provider = \"local\"\n").unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().provider, "ocrspace");
    }

    #[test]
    fn missing_or_invalid_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.toml");
        let err = load_config(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "timeout_secs = \"soon\"").unwrap();
        let err = load_config(Some(&bad)).unwrap_err();
        assert!(err.to_string().contains("Invalid config file"));
    }

    #[tokio::test]
    async fn analyze_reports_unreadable_images() {
        let err = analyze(AnalyzerConfig::default(), &[PathBuf::from("/no/such/receipt.jpg")], None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read /no/such/receipt.jpg"), "{err}");
    }
}
