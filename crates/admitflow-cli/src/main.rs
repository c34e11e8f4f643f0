//! CLI binary for inspecting provider resolution and running one-off completions.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use admitflow_llm::{CompletionRequest, LlmInvoker, ProviderKind, ProviderProfile, Settings};
use admitflow_types::LlmError;

#[derive(Parser)]
#[command(name = "admitflow", version, about = "Resilient multi-provider LLM calls")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which providers are configured and how primary/fallback resolve
    Providers {
        /// Resolve as if this provider had been requested explicitly
        #[arg(long)]
        provider: Option<ProviderKind>,
    },

    /// Run a single completion through retry, fallback and cache
    Complete {
        /// Prompt text
        #[arg(short, long, conflicts_with = "prompt_file")]
        prompt: Option<String>,

        /// Read the prompt from a file ("-" for stdin)
        #[arg(long)]
        prompt_file: Option<PathBuf>,

        /// Maximum output tokens
        #[arg(long, default_value_t = CompletionRequest::DEFAULT_MAX_OUTPUT_TOKENS)]
        max_tokens: u32,

        /// Sampling temperature (0.0-2.0)
        #[arg(long, default_value_t = CompletionRequest::DEFAULT_TEMPERATURE)]
        temperature: f32,

        /// Ask for JSON and print the extracted value
        #[arg(long)]
        json: bool,

        /// Primary provider (groq, openai, gemini, huggingface)
        #[arg(long)]
        provider: Option<ProviderKind>,

        /// Do not try a fallback profile
        #[arg(long)]
        no_fallback: bool,

        /// Bypass the response cache
        #[arg(long)]
        no_cache: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::from_env().context("failed to load LLM settings")?;

    match cli.command {
        Commands::Providers { provider } => {
            cmd_providers(&settings, provider);
        }
        Commands::Complete {
            prompt,
            prompt_file,
            max_tokens,
            temperature,
            json,
            provider,
            no_fallback,
            no_cache,
        } => {
            let prompt = read_prompt(prompt, prompt_file.as_deref())?;
            let mut request = CompletionRequest::new(prompt)
                .with_max_output_tokens(max_tokens)
                .with_temperature(temperature);
            if json {
                request = request.json();
            }
            let options = CompleteOptions {
                provider,
                no_fallback,
                no_cache,
            };
            cmd_complete(&settings, &request, &options).await?;
        }
    }

    Ok(())
}

fn cmd_providers(settings: &Settings, explicit: Option<ProviderKind>) {
    println!("Providers:");
    for kind in ProviderKind::PRIORITY {
        let profile = settings.profile_for(kind);
        let status = if settings.is_configured(kind) {
            "configured"
        } else {
            "missing key"
        };
        println!(
            "  {:<12} {:<12} model={} key={} url={}",
            kind.as_str(),
            status,
            profile.model(),
            profile.redacted_key(),
            profile.endpoint_url().unwrap_or(profile.base_url()),
        );
    }

    let primary = settings.resolve_primary(explicit);
    let fallback = settings.resolve_fallback(&primary);
    println!();
    println!("Primary:  {}", describe(&primary));
    match fallback {
        Some(fallback) => println!("Fallback: {}", describe(&fallback)),
        None => println!("Fallback: (none)"),
    }
    println!("Timeout:  {}s", settings.timeout_secs);
    println!(
        "Cache:    {}",
        if settings.cache_disabled { "disabled" } else { "enabled" }
    );
    println!("Version:  {}", settings.pipeline_version);
}

fn describe(profile: &ProviderProfile) -> String {
    if profile.has_credentials() {
        profile.label()
    } else {
        format!("{} (no API key)", profile.label())
    }
}

struct CompleteOptions {
    provider: Option<ProviderKind>,
    no_fallback: bool,
    no_cache: bool,
}

async fn cmd_complete(
    settings: &Settings,
    request: &CompletionRequest,
    options: &CompleteOptions,
) -> anyhow::Result<()> {
    let mut invoker = LlmInvoker::from_settings(settings);
    if options.no_cache {
        invoker = invoker.without_cache();
    }

    let primary = settings.resolve_primary(options.provider);
    let fallback = if options.no_fallback {
        None
    } else {
        settings.resolve_fallback(&primary)
    };
    tracing::debug!(
        primary = %primary.label(),
        fallback = ?fallback.as_ref().map(ProviderProfile::label),
        "Resolved profiles"
    );

    if request.wants_json() {
        let value = invoker
            .invoke_json(request, &primary, fallback.as_ref())
            .await
            .map_err(explain)?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let result = invoker
        .complete(request, &primary, fallback.as_ref())
        .await
        .map_err(explain)?;
    if result.is_truncated() {
        tracing::warn!(
            provider = %result.provider,
            model = %result.model,
            "Output was truncated at the token limit"
        );
    }
    println!("{}", result.text);
    Ok(())
}

/// Attach a hint for failures a user can fix from the command line.
fn explain(err: LlmError) -> anyhow::Error {
    let hint = match &err {
        LlmError::Exhausted { failures } if failures.iter().all(|f| f.attempts == 0) => {
            Some("set at least one of GROQ_API_KEY, OPENAI_API_KEY, GEMINI_API_KEY, HF_API_KEY")
        }
        LlmError::InvalidRequest(_) => Some("check --prompt, --max-tokens and --temperature"),
        _ => None,
    };
    match hint {
        Some(hint) => anyhow::Error::new(err).context(hint),
        None => anyhow::Error::new(err),
    }
}

fn read_prompt(prompt: Option<String>, prompt_file: Option<&Path>) -> anyhow::Result<String> {
    match (prompt, prompt_file) {
        (Some(prompt), _) => Ok(prompt),
        (None, Some(path)) if path == Path::new("-") => {
            let mut buf = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)
                .context("failed to read prompt from stdin")?;
            Ok(buf)
        }
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read prompt file {}", path.display())),
        (None, None) => anyhow::bail!("one of --prompt or --prompt-file is required"),
    }
}
