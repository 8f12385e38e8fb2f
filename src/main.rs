mod cli;

use std::fs::File;
use std::io::BufReader;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, ReplayArgs};
use llmtap::provider::{AnthropicChunk, OpenAiChunk};
use llmtap::sse::{read_chunks, SseChunkStream};
use llmtap::{
    CallMetadata, ProviderChunk, ProviderOutput, ProviderType, RequestId, TrackError, Tracker,
    TrackerConfig,
};

/// Size of the pieces a capture is cut into for the async replay, to
/// mimic network reads.
const REPLAY_READ_SIZE: usize = 512;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => init(force),
        Command::Replay(args) => {
            let tracker = load_tracker()?;
            match args.provider {
                ProviderType::OpenAi => replay::<OpenAiChunk>(&tracker, &args),
                ProviderType::Anthropic => replay::<AnthropicChunk>(&tracker, &args),
            }
        }
        Command::Score {
            request_id,
            score,
            name,
        } => {
            let tracker = load_tracker()?;
            let request_id = RequestId(request_id);
            let tracked = tracker
                .backend()
                .track_score(&request_id, score, name.as_deref())?;
            println!("score tracked: {}", tracked);
            Ok(())
        }
        Command::Metadata { request_id, pairs } => {
            let tracker = load_tracker()?;
            let metadata: Map<String, Value> = pairs
                .into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect();
            let tracked = tracker
                .backend()
                .track_metadata(&RequestId(request_id), &metadata);
            println!("metadata tracked: {}", tracked);
            Ok(())
        }
        Command::Prompt {
            name,
            version,
            label,
        } => {
            let tracker = load_tracker()?;
            let template = tracker
                .backend()
                .get_prompt(&name, version, label.as_deref())
                .with_context(|| format!("failed to fetch prompt '{}'", name))?;
            println!("{}", serde_json::to_string_pretty(&template)?);
            Ok(())
        }
    }
}

fn init(force: bool) -> Result<()> {
    let path = TrackerConfig::config_path()?;
    if path.exists() && !force {
        println!("[Config] {} already exists (use --force to overwrite)", path.display());
        return Ok(());
    }
    let path = TrackerConfig::save_default()?;
    println!("[Config] Created default config: {}", path.display());
    println!("[Config] Set api_key there or export LLMTAP_API_KEY");
    Ok(())
}

fn load_tracker() -> Result<Tracker> {
    let config = TrackerConfig::load().context("failed to load config")?;
    Ok(Tracker::from_config(&config)?)
}

fn replay_call(args: &ReplayArgs, provider: ProviderType) -> CallMetadata {
    let function_name = args.function_name.clone().unwrap_or_else(|| match provider {
        ProviderType::OpenAi => "openai.chat.completions.create".to_string(),
        ProviderType::Anthropic => "anthropic.messages.create".to_string(),
    });
    CallMetadata::new(function_name, provider)
        .kwarg("stream", Value::Bool(true))
        .tags(args.tags.iter().cloned())
        .return_request_id(args.request_id)
}

fn replay<C>(tracker: &Tracker, args: &ReplayArgs) -> Result<()>
where
    C: ProviderChunk + DeserializeOwned + Serialize,
{
    if args.use_async {
        return replay_async::<C>(tracker, args);
    }

    let file = File::open(&args.file)
        .with_context(|| format!("failed to open capture {}", args.file.display()))?;
    let chunks = read_chunks::<C, _>(BufReader::new(file));

    let handled = tracker.track(replay_call(args, C::PROVIDER), || {
        Ok::<_, TrackError>(ProviderOutput::<Value, _>::Stream(chunks))
    })?;
    let proxy = handled
        .into_stream()
        .context("replayed capture was not treated as a stream")?;

    if args.text && !args.request_id {
        for text in proxy.text_stream() {
            print_text(text);
        }
    } else {
        for (item, request_id) in proxy.with_request_ids() {
            print_item(args, item)?;
            print_request_id(args, request_id);
        }
    }
    if args.text {
        println!();
    }
    Ok(())
}

fn replay_async<C>(tracker: &Tracker, args: &ReplayArgs) -> Result<()>
where
    C: ProviderChunk + DeserializeOwned + Serialize,
{
    let capture = std::fs::read(&args.file)
        .with_context(|| format!("failed to read capture {}", args.file.display()))?;
    let pieces: Vec<std::result::Result<Bytes, std::io::Error>> = capture
        .chunks(REPLAY_READ_SIZE)
        .map(|piece| Ok(Bytes::copy_from_slice(piece)))
        .collect();

    let runtime = tokio::runtime::Runtime::new().context("failed to start the async runtime")?;
    runtime.block_on(async {
        let chunks = SseChunkStream::<_, C>::new(futures_util::stream::iter(pieces));
        let handled = tracker
            .track_async(replay_call(args, C::PROVIDER), async {
                Ok::<_, TrackError>(ProviderOutput::<Value, _>::Stream(chunks))
            })
            .await?;
        let proxy = handled
            .into_stream()
            .context("replayed capture was not treated as a stream")?;

        if args.text && !args.request_id {
            let mut text = std::pin::pin!(proxy.text_stream());
            while let Some(text) = text.next().await {
                print_text(text);
            }
        } else {
            let mut pairs = std::pin::pin!(proxy.with_request_ids());
            while let Some((item, request_id)) = pairs.next().await {
                print_item(args, item)?;
                print_request_id(args, request_id);
            }
        }
        if args.text {
            println!();
        }
        Ok::<(), anyhow::Error>(())
    })
}

fn print_text(text: llmtap::Result<String>) {
    match text {
        Ok(text) => print!("{}", text),
        Err(e) => warn!(error = %e, "skipping undecodable chunk"),
    }
}

/// Print one chunk as JSON, or only its text when the request id has to
/// follow the terminal chunk.
fn print_item<C>(args: &ReplayArgs, item: llmtap::Result<C>) -> Result<()>
where
    C: ProviderChunk + Serialize,
{
    let chunk = match item {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(error = %e, "skipping undecodable chunk");
            return Ok(());
        }
    };
    if args.text {
        if let Some(text) = chunk.delta().text {
            print!("{}", text);
        }
    } else {
        println!("{}", serde_json::to_string(&chunk)?);
    }
    Ok(())
}

fn print_request_id(args: &ReplayArgs, request_id: Option<RequestId>) {
    if !args.request_id {
        return;
    }
    if let Some(request_id) = request_id {
        if args.text {
            println!();
        }
        println!("request_id: {}", request_id);
    }
}
