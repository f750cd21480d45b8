use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser};
use tokio_util::sync::CancellationToken;

use ooxml_translator::events::{EventSink, Stage, TranslateEvent};
use ooxml_translator::pipeline::{
    init_default_config, DocumentState, Overrides, PipelineConfig, Translator,
};
use ooxml_translator::progress::ConsoleProgress;

#[derive(Parser, Debug)]
#[command(name = "ooxml-translator")]
#[command(about = "Translate .xlsx / .docx text through an OpenAI-compatible LLM, keeping the package intact", long_about = None)]
struct Args {
    /// Write a commented default config file, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory for --init-config (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite an existing config file when used with --init-config
    #[arg(long)]
    force: bool,

    /// Input .xlsx / .docx files
    #[arg(value_name = "FILE")]
    inputs: Vec<PathBuf>,

    /// Output file (single input only; default: <input_stem>_translated.<ext>)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Config file path (default: $OOXML_TRANSLATOR_CONFIG, then ooxml-translator.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model name (overrides [llm].model)
    #[arg(long)]
    model: Option<String>,

    /// API base URL (overrides [llm].base_url)
    #[arg(long)]
    base_url: Option<String>,

    /// Maximum concurrent requests (overrides [client].max_concurrent_requests)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Translate all meaningful text, not only text containing CJK characters
    #[arg(long)]
    all_text: bool,

    /// Keep going when a part cannot be translated; the part is left as-is
    #[arg(long)]
    continue_on_engine_failure: bool,

    /// Translate workbooks in phases: sheet names, cells, shapes
    #[arg(long)]
    workbook_phases: bool,

    /// Print every translated pair
    #[arg(short, long)]
    verbose: bool,
}

fn default_output_for(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    let ext = input.extension().and_then(|e| e.to_str()).unwrap_or("docx");
    input.with_file_name(format!("{stem}_translated.{ext}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    if args.inputs.is_empty() {
        let mut cmd = Args::command();
        cmd.print_help().context("print help")?;
        eprintln!(
            "\n\nUSAGE:\n  ooxml-translator <book.xlsx> [more.docx ...]\n\nTIPS:\n  - Run with --init-config to create ooxml-translator.toml.\n  - The API key can come from $OOXML_TRANSLATOR_API_KEY or $OPENAI_API_KEY.\n"
        );
        return Ok(());
    }
    if args.output.is_some() && args.inputs.len() > 1 {
        bail!("-o/--output can only be used with a single input");
    }

    let overrides = Overrides {
        model: args.model.clone(),
        base_url: args.base_url.clone(),
        concurrency: args.concurrency,
        all_text: args.all_text,
        continue_on_engine_failure: args.continue_on_engine_failure,
        workbook_phases: args.workbook_phases,
    };
    let (cfg, cfg_file) =
        PipelineConfig::from_paths_and_args(&args.inputs[0], args.config.clone(), &overrides)
            .context("build config")?;
    match &cfg_file {
        Some(p) => log::info!("config: {}", p.display()),
        None => log::info!("no config file found, using defaults"),
    }
    if cfg.api_key.is_empty() {
        log::warn!("no API key configured; requests are sent without authorization");
    }

    let progress = ConsoleProgress::new(true).verbose(args.verbose);
    let (events, mut rx) = EventSink::channel(256);
    let translator = match Translator::new(&cfg, events) {
        Ok(t) => t,
        Err(err) => {
            progress.render(&TranslateEvent::Error {
                stage: Stage::Init,
                kind: err.kind(),
                message: err.to_string(),
            });
            return Err(err).context("init translator");
        }
    };
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            progress.render(&event);
        }
    });

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let jobs: Vec<(PathBuf, PathBuf)> = args
        .inputs
        .iter()
        .map(|input| {
            let output = args
                .output
                .clone()
                .unwrap_or_else(|| default_output_for(input));
            (input.clone(), output)
        })
        .collect();
    let outcomes = translator.translate_documents(&jobs, &cancel).await;
    drop(translator);
    let _ = printer.await;

    if outcomes.iter().any(|o| o.state == DocumentState::Cancelled) {
        bail!("cancelled");
    }
    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    if failed > 0 {
        bail!("{failed} of {} documents failed", outcomes.len());
    }
    Ok(())
}
