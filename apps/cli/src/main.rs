use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    ClientEvent, HelpTopic, HttpCollationService, SessionContext, SessionCookies,
    TranscriptionController, WorkflowController,
};
use shared::{
    domain::{ExportFormat, ResultKind, WitnessEntry},
    protocol::CollationOptions,
};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Settings, DEFAULT_CONFIG_FILE};

#[derive(Parser, Debug)]
#[command(name = "collatex", about = "Drive a collation service session from the command line")]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long, global = true)]
    base_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register witnesses, collate them and fetch the result.
    Collate {
        #[arg(long)]
        name: String,
        #[arg(long)]
        language: String,
        #[arg(long = "file", required = true)]
        files: Vec<PathBuf>,
        /// Override a sigil: `<text id or title>=<sigil>`.
        #[arg(long = "sigil", value_parser = parse_key_value)]
        sigla: Vec<(String, String)>,
        /// Leave a registered text out of the collation (text id or title).
        #[arg(long = "exclude")]
        exclude: Vec<String>,
        /// Algorithm option forwarded to the service: `<key>=<value>`.
        #[arg(long = "option", value_parser = parse_key_value)]
        options: Vec<(String, String)>,
        #[arg(long, value_enum, default_value_t = ResultArg::Display)]
        result: ResultArg,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// List the texts registered in the current session.
    Texts,
    /// Convert a marked-up transcription.
    Convert {
        #[arg(long)]
        markup: PathBuf,
        #[arg(long)]
        language: Option<String>,
    },
    /// Clear the transcription session and print the fresh XML template.
    ClearTranscription,
    /// Download the transcription session.
    Export {
        #[arg(value_enum)]
        format: ExportArg,
        #[arg(long)]
        output: PathBuf,
    },
    /// Explain a form field (text_name, text_language, select_files).
    Topic { topic: Option<String> },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ResultArg {
    Download,
    Display,
}

impl From<ResultArg> for ResultKind {
    fn from(value: ResultArg) -> Self {
        match value {
            ResultArg::Download => ResultKind::Download,
            ResultArg::Display => ResultKind::Display,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExportArg {
    Xml,
    Json,
}

impl From<ExportArg> for ExportFormat {
    fn from(value: ExportArg) -> Self {
        match value {
            ExportArg::Xml => ExportFormat::Xml,
            ExportArg::Json => ExportFormat::Json,
        }
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <key>=<value>, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    if let Command::Topic { topic } = &cli.command {
        return print_topic(topic.as_deref());
    }

    let mut settings = load_settings(&cli.config)?;
    if let Some(base_url) = cli.base_url {
        settings.base_url = base_url;
    }

    let session = CliSession::open(&settings)?;
    let outcome = execute(cli.command, &settings, &session).await;
    session.persist();
    outcome
}

async fn execute(command: Command, settings: &Settings, session: &CliSession) -> Result<()> {
    match command {
        Command::Collate {
            name,
            language,
            files,
            sigla,
            exclude,
            options,
            result,
            output,
        } => {
            let controller = session.workflow_controller(settings);
            let run = CollationRun {
                name,
                language,
                files,
                sigla,
                exclude,
                options: options.into_iter().collect(),
                result: result.into(),
                output,
            };
            reporting(controller.subscribe_events(), run_collation(&controller, run)).await
        }
        Command::Texts => {
            let controller = session.workflow_controller(settings);
            reporting(controller.subscribe_events(), async {
                let entries = controller
                    .refresh_registered_texts()
                    .await
                    .context("failed to list registered texts")?;
                if entries.is_empty() {
                    println!("no texts registered");
                }
                for entry in entries {
                    println!("{}\t{}\t{}", entry.text_id, entry.auto_sigil, entry.title);
                }
                Ok::<_, anyhow::Error>(())
            })
            .await
        }
        Command::Convert { markup, language } => {
            let controller = session.transcription_controller(settings);
            reporting(controller.subscribe_events(), async {
                let markup = tokio::fs::read_to_string(&markup)
                    .await
                    .with_context(|| format!("failed to read '{}'", markup.display()))?;
                controller.set_markup(markup).await;
                controller.set_language(language).await;
                let converted = controller
                    .convert()
                    .await
                    .context("transcription conversion failed")?;
                println!("sigil: {}", converted.textsigil);
                println!("identifier: {}", converted.textidentifier);
                println!("description: {}", converted.textdescription);
                for warning in &converted.warnings {
                    println!("warning: {warning}");
                }
                println!();
                println!("{}", converted.textcontent);
                Ok::<_, anyhow::Error>(())
            })
            .await
        }
        Command::ClearTranscription => {
            let controller = session.transcription_controller(settings);
            reporting(controller.subscribe_events(), async {
                let template = controller
                    .clear()
                    .await
                    .context("failed to clear transcription session")?;
                println!("{template}");
                Ok::<_, anyhow::Error>(())
            })
            .await
        }
        Command::Export { format, output } => {
            let controller = session.transcription_controller(settings);
            reporting(controller.subscribe_events(), async {
                let bytes = controller
                    .download(format.into())
                    .await
                    .context("failed to download session")?;
                write_output(&output, &bytes).await?;
                info!(path = %output.display(), bytes = bytes.len(), "session exported");
                Ok::<_, anyhow::Error>(())
            })
            .await
        }
        Command::Topic { topic } => print_topic(topic.as_deref()),
    }
}

fn print_topic(topic: Option<&str>) -> Result<()> {
    match topic {
        Some(topic) => {
            let topic: HelpTopic = topic.parse()?;
            println!("{}", topic.text());
        }
        None => {
            for topic in HelpTopic::ALL {
                println!("{topic}: {}", topic.text());
            }
        }
    }
    Ok(())
}

/// One HTTP client per run, sharing a cookie jar that is saved on exit so the
/// next command continues the same service session.
struct CliSession {
    service: Arc<HttpCollationService>,
    cookies: SessionCookies,
}

impl CliSession {
    fn open(settings: &Settings) -> Result<Self> {
        let cookies = SessionCookies::load(&settings.cookie_file).with_context(|| {
            format!("failed to load session cookies '{}'", settings.cookie_file.display())
        })?;
        let service = HttpCollationService::with_cookie_jar(
            settings.endpoints()?,
            settings.request_timeout(),
            cookies.jar(),
        )?;
        Ok(Self {
            service: Arc::new(service),
            cookies,
        })
    }

    fn workflow_controller(&self, settings: &Settings) -> Arc<WorkflowController> {
        WorkflowController::with_dismiss_after(
            self.service.clone(),
            SessionContext::new(settings.base_url.clone()),
            settings.notice_dismiss_after(),
        )
    }

    fn transcription_controller(&self, settings: &Settings) -> Arc<TranscriptionController> {
        TranscriptionController::with_dismiss_after(
            self.service.clone(),
            settings.notice_dismiss_after(),
        )
    }

    fn persist(&self) {
        let endpoints = self.service.endpoints();
        if let Err(err) = self
            .cookies
            .save([&endpoints.base_url, &endpoints.transcription_base_url])
        {
            warn!(path = %self.cookies.path().display(), %err, "failed to save session cookies");
        }
    }
}

/// Runs `work`, then prints every notice it raised, whether or not it failed.
async fn reporting<T>(
    mut events: broadcast::Receiver<ClientEvent>,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    let outcome = work.await;
    for line in pending_notices(&mut events) {
        eprintln!("{line}");
    }
    outcome
}

fn pending_notices(events: &mut broadcast::Receiver<ClientEvent>) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        match events.try_recv() {
            Ok(ClientEvent::Notice(notice)) => lines.push(notice.banner_text()),
            Ok(ClientEvent::SessionReloaded) => lines.push(
                "The session expired and was restarted; please run the command again."
                    .to_string(),
            ),
            Ok(_) => {}
            Err(TryRecvError::Lagged(skipped)) => warn!(skipped, "dropped client events"),
            Err(_) => break,
        }
    }
    lines
}

struct CollationRun {
    name: String,
    language: String,
    files: Vec<PathBuf>,
    sigla: Vec<(String, String)>,
    exclude: Vec<String>,
    options: CollationOptions,
    result: ResultKind,
    output: Option<PathBuf>,
}

fn matches_entry(entry: &WitnessEntry, key: &str) -> bool {
    entry.text_id.as_str() == key || entry.title == key
}

async fn run_collation(controller: &WorkflowController, run: CollationRun) -> Result<()> {
    controller.initialize().await;
    controller
        .list_uploads()
        .await
        .context("failed to load existing uploads")?;
    controller
        .set_name_and_language(&run.name, &run.language)
        .await
        .context("failed to set name and language")?;

    for path in &run.files {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("'{}' has no usable file name", path.display()))?;
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        controller
            .upload_witness(filename, bytes)
            .await
            .with_context(|| format!("failed to upload '{}'", path.display()))?;
    }

    let entries = controller.snapshot().await.entries;
    if entries.is_empty() {
        bail!("the service registered no texts from the uploaded files");
    }
    for (key, sigil) in &run.sigla {
        let Some(entry) = entries.iter().find(|entry| matches_entry(entry, key)) else {
            bail!("no registered text matches '{key}'");
        };
        controller.set_sigil(&entry.text_id, sigil.clone()).await?;
    }
    for key in &run.exclude {
        let Some(entry) = entries.iter().find(|entry| matches_entry(entry, key)) else {
            bail!("no registered text matches '{key}'");
        };
        controller.set_included(&entry.text_id, false).await?;
    }

    for entry in controller.snapshot().await.entries {
        let marker = if entry.included { "+" } else { "-" };
        info!(
            %marker,
            text = %entry.text_id,
            sigil = %entry.sigil,
            title = %entry.title,
            "witness"
        );
    }

    controller
        .collate(run.options)
        .await
        .context("collation failed")?;
    let result = controller
        .get_result(run.result)
        .await
        .context("failed to fetch collation result")?;

    match &run.output {
        Some(path) => {
            write_output(path, &result.body).await?;
            info!(path = %path.display(), bytes = result.body.len(), "result written");
        }
        None => {
            if result.kind == ResultKind::Download {
                warn!("writing a download result to stdout; pass --output to save it");
            }
            println!("{}", result.body_text());
        }
    }
    Ok(())
}

async fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("failed to write '{}'", path.display()))
}
