mod batch;
mod draw;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use crossterm::cursor;
use crossterm::event;
use crossterm::terminal;
use directories::ProjectDirs;
use docscope_core::view::parse_min_score;
use docscope_core::{
    AnalysisError, AnalysisResult, AnalysisService, Command, Config, IncomingFile, SortDirection,
    SortKey, SortOrder, Workspace,
};
use docscope_render::{HttpAnalysisService, PdfiumProvider};
use docscope_tty::{EventMapper, InputMode, KittyRenderer, PromptKind, UiEvent};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::batch::BatchReport;
use crate::draw::{redraw, ResultsWindow};

#[derive(Debug, Parser)]
#[command(
    name = "docscope",
    version,
    about = "Topic analysis of PDF documents in the terminal"
)]
struct Args {
    /// Topic to analyze; repeat for several
    #[arg(short = 't', long = "topic")]
    topics: Vec<String>,

    /// Minimum similarity score sent with the analysis request (0.0 to 1.0)
    #[arg(long = "min-score")]
    min_score: Option<f32>,

    /// Let the service suggest topics on the first run
    #[arg(long)]
    generate_topics: bool,

    /// Base URL of the analysis service
    #[arg(long)]
    analyzer_url: Option<String>,

    /// Configuration file to use instead of the platform default
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run one analysis, print the results as JSON and exit
    #[arg(long)]
    batch: bool,

    /// Sort key of the result list
    #[arg(long, value_enum)]
    sort: Option<SortArg>,

    /// Sort the result list in ascending order
    #[arg(long)]
    asc: bool,

    /// PDF files to analyze
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Score,
    Page,
    File,
}

impl From<SortArg> for SortKey {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Score => SortKey::Score,
            SortArg::Page => SortKey::Page,
            SortArg::File => SortKey::File,
        }
    }
}

impl Args {
    fn sort_order(&self) -> SortOrder {
        SortOrder {
            key: self.sort.map(SortKey::from).unwrap_or_default(),
            direction: if self.asc {
                SortDirection::Asc
            } else {
                SortDirection::Desc
            },
        }
    }
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = Config::project_dirs()
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs, args.batch)?;

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(url) = &args.analyzer_url {
        config.analyzer_url = url.trim_end_matches('/').to_string();
    }
    info!(analyzer = %config.analyzer_url, files = args.files.len(), "starting");

    let mut workspace = Workspace::new(&config);
    configure_workspace(&mut workspace, &args)?;

    let incoming = read_files(&args.files)?;
    match workspace.add_files(incoming) {
        Ok(outcome) if args.batch => {
            for skipped in &outcome.skipped {
                eprintln!("{skipped}");
            }
        }
        Err(err) if args.batch => return Err(err.into()),
        _ => {}
    }

    let service = Arc::new(HttpAnalysisService::from_config(&config)?);

    let provider = match PdfiumProvider::new(config.pdfium_library.as_deref()) {
        Ok(provider) => provider,
        Err(err) if args.batch => {
            warn!(?err, "continuing without page counts");
            return run_batch(&mut workspace, service.as_ref()).await;
        }
        Err(err) => return Err(err),
    };
    for failure in workspace.load_documents(&provider).await {
        if args.batch {
            eprintln!("{failure}");
        }
    }

    if args.batch {
        return run_batch(&mut workspace, service.as_ref()).await;
    }

    run_interactive(workspace, service, provider).await
}

fn configure_workspace(workspace: &mut Workspace, args: &Args) -> Result<()> {
    for topic in &args.topics {
        workspace.apply(Command::AddTopic {
            label: topic.clone(),
        })?;
    }
    if let Some(min_score) = args.min_score {
        workspace.set_threshold(min_score)?;
    }
    workspace.set_generate_topics(args.generate_topics);
    workspace.apply(Command::SetSort {
        sort: args.sort_order(),
    })?;
    workspace.clear_notice();
    Ok(())
}

fn read_files(paths: &[PathBuf]) -> Result<Vec<IncomingFile>> {
    paths
        .iter()
        .map(|path| {
            let bytes = fs::read(path).with_context(|| format!("failed to read {:?}", path))?;
            Ok(IncomingFile::new(display_name(path), bytes))
        })
        .collect()
}

/// The service reports passages by file name, so only the final path
/// component is kept.
fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn run_batch<S>(workspace: &mut Workspace, service: &S) -> Result<()>
where
    S: AnalysisService + ?Sized,
{
    workspace.run_analysis(service).await?;
    let report = BatchReport::from_workspace(workspace)
        .ok_or_else(|| anyhow!("analysis finished without a result"))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

type PendingAnalysis = JoinHandle<Result<AnalysisResult, AnalysisError>>;

async fn run_interactive(
    mut workspace: Workspace,
    service: Arc<HttpAnalysisService>,
    provider: PdfiumProvider,
) -> Result<()> {
    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut renderer = KittyRenderer::new(stdout);
    let mut mapper = EventMapper::new();
    let mut results: Option<ResultsWindow> = None;
    let mut pending: Option<PendingAnalysis> = None;
    let events = workspace.events();
    let mut dirty = true;

    loop {
        if pending.as_ref().is_some_and(JoinHandle::is_finished) {
            if let Some(handle) = pending.take() {
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    Err(err) => Err(AnalysisError::Transport(err.to_string())),
                };
                // The failure is already recorded as the workspace notice.
                let _ = workspace.complete_analysis(outcome);
                dirty = true;
            }
        }

        let drained = std::mem::take(&mut *events.lock());
        if !drained.is_empty() {
            for event in &drained {
                debug!(?event, "workspace event");
            }
            dirty = true;
        }

        if dirty {
            let pending_input = mapper.pending_input();
            redraw(
                &mut renderer,
                &workspace,
                pending_input.as_deref(),
                results.as_mut(),
            )?;
            dirty = false;
        }

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let ui_event = mapper.map_event(event::read()?);
        let action = handle_event(
            ui_event,
            &mut workspace,
            &mut results,
            &mut mapper,
            &mut pending,
            &service,
        );
        if !workspace.registry().pending().is_empty() {
            workspace.load_documents(&provider).await;
            dirty = true;
        }
        match action {
            LoopAction::ContinueRedraw => dirty = true,
            LoopAction::Continue => {}
            LoopAction::Quit => break,
        }
    }

    if let Some(handle) = pending {
        handle.abort();
    }
    renderer.delete_image()?;
    renderer.clear_all()?;
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

fn handle_event(
    event: UiEvent,
    workspace: &mut Workspace,
    results: &mut Option<ResultsWindow>,
    mapper: &mut EventMapper,
    pending: &mut Option<PendingAnalysis>,
    service: &Arc<HttpAnalysisService>,
) -> LoopAction {
    match event {
        UiEvent::Command(command) => {
            let resets_selection = matches!(
                command,
                Command::NextResultsPage
                    | Command::PrevResultsPage
                    | Command::CycleSortKey
                    | Command::ToggleSortDirection
                    | Command::ClearTopicFilter
                    | Command::SetFileFilter { .. }
            );
            if workspace.apply(command).is_ok() && resets_selection {
                if let Some(window) = results.as_mut() {
                    window.selected = 0;
                }
            }
            LoopAction::ContinueRedraw
        }
        UiEvent::BeginPrompt(_) | UiEvent::PromptChanged { .. } | UiEvent::PromptCancel => {
            LoopAction::ContinueRedraw
        }
        UiEvent::PromptSubmit { kind, text } => {
            submit_prompt(workspace, kind, &text);
            LoopAction::ContinueRedraw
        }
        UiEvent::StartAnalysis => {
            if pending.is_some() {
                workspace.set_notice(AnalysisError::AlreadyRunning.to_string());
                return LoopAction::ContinueRedraw;
            }
            if let Ok(request) = workspace.begin_analysis() {
                let service = Arc::clone(service);
                *pending = Some(tokio::spawn(async move { service.analyze(&request).await }));
            }
            LoopAction::ContinueRedraw
        }
        UiEvent::ToggleGenerateTopics => {
            let enabled = !workspace.analysis().generate_topics();
            workspace.set_generate_topics(enabled);
            LoopAction::ContinueRedraw
        }
        UiEvent::RemoveCurrentFile => match workspace.view().current_file {
            Some(index) => {
                let _ = workspace.apply(Command::RemoveFile { index });
                LoopAction::ContinueRedraw
            }
            None => LoopAction::Continue,
        },
        UiEvent::OpenResults => {
            *results = Some(ResultsWindow::default());
            LoopAction::ContinueRedraw
        }
        UiEvent::CloseOverlay => {
            *results = None;
            LoopAction::ContinueRedraw
        }
        UiEvent::ResultsMoveSelection { delta } => {
            let len = workspace
                .result_page()
                .map(|page| page.entries.len())
                .unwrap_or(0);
            match results.as_mut() {
                Some(window) => {
                    if window.move_selection(delta, len) {
                        LoopAction::ContinueRedraw
                    } else {
                        LoopAction::Continue
                    }
                }
                None => LoopAction::Continue,
            }
        }
        UiEvent::ResultsActivateSelection => {
            let Some(window) = results.as_ref() else {
                return LoopAction::Continue;
            };
            let index = window.selected;
            if workspace.apply(Command::OpenResult { index }).is_ok() {
                *results = None;
                mapper.set_mode(InputMode::Normal);
            }
            LoopAction::ContinueRedraw
        }
        UiEvent::ToggleTopicFilterAt { index } => {
            let Some(topic) = workspace.topics().labels().get(index).cloned() else {
                return LoopAction::Continue;
            };
            let _ = workspace.apply(Command::ToggleTopicFilter { topic });
            if let Some(window) = results.as_mut() {
                window.selected = 0;
            }
            LoopAction::ContinueRedraw
        }
        UiEvent::Quit => LoopAction::Quit,
        UiEvent::None => LoopAction::Continue,
    }
}

fn submit_prompt(workspace: &mut Workspace, kind: PromptKind, text: &str) {
    let command = match kind {
        PromptKind::AddTopic => Command::AddTopic {
            label: text.to_string(),
        },
        PromptKind::RemoveTopic => Command::RemoveTopic {
            label: text.trim().to_string(),
        },
        PromptKind::AddFile => {
            add_file_at(workspace, text.trim());
            return;
        }
        PromptKind::Threshold | PromptKind::MinScore => match parse_min_score(text) {
            Ok(value) if kind == PromptKind::Threshold => Command::SetThreshold { value },
            Ok(value) => Command::SetMinScore { value },
            Err(err) => {
                workspace.set_notice(err.to_string());
                return;
            }
        },
    };
    let _ = workspace.apply(command);
}

/// Reads one PDF typed into the prompt. Documents are parsed afterwards by
/// the event loop, like files given on the command line.
fn add_file_at(workspace: &mut Workspace, path: &str) {
    if path.is_empty() {
        return;
    }
    match read_files(&[PathBuf::from(path)]) {
        // Rejections and skips are recorded as the workspace notice.
        Ok(incoming) => {
            let _ = workspace.add_files(incoming);
        }
        Err(err) => workspace.set_notice(format!("{err:#}")),
    }
}

fn init_logging(project_dirs: &ProjectDirs, console: bool) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {:?}", log_dir))?;

    let file_appender = tracing_appender::rolling::never(log_dir, "docscope.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // Raw-mode drawing owns the terminal; only batch runs log to stderr.
    let console_layer = console.then(|| tracing_subscriber::fmt::layer().with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;
    Ok(guard)
}
