use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use atty::Stream;
use clap::{Args, Parser, Subcommand};
use selection_analyzer::render::render_terminal_markdown;
use selection_analyzer::{
    ActivationOutcome, AnalysisHandler, ClientConfig, HttpTransport, Notifier, Page, PageContext,
    ResultTarget,
};
use serde_json::json;
use termimad::{FmtText, MadSkin, terminal_size};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
#[command(
    name = "selection-analyzer",
    about = "Analyze selected text from research-assistant project pages",
    version
)]
pub struct Cli {
    /// Emit JSON instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the analysis sections found on a page.
    Sections {
        #[command(flatten)]
        page: PageArgs,
    },
    /// Activate one section's analyze trigger with a text selection.
    Analyze {
        #[command(flatten)]
        page: PageArgs,
        /// Section index, as listed by `sections`.
        #[arg(short, long, default_value_t = 0)]
        section: usize,
        /// Selected text to analyze.
        #[arg(long, conflicts_with = "whole_section")]
        text: Option<String>,
        /// Select the section's entire extractable text.
        #[arg(long)]
        whole_section: bool,
    },
}

#[derive(Args, Debug)]
struct PageArgs {
    /// Live page URL; its path supplies the project id and its origin receives requests.
    #[arg(long, conflicts_with_all = ["file", "path"])]
    url: Option<Url>,
    /// Saved page markup.
    #[arg(long, requires = "path")]
    file: Option<PathBuf>,
    /// Location path the saved page was served from, e.g. /research-assistant/project/42.
    #[arg(long)]
    path: Option<String>,
    /// Origin that receives analysis requests when using --file.
    #[arg(long, env = "SELECTION_ANALYZER_BASE_URL")]
    base_url: Option<Url>,
}

struct LoadedPage {
    page: Page,
    path: String,
    transport: HttpTransport,
}

struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, message: &str) {
        eprintln!("{message}");
    }
}

pub async fn run() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Sections { page } => handle_sections(page, cli.json).await,
        Command::Analyze {
            page,
            section,
            text,
            whole_section,
        } => handle_analyze(page, section, text, whole_section, cli.json).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("selection_analyzer=info,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn load_page(args: PageArgs) -> Result<LoadedPage, Box<dyn Error>> {
    if let Some(url) = args.url {
        let transport = HttpTransport::new(ClientConfig {
            base_url: url.clone(),
            ..ClientConfig::default()
        })?;
        let html = transport.fetch_page(&url).await?;
        return Ok(LoadedPage {
            page: Page::parse(&html),
            path: url.path().to_string(),
            transport,
        });
    }

    let file = args.file.ok_or("either --url or --file is required")?;
    let html = fs::read_to_string(&file)
        .map_err(|err| format!("failed to read {}: {err}", file.display()))?;
    let config = match args.base_url {
        Some(base_url) => ClientConfig {
            base_url,
            ..ClientConfig::default()
        },
        None => ClientConfig::default(),
    };
    Ok(LoadedPage {
        page: Page::parse(&html),
        path: args.path.unwrap_or_default(),
        transport: HttpTransport::new(config)?,
    })
}

async fn handle_sections(args: PageArgs, as_json: bool) -> Result<(), Box<dyn Error>> {
    let loaded = load_page(args).await?;
    let context = PageContext::from_page(&loaded.path, &loaded.page);
    let page = &loaded.page;

    if as_json {
        let payload = json!({
            "path": loaded.path,
            "project_id": context.project_id.as_ref().map(|id| id.as_str()),
            "csrf_token": context.security_token.is_some(),
            "sections": page.sections.iter().map(|section| {
                let trigger = &section.descriptor.trigger;
                json!({
                    "index": section.index,
                    "analysis_id": trigger.analysis_id,
                    "education_level": trigger.education_level,
                    "text_chars": section.descriptor.source_text.chars().count(),
                })
            }).collect::<Vec<_>>(),
            "skipped": page.skipped.iter().map(|skipped| {
                json!({ "index": skipped.index, "reason": skipped.missing.to_string() })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    let project = context
        .project_id
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "<missing>".to_string());
    println!("Project: {project}");
    println!(
        "CSRF token: {}",
        if context.security_token.is_some() {
            "present"
        } else {
            "absent"
        }
    );
    if page.sections.is_empty() && page.skipped.is_empty() {
        println!("No analysis sections on this page.");
        return Ok(());
    }
    println!(
        "{:<5}  {:<24}  {:<14}  {}",
        "INDEX", "ANALYSIS_ID", "LEVEL", "TEXT"
    );
    println!("{:-<5}  {:-<24}  {:-<14}  {}", "", "", "", "----");
    for section in &page.sections {
        let trigger = &section.descriptor.trigger;
        println!(
            "{:<5}  {:<24}  {:<14}  {}",
            section.index,
            trigger.analysis_id,
            trigger.education_level.as_deref().unwrap_or("(default)"),
            snippet(&section.descriptor.source_text, 48)
        );
    }
    for skipped in &page.skipped {
        println!("{:<5}  skipped: {}", skipped.index, skipped.missing);
    }
    Ok(())
}

async fn handle_analyze(
    args: PageArgs,
    index: usize,
    text: Option<String>,
    whole_section: bool,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let loaded = load_page(args).await?;
    let context = PageContext::from_page(&loaded.path, &loaded.page);
    let handler = AnalysisHandler::new(
        context,
        Arc::new(loaded.transport),
        Arc::new(StderrNotifier),
    )?;
    let bindings = handler.bind(loaded.page.candidates());
    let binding = bindings
        .iter()
        .find(|binding| binding.position() == index)
        .ok_or_else(|| format!("section {index} is not a qualifying analysis section"))?;

    let selection = if whole_section {
        binding.section().source_text.clone()
    } else {
        text.unwrap_or_default()
    };

    match binding.activate(&selection).await {
        ActivationOutcome::Rendered(response) => {
            if as_json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else if stdout_is_tty() {
                let skin = MadSkin::default();
                let markdown = render_terminal_markdown(&response);
                let (width, _) = terminal_size();
                println!("{}", FmtText::from(&skin, &markdown, Some(width.max(60) as usize)));
            } else {
                println!("{}", binding.section().result.content());
            }
            Ok(())
        }
        ActivationOutcome::Failed => {
            println!("{}", binding.section().result.content());
            Err("analysis failed; set RUST_LOG=selection_analyzer=debug for details".into())
        }
        ActivationOutcome::EmptySelection | ActivationOutcome::Superseded => Ok(()),
    }
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= max_chars {
        return flattened;
    }
    let mut cut: String = flattened.chars().take(max_chars).collect();
    cut.push('…');
    cut
}
