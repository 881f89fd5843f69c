use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use autoclass::classifier::Classifier;
use autoclass::openai::{ChatClient, ChatClientBuilder, ChatClientTrait, ChatError, ChatRequest};
use autoclass::settings::{Settings, SettingsError};
use autoclass::vault::{DocumentError, FsVault, InputKind};
use autoclass::{AbortController, Orchestrator, RunError, RunReport, Scope};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit status when a run is aborted with Ctrl-C.
const EXIT_ABORTED: i32 = 130;

/// autoclass - classify Markdown notes with a chat-completion model
#[derive(Parser)]
#[command(name = "autoclass")]
#[command(about = "Classify Markdown notes into tags, links and titles with a chat-completion model")]
#[command(version)]
struct Cli {
    /// Settings file (default: {config_dir}/autoclass/settings.json)
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Show debug output (repeat for trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only show errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Classify a piece of selected text and write the result into a note
    Selection(SelectionCommand),
    /// Classify note titles
    Title(TargetArgs),
    /// Classify a front-matter value
    Frontmatter(FrontmatterCommand),
    /// Classify the note body
    Content(TargetArgs),
    /// Classify each callout block
    Callouts(CalloutsCommand),
    /// Verify the API key and endpoint with a single small request
    Check,
    /// Inspect or create the settings file
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Which notes a classification command runs over
#[derive(Args, Debug)]
struct TargetArgs {
    /// Vault root directory
    #[arg(long, default_value = ".", value_name = "DIR")]
    vault: PathBuf,

    /// A single note (absolute, or relative to the vault)
    #[arg(long, value_name = "PATH", required_unless_present = "all", conflicts_with = "all")]
    note: Option<PathBuf>,

    /// Every note in the vault
    #[arg(long)]
    all: bool,

    /// 0-based line that cursor output is inserted before (default: end of note)
    #[arg(long, value_name = "LINE")]
    cursor_line: Option<usize>,
}

// A selection belongs to one note, so there is no `--all` here.
#[derive(Args, Debug)]
struct SelectionCommand {
    /// Vault root directory
    #[arg(long, default_value = ".", value_name = "DIR")]
    vault: PathBuf,

    /// The note the selection was taken from (absolute, or relative to the vault)
    #[arg(long, value_name = "PATH")]
    note: PathBuf,

    /// 0-based line the result is inserted before (default: end of note)
    #[arg(long, value_name = "LINE")]
    cursor_line: Option<usize>,

    /// The selected text to classify
    #[arg(long, value_name = "TEXT")]
    text: String,
}

impl SelectionCommand {
    fn target(&self) -> TargetArgs {
        TargetArgs {
            vault: self.vault.clone(),
            note: Some(self.note.clone()),
            all: false,
            cursor_line: self.cursor_line,
        }
    }
}

#[derive(Args, Debug)]
struct FrontmatterCommand {
    #[command(flatten)]
    target: TargetArgs,

    /// Front-matter key to read (default: input_key from settings)
    #[arg(long, value_name = "KEY")]
    key: Option<String>,
}

#[derive(Args, Debug)]
struct CalloutsCommand {
    #[command(flatten)]
    target: TargetArgs,

    /// Only classify callouts of this kind (default: callout_type from settings)
    #[arg(long, value_name = "KIND")]
    kind: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the effective settings (API key redacted)
    Show,
    /// Write a settings file with default values
    Init {
        /// Overwrite an existing settings file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let controller = Arc::new(AbortController::new());
    install_abort_handler(&controller);

    let result = match &cli.command {
        Commands::Selection(cmd) => handle_classify(
            &cli,
            &cmd.target(),
            InputKind::Selection,
            Some(&cmd.text),
            &controller,
        ),
        Commands::Title(target) => {
            handle_classify(&cli, target, InputKind::Title, None, &controller)
        }
        Commands::Frontmatter(cmd) => handle_frontmatter(&cli, cmd, &controller),
        Commands::Content(target) => {
            handle_classify(&cli, target, InputKind::Content, None, &controller)
        }
        Commands::Callouts(cmd) => handle_callouts(&cli, cmd, &controller),
        Commands::Check => handle_check(&cli),
        Commands::Config(cmd) => handle_config(&cli, cmd),
    };

    if let Err(e) = result {
        let exit_code = exit_code(&e);
        if exit_code == EXIT_ABORTED {
            eprintln!("Aborted.");
        } else {
            eprintln!("Error: {e:#}");
        }
        std::process::exit(exit_code);
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Routes Ctrl-C to the abort controller so a running command stops cleanly.
fn install_abort_handler(controller: &Arc<AbortController>) {
    let controller = Arc::clone(controller);
    if let Err(e) = ctrlc::set_handler(move || controller.abort()) {
        tracing::warn!(error = %e, "failed to install Ctrl-C handler; abort is unavailable");
    }
}

/// Maps an error onto the process exit code.
///
/// 1 for user and configuration errors, 130 for an aborted run, 2 otherwise.
fn exit_code(error: &anyhow::Error) -> i32 {
    if let Some(run_error) = error.downcast_ref::<RunError>() {
        return match run_error {
            RunError::Cancelled => EXIT_ABORTED,
            RunError::Config(_) => 1,
            _ => 2,
        };
    }
    if is_user_error(error) { 1 } else { 2 }
}

/// Determines if an error is a user error (vs internal error).
///
/// User errors are bad input or configuration the user can fix: a missing
/// API key, an invalid URL, a broken settings file, a missing note.
fn is_user_error(error: &anyhow::Error) -> bool {
    if let Some(chat_error) = error.downcast_ref::<ChatError>() {
        return matches!(
            chat_error,
            ChatError::MissingApiKey | ChatError::InvalidUrl(_)
        );
    }
    if let Some(document_error) = error.downcast_ref::<DocumentError>() {
        return matches!(document_error, DocumentError::NoteNotFound(_));
    }
    matches!(
        error.downcast_ref::<SettingsError>(),
        Some(SettingsError::Parse(_) | SettingsError::NoConfigDir)
    )
}

fn settings_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.settings {
        Some(path) => Ok(path.clone()),
        None => Ok(Settings::default_path()?),
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let path = settings_path(cli)?;
    Settings::load(&path).with_context(|| format!("Failed to load settings from {}", path.display()))
}

fn build_client(settings: &Settings) -> Result<ChatClient> {
    let mut builder = ChatClientBuilder::new();
    if let Some(key) = settings.resolve_api_key() {
        builder = builder.api_key(key);
    }
    if let Some(url) = &settings.base_url {
        builder = builder.base_url(url);
    }
    builder
        .build()
        .context("Failed to create API client (set api_key in settings or OPENAI_API_KEY)")
}

fn handle_frontmatter(
    cli: &Cli,
    cmd: &FrontmatterCommand,
    controller: &AbortController,
) -> Result<()> {
    let key = match &cmd.key {
        Some(key) => key.clone(),
        None => load_settings(cli)?.command_option.input_key,
    };
    handle_classify(cli, &cmd.target, InputKind::FrontMatter { key }, None, controller)
}

fn handle_callouts(cli: &Cli, cmd: &CalloutsCommand, controller: &AbortController) -> Result<()> {
    let kind = match &cmd.kind {
        Some(kind) => Some(kind.clone()),
        None => load_settings(cli)?.command_option.callout_type,
    };
    handle_classify(cli, &cmd.target, InputKind::Callouts { kind }, None, controller)
}

/// Runs one classification command and prints its report.
fn handle_classify(
    cli: &Cli,
    target: &TargetArgs,
    input: InputKind,
    selection: Option<&str>,
    controller: &AbortController,
) -> Result<()> {
    let settings = load_settings(cli)?;
    let client = build_client(&settings)?;

    let vault = open_vault(target, selection)?;
    let scope = match &target.note {
        Some(path) => Scope::Note(vault.note_ref(path)?),
        None => Scope::Vault,
    };

    let orchestrator = Orchestrator::new(
        Classifier::new(Arc::new(client)),
        &vault,
        settings.command_option,
    );
    let report = orchestrator.run(&scope, &input, &controller.token())?;

    print_report(&report);
    if report.has_failures() {
        anyhow::bail!("{} item(s) could not be classified", report.failures.len());
    }
    Ok(())
}

fn open_vault(target: &TargetArgs, selection: Option<&str>) -> Result<FsVault> {
    let mut vault = FsVault::open(&target.vault)
        .with_context(|| format!("Failed to open vault at {}", target.vault.display()))?;
    if let Some(text) = selection {
        vault = vault.with_selection(text);
    }
    if let Some(line) = target.cursor_line {
        vault = vault.with_cursor_line(line);
    }
    Ok(vault)
}

fn print_report(report: &RunReport) {
    for item in &report.classified {
        println!("{}:{}", item.note, item.text.trim_end());
    }
    for failure in &report.failures {
        eprintln!("Failed: {}: {}", failure.note, failure.error);
    }
    println!("{report}");
}

fn handle_check(cli: &Cli) -> Result<()> {
    let settings = load_settings(cli)?;
    let client = build_client(&settings)?;

    let request = ChatRequest::new(
        "You are a connectivity check.",
        "Reply with OK.",
        settings.command_option.model.as_str(),
        5,
    );
    let reply = client
        .call_api(&request, &autoclass::CancellationToken::new())
        .with_context(|| format!("API check against {} failed", client.base_url()))?;

    println!(
        "API reachable at {} (model: {}, reply: {})",
        client.base_url(),
        settings.command_option.model,
        reply.trim()
    );
    Ok(())
}

fn handle_config(cli: &Cli, cmd: &ConfigCommand) -> Result<()> {
    let path = settings_path(cli)?;
    match cmd {
        ConfigCommand::Show => {
            let settings = Settings::load(&path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?;
            println!("# {}", path.display());
            println!("{}", render_redacted(&settings)?);
            Ok(())
        }
        ConfigCommand::Init { force } => init_settings(&path, *force),
    }
}

/// Serialises settings for display with the API key masked.
fn render_redacted(settings: &Settings) -> Result<String> {
    let mut shown = settings.clone();
    if !shown.api_key.is_empty() {
        shown.api_key = "[REDACTED]".to_string();
    }
    serde_json::to_string_pretty(&shown).context("Failed to serialise settings")
}

fn init_settings(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Settings file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }
    Settings::default()
        .save(path)
        .with_context(|| format!("Failed to write settings to {}", path.display()))?;
    println!("Settings written to {}", path.display());
    Ok(())
}
