use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use panoedit_contracts::catalog::{find_template, TEMPLATE_IMAGES};
use panoedit_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use panoedit_contracts::events::EventLog;
use panoedit_contracts::models::ModelSelection;
use panoedit_contracts::version::version_label;
use panoedit_contracts::{PendingMessage, Version, ViewMode};
use panoedit_engine::{
    default_backend_registry, fetch_upload, looks_like_url, normalize, read_upload,
    BackendConfig, EditSession, EditTicket, SessionConfig, SessionError, SubmitOutcome,
    Upload,
};
use reqwest::blocking::Client as HttpClient;

#[derive(Debug, Parser)]
#[command(name = "panoedit", version, about = "Conversational 360-degree panorama editor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive editing session.
    Chat(ChatArgs),
    /// Load one image, apply one instruction, write the result.
    Run(RunArgs),
    /// Pad an image to 2:1 without contacting any backend.
    Normalize(NormalizeArgs),
}

#[derive(Debug, Args)]
struct BackendArgs {
    #[arg(long)]
    edit_model: Option<String>,
    #[arg(long)]
    suggest_model: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    api_base: Option<String>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    image: Option<String>,
    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    image: String,
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Debug, Parser)]
struct NormalizeArgs {
    #[arg(long)]
    image: String,
    #[arg(long)]
    out: PathBuf,
}

const EXIT_NO_IMAGE: i32 = 2;
const EDIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("panoedit error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Run(args) => run_once(args),
        Command::Normalize(args) => run_normalize(args),
    }
}

fn start_session(args: &BackendArgs, events_path: &Path) -> Result<EditSession> {
    let mut config = BackendConfig::from_env().with_api_key(args.api_key.as_deref());
    if let Some(base) = args.api_base.as_deref() {
        config = config.with_api_base(base);
    }
    let session_config = SessionConfig {
        edit_model: args.edit_model.clone(),
        suggest_model: args.suggest_model.clone(),
    };
    EditSession::new(
        &session_config,
        default_backend_registry(&config),
        EventLog::to_file(events_path),
    )
    .context("failed to start editing session")
}

fn open_source(
    session: &mut EditSession,
    http: &HttpClient,
    source: &str,
) -> Result<(), SessionError> {
    if looks_like_url(source) {
        session.open_url(http, source)
    } else {
        session.open_file(Path::new(source))
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut session = start_session(&args.backend, &events_path)?;
    let http = HttpClient::new();

    println!("Panoedit chat started. Type /help for commands.");
    println!(
        "Edit model: {}  Suggest model: {}",
        session.edit_model(),
        session.suggest_model()
    );

    if let Some(source) = args.image.as_deref() {
        load_and_show(&mut session, &http, source, &args.out)?;
    }

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        if intent.action == "noop" {
            continue;
        }
        handle_intent(&mut session, &http, &intent, &args.out)?;
        if session.poll_suggestions() {
            println!("New suggestions are available. Type /suggestions to see them.");
        }
    }
    Ok(())
}

fn handle_intent(
    session: &mut EditSession,
    http: &HttpClient,
    intent: &Intent,
    out_dir: &Path,
) -> Result<()> {
    match intent.action.as_str() {
        "help" => {
            println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
            println!("Anything else is sent as an edit instruction.");
        }
        "open_file" => {
            let Some(path) = intent.arg_str("path") else {
                println!("/open requires a path");
                return Ok(());
            };
            load_and_show(session, http, path, out_dir)?;
        }
        "open_url" => {
            let Some(url) = intent.arg_str("url") else {
                println!("/url requires a URL");
                return Ok(());
            };
            load_and_show(session, http, url, out_dir)?;
        }
        "templates" => {
            for (position, template) in TEMPLATE_IMAGES.iter().enumerate() {
                println!("{}. {} ({})", position + 1, template.name, template.url);
            }
        }
        "use_template" => {
            let key = intent.arg_str("template").unwrap_or_default();
            let Some(template) = find_template(key) else {
                println!("Unknown template '{key}'. Type /templates to list them.");
                return Ok(());
            };
            println!("Loading {}...", template.name);
            load_and_show(session, http, template.url, out_dir)?;
        }
        "select" => {
            let Some(index) = intent.arg_index("index") else {
                println!("/select requires a version number (0 is the original)");
                return Ok(());
            };
            match session.select(index) {
                Ok(()) => show_view(session, out_dir)?,
                Err(err) => println!("Select failed: {err}"),
            }
        }
        "set_view" => {
            let raw = intent.arg_str("mode").unwrap_or_default();
            let mode = match ViewMode::from_str(raw) {
                Ok(mode) => mode,
                Err(err) => {
                    println!("{err}");
                    return Ok(());
                }
            };
            match session.set_view_mode(mode) {
                Ok(()) => show_view(session, out_dir)?,
                Err(err) => println!("View change failed: {err}"),
            }
        }
        "compare" => match session.toggle_view_mode() {
            Ok(_) => show_view(session, out_dir)?,
            Err(err) => println!("Compare unavailable: {err}"),
        },
        "history" => print_history(session),
        "suggestions" => print_suggestions(session),
        "try_suggestion" => {
            let Some(position) = intent.arg_index("index").filter(|value| *value > 0) else {
                println!("/try requires a suggestion number (see /suggestions)");
                return Ok(());
            };
            let started = session.begin_suggestion(position - 1);
            run_edit(session, started, out_dir)?;
        }
        "save" => {
            let Some(path) = intent.arg_str("path") else {
                println!("/save requires a path");
                return Ok(());
            };
            match session.displayed() {
                Some(version) => {
                    let path = PathBuf::from(path);
                    write_version(version, &path)?;
                    println!("Saved {} to {}", displayed_label(session), path.display());
                }
                None => println!("Nothing to save; load an image first."),
            }
        }
        "dismiss" => session.dismiss_message(),
        "reset" => {
            session.reset();
            println!("Session reset. Load an image with /open, /url or /template.");
        }
        "set_edit_model" => {
            let model = intent.arg_str("model").unwrap_or_default();
            report_model("Edit", session.set_edit_model(model));
        }
        "set_suggest_model" => {
            let model = intent.arg_str("model").unwrap_or_default();
            report_model("Suggest", session.set_suggest_model(model));
        }
        "edit" => {
            let prompt = intent.prompt.as_deref().unwrap_or_default();
            let started = session.begin_edit(prompt);
            run_edit(session, started, out_dir)?;
        }
        _ => {
            let command = intent
                .command_args
                .get("command")
                .and_then(|value| value.as_str())
                .unwrap_or(intent.action.as_str());
            println!("Unknown command: /{command}. Type /help for commands.");
        }
    }
    Ok(())
}

fn load_and_show(
    session: &mut EditSession,
    http: &HttpClient,
    source: &str,
    out_dir: &Path,
) -> Result<()> {
    match open_source(session, http, source) {
        Ok(()) => {
            println!("Loaded {source}");
            show_view(session, out_dir)?;
            print_suggestions(session);
        }
        Err(_) => print_message(session),
    }
    Ok(())
}

/// Runs the backend call on a worker so suggestions keep landing while the
/// session sits in `LOADING`.
fn run_edit(
    session: &mut EditSession,
    started: Result<EditTicket, SessionError>,
    out_dir: &Path,
) -> Result<()> {
    let ticket = match started {
        Ok(ticket) => ticket,
        Err(err) => {
            match session.message() {
                Some(_) => print_message(session),
                None => println!("Edit rejected: {err}"),
            }
            return Ok(());
        }
    };
    println!("Editing from {}...", version_label(ticket.base_index()));
    let worker = thread::spawn(move || ticket.execute());
    while !worker.is_finished() {
        session.poll_suggestions();
        thread::sleep(EDIT_POLL_INTERVAL);
    }
    let done = worker
        .join()
        .map_err(|_| anyhow!("edit worker panicked"))?;

    match session.finish_edit(done) {
        SubmitOutcome::NewVersion { index } => {
            println!("Created {}", version_label(index));
            show_view(session, out_dir)?;
        }
        SubmitOutcome::Discarded => println!("Edit result discarded; the session changed."),
        SubmitOutcome::Clarification(_) | SubmitOutcome::Refused | SubmitOutcome::Failed(_) => {
            print_message(session)
        }
    }
    Ok(())
}

fn show_view(session: &EditSession, out_dir: &Path) -> Result<()> {
    let Some(version) = session.displayed() else {
        return Ok(());
    };
    let path = view_path(out_dir, version);
    write_version(version, &path)?;
    println!(
        "Showing {} [{}] -> {}",
        displayed_label(session),
        session.view_mode(),
        path.display()
    );
    Ok(())
}

fn view_path(out_dir: &Path, version: &Version) -> PathBuf {
    out_dir.join(format!("view.{}", version.extension()))
}

fn write_version(version: &Version, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, version.content())
        .with_context(|| format!("failed to write {}", path.display()))
}

fn displayed_label(session: &EditSession) -> String {
    session
        .displayed_index()
        .map(version_label)
        .unwrap_or_else(|| "nothing".to_string())
}

fn print_message(session: &EditSession) {
    match session.message() {
        Some(PendingMessage::Clarification(text)) => println!("Model asks: {text}"),
        Some(PendingMessage::Error(text)) => println!("Error: {text}"),
        None => {}
    }
}

fn print_history(session: &EditSession) {
    let history = session.history();
    if history.is_empty() {
        println!("No image loaded.");
        return;
    }
    for line in history_lines(history.versions(), history.cursor()) {
        println!("{line}");
    }
}

fn history_lines(versions: &[Version], cursor: usize) -> Vec<String> {
    versions
        .iter()
        .enumerate()
        .map(|(index, version)| {
            let marker = if index == cursor { '*' } else { ' ' };
            format!(
                "{marker} {index}: {} ({}, {} bytes, {})",
                version_label(index),
                version.media_type(),
                version.len(),
                version.short_id()
            )
        })
        .collect()
}

fn print_suggestions(session: &EditSession) {
    let pending = if session.suggestions_pending() {
        " (fetching ideas for this image...)"
    } else {
        ""
    };
    println!("Suggestions{pending}:");
    for (position, prompt) in session.suggestions().iter().enumerate() {
        println!("  {}. {prompt}", position + 1);
    }
}

fn report_model(kind: &str, result: Result<ModelSelection, SessionError>) {
    match result {
        Ok(selection) => {
            println!("{kind} model set to {}", selection.model.name);
            if let Some(reason) = selection.fallback {
                println!("  {reason}");
            }
        }
        Err(err) => println!("{kind} model unchanged: {err}"),
    }
}

fn run_once(args: RunArgs) -> Result<i32> {
    let events_path = args.events.clone().unwrap_or_else(|| {
        args.out
            .parent()
            .map(|parent| parent.join("events.jsonl"))
            .unwrap_or_else(|| PathBuf::from("events.jsonl"))
    });
    let mut session = start_session(&args.backend, &events_path)?;
    let http = HttpClient::new();
    open_source(&mut session, &http, &args.image)
        .with_context(|| format!("failed to load {}", args.image))?;

    match session.submit(&args.prompt)? {
        SubmitOutcome::NewVersion { index } => {
            let version = session
                .history()
                .get(index)
                .ok_or_else(|| anyhow!("new version {index} missing from history"))?;
            write_version(version, &args.out)?;
            println!("Wrote {} to {}", version_label(index), args.out.display());
            Ok(0)
        }
        SubmitOutcome::Clarification(text) => {
            println!("Model asks: {text}");
            Ok(EXIT_NO_IMAGE)
        }
        SubmitOutcome::Refused => {
            print_message(&session);
            Ok(EXIT_NO_IMAGE)
        }
        SubmitOutcome::Failed(message) => bail!(message),
        SubmitOutcome::Discarded => bail!("edit result was discarded"),
    }
}

fn run_normalize(args: NormalizeArgs) -> Result<i32> {
    let loaded = if looks_like_url(&args.image) {
        fetch_upload(&HttpClient::new(), &args.image)
    } else {
        read_upload(Path::new(&args.image))
    };
    let upload: Upload = loaded.with_context(|| format!("failed to load {}", args.image))?;

    let version = normalize(&upload.bytes, &upload.media_type)
        .with_context(|| format!("failed to normalize {}", args.image))?;
    write_version(&version, &args.out)?;
    println!(
        "Normalized {} -> {} ({}, {} bytes)",
        args.image,
        args.out.display(),
        version.media_type(),
        version.len()
    );
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_path_follows_media_type() {
        let jpeg = Version::new(b"x".to_vec(), "image/jpeg");
        let webp = Version::new(b"x".to_vec(), "image/webp");
        assert_eq!(view_path(Path::new("out"), &jpeg), PathBuf::from("out/view.jpg"));
        assert_eq!(view_path(Path::new("out"), &webp), PathBuf::from("out/view.webp"));
    }

    #[test]
    fn history_lines_mark_the_cursor() {
        let versions = vec![
            Version::new(b"a".to_vec(), "image/png"),
            Version::new(b"bb".to_vec(), "image/png"),
        ];
        let lines = history_lines(&versions, 1);
        assert!(lines[0].starts_with("  0: Original (image/png, 1 bytes"));
        assert!(lines[1].starts_with("* 1: Edit 1 (image/png, 2 bytes"));
    }

    #[test]
    fn write_version_creates_parent_dirs() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested/dir/pano.png");
        write_version(&Version::new(b"png".to_vec(), "image/png"), &path)?;
        assert_eq!(fs::read(&path)?, b"png");
        Ok(())
    }

    #[test]
    fn run_args_accept_backend_flags() {
        let cli = Cli::parse_from([
            "panoedit",
            "run",
            "--image",
            "room.jpg",
            "--prompt",
            "add a plant",
            "--out",
            "out/room.png",
            "--edit-model",
            "dryrun-image-1",
            "--api-base",
            "http://localhost:9/v1beta",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.prompt, "add a plant");
        assert_eq!(args.backend.edit_model.as_deref(), Some("dryrun-image-1"));
        assert_eq!(args.backend.api_base.as_deref(), Some("http://localhost:9/v1beta"));
        assert!(args.backend.api_key.is_none());
    }

    #[test]
    fn try_command_submits_the_numbered_suggestion() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = EventLog::in_memory();
        let config = SessionConfig {
            edit_model: Some("dryrun-image-1".to_string()),
            suggest_model: Some("dryrun-image-1".to_string()),
        };
        let mut session = EditSession::new(
            &config,
            default_backend_registry(&BackendConfig::default()),
            events.clone(),
        )?;
        let mut png = Vec::new();
        image::DynamicImage::new_rgb8(8, 4)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)?;
        session.load_bytes(png, "image/png", "room.png")?;
        let http = HttpClient::new();

        handle_intent(&mut session, &http, &parse_intent("/try 9"), temp.path())?;
        assert_eq!(session.history().len(), 1);

        let expected = session.suggestions()[0].clone();
        handle_intent(&mut session, &http, &parse_intent("/try 1"), temp.path())?;
        assert_eq!(session.history().len(), 2);
        assert!(temp.path().join("view.png").exists());
        let requested: Vec<String> = events
            .snapshot()
            .into_iter()
            .filter(|event| event["type"] == "edit_requested")
            .filter_map(|event| event["instruction"].as_str().map(str::to_string))
            .collect();
        assert_eq!(requested, vec![expected]);
        Ok(())
    }
}
