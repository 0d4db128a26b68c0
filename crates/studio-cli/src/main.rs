use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use studio::preview::host_page;
use studio::protocol::HostMessage;
use studio::{
    logging, Config, DeviceFrame, GeminiClient, Refinement, Rejection, Role, SendOutcome,
    SessionStore, Studio, RUNTIME,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};

#[derive(Parser)]
#[command(name = "studio", about = "Chat-driven HTML app builder with a sandboxed live preview")]
struct Cli {
    /// Path to config.toml (defaults to config.toml next to this exe)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one prompt and write the preview
    Send {
        prompt: String,
        /// Files to attach (images are sent inline, text is merged into the prompt)
        #[arg(short, long)]
        attach: Vec<PathBuf>,
        /// Where to write the preview host page
        #[arg(short, long, default_value = "preview.html")]
        out: PathBuf,
    },
    /// Interactive session; type /help for commands
    Chat {
        #[arg(short, long, default_value = "preview.html")]
        out: PathBuf,
    },
    /// Print the saved conversation
    History {
        /// Delete the saved conversation instead
        #[arg(long)]
        clear: bool,
    },
    /// Rebuild the preview from the saved conversation
    Render {
        #[arg(short, long, default_value = "preview.html")]
        out: PathBuf,
    },
}

const HELP: &str = "\
Commands:
  /attach PATH...        attach files to the next message
  /detach N              remove attachment N
  /annotate              toggle annotate mode
  /inspect JSON          deliver a preview message (console or inspect)
  /style PROP VALUE      restyle the selected element, e.g. /style fontSize 24px
  /refine PRESET         left|center|right|background|text-color|remix|delete
  /device NAME           desktop|tablet|mobile
  /mic                   toggle dictation
  /usage                 token usage so far
  /console [clear]       preview console output
  /status                annotate mode, device, scroll and attachments
  /code                  current generated code
  /clear                 clear the conversation
  /quit                  exit
Anything else is sent as a message.";

fn resolve_config_path(cli_path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli_path {
        return path;
    }
    match std::env::current_exe() {
        Ok(mut exe) => {
            exe.pop();
            exe.push("config.toml");
            exe
        }
        Err(_) => PathBuf::from("config.toml"),
    }
}

fn build_studio(config: &Config) -> Studio {
    let client = Arc::new(GeminiClient::new(&config.api));
    let store = SessionStore::new(&config.storage_directory());
    let studio = Studio::new(config, client).with_store(store);
    studio.restore();
    studio
}

fn write_preview(studio: &Studio, device: DeviceFrame, out: &Path) -> Result<()> {
    let document = studio.document();
    if document.is_empty() {
        return Ok(());
    }
    std::fs::write(out, host_page(&document, device))
        .with_context(|| format!("Failed to write {}", out.display()))
}

fn print_outcome(studio: &Studio, outcome: &SendOutcome) {
    match outcome {
        SendOutcome::Rejected(Rejection::Empty) => println!("Nothing to send."),
        SendOutcome::Rejected(Rejection::Busy) => println!("Still waiting for the previous reply."),
        SendOutcome::Rejected(Rejection::NoSelection) => {
            println!("No element selected. Use /annotate, then click an element in the preview.")
        }
        SendOutcome::Completed { .. } | SendOutcome::Failed(_) => {
            if let Some(reply) = studio.messages().last().filter(|m| m.role == Role::Model) {
                println!("\nModel: {}\n", reply.text);
            }
            if let SendOutcome::Completed { code_updated: true } = outcome {
                println!("(preview updated)");
            }
        }
    }
}

fn print_attachments(studio: &Studio) {
    for (i, file) in studio.attachments().iter().enumerate() {
        match file.preview {
            Some(ref url) => println!(
                "  [{i}] {} ({}, {} byte thumbnail)",
                file.name,
                file.mime_type,
                url.len()
            ),
            None => println!("  [{i}] {} ({})", file.name, file.mime_type),
        }
    }
}

fn print_status(studio: &Studio, device: DeviceFrame) {
    println!(
        "Annotate {}, device {device:?}, scrolled to {:?}.",
        if studio.is_annotating() { "on" } else { "off" },
        studio.scroll_position()
    );
    if let Some(el) = studio.selected() {
        println!("Selected <{}> ({})", el.tag_name, el.selector());
    }
    print_attachments(studio);
}

/// Host messages would be posted to the preview frame; here they are echoed.
fn drain_outbox(outbox: &mut UnboundedReceiver<HostMessage>) {
    while let Ok(message) = outbox.try_recv() {
        if let Ok(json) = serde_json::to_string(&message) {
            println!("-> preview: {json}");
        }
    }
}

// --- Commands ---

fn send_once(config: &Config, prompt: String, attach: Vec<PathBuf>, out: &Path) -> Result<()> {
    let studio = build_studio(config);
    if !attach.is_empty() {
        let wanted = attach.len();
        let attached = RUNTIME.block_on(studio.attach(attach));
        if attached < wanted {
            eprintln!("Warning: {} of {wanted} files could not be read.", wanted - attached);
        }
    }
    studio.set_input(prompt);
    let outcome = RUNTIME.block_on(studio.send(None));
    print_outcome(&studio, &outcome);
    write_preview(&studio, DeviceFrame::default(), out)?;
    if let SendOutcome::Failed(err) = outcome {
        bail!(err);
    }
    Ok(())
}

fn chat(config: &Config, out: &Path) -> Result<()> {
    let studio = build_studio(config);
    let (tx, mut outbox) = mpsc::unbounded_channel();
    studio.connect_preview(tx);
    let mut device = DeviceFrame::default();

    println!("Studio -- {}", studio.config().model);
    println!("History: {} messages. Preview: {}", studio.messages().len(), out.display());
    println!("Type /help for commands.");
    write_preview(&studio, device, out)?;

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match command {
            "/quit" | "/exit" => break,
            "/help" => println!("{HELP}"),
            "/attach" => {
                let paths: Vec<PathBuf> = rest.split_whitespace().map(PathBuf::from).collect();
                let attached = RUNTIME.block_on(studio.attach(paths));
                println!("Attached {attached} file(s).");
                print_attachments(&studio);
            }
            "/detach" => match rest.parse::<usize>().ok().and_then(|i| studio.remove_attachment(i)) {
                Some(file) => println!("Removed {}.", file.name),
                None => println!("No such attachment."),
            },
            "/annotate" => {
                let active = !studio.is_annotating();
                studio.set_annotating(active);
                println!("Annotate mode {}.", if active { "on" } else { "off" });
            }
            "/inspect" => {
                studio.handle_preview_message(rest);
                if let Some(el) = studio.selected() {
                    println!("Selected <{}> ({})", el.tag_name, el.selector());
                }
            }
            "/style" => {
                let Some((property, value)) = rest.split_once(' ') else {
                    println!("Usage: /style PROP VALUE");
                    continue;
                };
                let outcome = RUNTIME.block_on(studio.restyle(property, value.trim()));
                print_outcome(&studio, &outcome);
            }
            "/refine" => match rest.parse::<Refinement>() {
                Ok(refinement) => {
                    let outcome = RUNTIME.block_on(studio.refine(refinement));
                    print_outcome(&studio, &outcome);
                }
                Err(e) => println!("{e}"),
            },
            "/device" => match rest.parse::<DeviceFrame>() {
                Ok(frame) => device = frame,
                Err(e) => println!("{e}"),
            },
            "/mic" => match studio.toggle_dictation() {
                Ok(listening) => println!("Dictation {}.", if listening { "on" } else { "off" }),
                Err(e) => println!("{e}"),
            },
            "/usage" => {
                let usage = studio.usage();
                println!(
                    "prompt {} / completion {} / total {}",
                    usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
                );
            }
            "/console" if rest == "clear" => {
                studio.clear_console();
                println!("Console cleared.");
            }
            "/console" => {
                for entry in studio.console() {
                    println!("[{:?}] {}", entry.level, entry.message);
                }
            }
            "/status" => print_status(&studio, device),
            "/code" => println!("{}", studio.generated_code()),
            "/clear" => {
                studio.clear_history();
                println!("Conversation cleared.");
            }
            _ if command.starts_with('/') => println!("Unknown command. Type /help."),
            _ => {
                studio.set_input(line);
                let outcome = RUNTIME.block_on(studio.send(None));
                print_outcome(&studio, &outcome);
            }
        }

        drain_outbox(&mut outbox);
        write_preview(&studio, device, out)?;
    }
    Ok(())
}

fn history(config: &Config, clear: bool) -> Result<()> {
    let store = SessionStore::new(&config.storage_directory());
    if clear {
        store.clear().context("Failed to clear history")?;
        println!("History cleared.");
        return Ok(());
    }
    let messages = store.load();
    if messages.is_empty() {
        println!("No saved conversation at {}.", store.path().display());
    }
    for message in messages {
        let label = match message.role {
            Role::User => "You",
            Role::Model => "Model",
        };
        println!("{label}: {}\n", message.text);
    }
    Ok(())
}

fn render(config: &Config, out: &Path) -> Result<()> {
    let studio = build_studio(config);
    if studio.document().is_empty() {
        bail!("No generated code in the saved conversation");
    }
    write_preview(&studio, DeviceFrame::default(), out)?;
    println!("Wrote {}", out.display());
    Ok(())
}

// --- Main ---

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, config_warning) = Config::load_with_warning(&resolve_config_path(cli.config));

    let _guard = logging::init_tracing(&config.log_directory(), &config.logging.level);
    logging::init_session_log(&config);
    tracing::info!("studio started");
    if let Some(warning) = config_warning {
        eprintln!("Warning: {warning}, using defaults");
        tracing::warn!("{warning}");
    }

    match cli.command {
        Command::Send { prompt, attach, out } => send_once(&config, prompt, attach, &out),
        Command::Chat { out } => chat(&config, &out),
        Command::History { clear } => history(&config, clear),
        Command::Render { out } => render(&config, &out),
    }
}
