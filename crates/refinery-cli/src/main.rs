use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use refinery_contracts::credentials::{environment_default, mask_key, CredentialResolver};
use refinery_contracts::domains::{Domain, DomainRegistry, ProfileRegistry};
use refinery_contracts::events::EventWriter;
use refinery_contracts::library::{suggested_export_file_name, Library, SavedTemplate};
use refinery_contracts::stage::ProcessStage;
use refinery_contracts::store::FileStore;
use refinery_engine::orchestrator::ERROR_PREFIX;
use refinery_engine::{
    backend_for, EngineConfig, ExecuteOutcome, GenerationRequest, ImageAttachment, Orchestrator,
    RejectReason, SessionSnapshot,
};

const DEFAULT_HOME: &str = ".refinery";
const STORE_FILE: &str = "store.json";

#[derive(Debug, Parser)]
#[command(
    name = "refinery",
    version,
    about = "Refine rough ideas into prompts for a specific target model"
)]
struct Cli {
    /// State directory (defaults to $REFINERY_HOME, then ./.refinery).
    #[arg(long, global = true)]
    home: Option<PathBuf>,
    /// JSONL event log (defaults to <home>/events.jsonl).
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[arg(long, global = true, default_value = "gemini")]
    backend: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Run(RunArgs),
    Domains,
    Library {
        #[command(subcommand)]
        command: LibraryCommand,
    },
    Key {
        #[command(subcommand)]
        command: KeyCommand,
    },
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    domain: String,
    #[arg(long)]
    target: Option<String>,
    #[arg(long)]
    text: Option<String>,
    #[arg(long = "image")]
    images: Vec<PathBuf>,
    #[arg(long)]
    deep: bool,
    #[arg(long)]
    grounding: bool,
    #[arg(long)]
    render: bool,
    #[arg(long)]
    save: Option<String>,
    #[arg(long, default_value = "General")]
    category: String,
}

#[derive(Debug, Subcommand)]
enum LibraryCommand {
    List,
    Show {
        id: String,
    },
    Save {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "General")]
        category: String,
        #[arg(long)]
        domain: String,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    Delete {
        id: String,
    },
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    Import {
        path: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum KeyCommand {
    Set { value: String },
    Clear,
    Show,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("refinery error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    execute(Cli::parse())
}

fn execute(cli: Cli) -> Result<i32> {
    let workspace = Workspace::open(cli.home.clone(), cli.events.clone())?;
    match cli.command {
        Command::Run(args) => run_generation(&workspace, &cli.backend, args),
        Command::Domains => {
            print_domains();
            Ok(0)
        }
        Command::Library { command } => run_library(&workspace, command),
        Command::Key { command } => run_key(&workspace, command),
    }
}

/// Resolved state locations for one invocation.
struct Workspace {
    home: PathBuf,
    store: Arc<FileStore>,
    events: EventWriter,
}

impl Workspace {
    fn open(home: Option<PathBuf>, events: Option<PathBuf>) -> Result<Self> {
        let home = home
            .or_else(|| non_empty_env("REFINERY_HOME").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HOME));
        fs::create_dir_all(&home)
            .with_context(|| format!("failed creating {}", home.display()))?;
        let events_path = events.unwrap_or_else(|| home.join("events.jsonl"));
        let session_id = format!("cli-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f"));
        Ok(Self {
            store: Arc::new(FileStore::new(home.join(STORE_FILE))),
            events: EventWriter::new(events_path, session_id),
            home,
        })
    }

    fn credentials(&self) -> CredentialResolver {
        CredentialResolver::new(self.store.clone())
    }

    fn library(&self) -> Result<Library> {
        Ok(Library::open(self.store.clone())?.with_events(self.events.clone()))
    }

    fn media_dir(&self) -> PathBuf {
        self.home.join("media")
    }
}

fn run_generation(workspace: &Workspace, backend: &str, args: RunArgs) -> Result<i32> {
    let domain = parse_domain(&args.domain)?;
    let images = args
        .images
        .iter()
        .map(|path| ImageAttachment::from_path(path))
        .collect::<Result<Vec<_>, _>>()?;
    let config = EngineConfig::from_env();
    let backend = backend_for(backend, &config)?;
    let orchestrator = Orchestrator::new(
        backend,
        workspace.credentials(),
        config,
        workspace.media_dir(),
    )
    .with_events(workspace.events.clone());

    let request = GenerationRequest {
        domain,
        target_model: args.target.clone(),
        user_text: args.text.clone().unwrap_or_default(),
        images,
        use_deep_reasoning: args.deep,
        use_grounding: args.grounding,
    };
    let mut snapshot = match orchestrator.execute(request) {
        ExecuteOutcome::Finished(snapshot) => snapshot,
        ExecuteOutcome::Rejected(RejectReason::EmptyInput) => {
            eprintln!("Nothing to refine: pass --text or at least one --image.");
            return Ok(2);
        }
        ExecuteOutcome::Rejected(RejectReason::InFlight(stage)) => {
            eprintln!("A generation is already {stage}.");
            return Ok(2);
        }
        ExecuteOutcome::CredentialMissing { message } => {
            eprintln!("{message}");
            return Ok(3);
        }
    };
    print_refined(&snapshot);

    if snapshot.stage == ProcessStage::ReadyToRender {
        if args.render {
            snapshot = orchestrator.render()?;
            print_render(&snapshot);
        } else {
            println!("Render available: re-run with --render to generate the {domain}.");
        }
    }

    if let Some(diagnostic) = orchestrator.join_diagnostic() {
        println!(
            "diagnostic: {:.0}/100 ({}) {}",
            diagnostic.score, diagnostic.potential, diagnostic.summary
        );
        if !diagnostic.target_sectors.is_empty() {
            println!("  sectors: {}", diagnostic.target_sectors.join(", "));
        }
        if !diagnostic.risk_factors.is_empty() {
            println!("  risks: {}", diagnostic.risk_factors.join(", "));
        }
    }

    if let Some(title) = args.save.as_deref() {
        match saveable_content(&snapshot) {
            Some(content) => {
                let entry = workspace
                    .library()?
                    .save(content, title, &args.category, domain)?;
                println!("Saved to library as {}", entry.id);
            }
            None => eprintln!("Nothing saved: the refinement did not produce a prompt."),
        }
    }

    Ok(if snapshot.stage == ProcessStage::Error { 1 } else { 0 })
}

fn saveable_content(snapshot: &SessionSnapshot) -> Option<&str> {
    snapshot
        .refined
        .as_deref()
        .filter(|content| !content.trim().is_empty() && !content.starts_with(ERROR_PREFIX))
}

fn print_refined(snapshot: &SessionSnapshot) {
    println!("stage: {}", snapshot.stage);
    if let Some(target) = snapshot.target_model.as_deref() {
        let task = snapshot.task.map(|task| task.as_str()).unwrap_or("none");
        println!("target: {target} (task: {task})");
    }
    if let Some(refined) = snapshot.refined.as_deref() {
        println!();
        println!("{refined}");
        println!();
    }
}

fn print_render(snapshot: &SessionSnapshot) {
    println!("stage: {}", snapshot.stage);
    if let Some(media) = snapshot.media.as_ref() {
        println!(
            "media: {} ({}, {} bytes)",
            media.path.display(),
            media.mime_type,
            media.byte_len
        );
    }
    if let Some(error) = snapshot.error.as_deref() {
        eprintln!("render failed: {error}");
    }
}

fn print_domains() {
    for line in domain_listing(&DomainRegistry::default(), &ProfileRegistry::default()) {
        println!("{line}");
    }
}

fn domain_listing(domains: &DomainRegistry, profiles: &ProfileRegistry) -> Vec<String> {
    let mut lines = Vec::new();
    for config in domains.list() {
        lines.push(format!("{} ({})", config.domain, config.persona));
        lines.push(format!("  input: {}", config.placeholder));
        for target in &config.target_models {
            let marker = if *target == config.default_target_model {
                "*"
            } else {
                " "
            };
            lines.push(format!("  {marker} {target:<20} {}", profiles.label(target)));
        }
    }
    lines
}

fn run_library(workspace: &Workspace, command: LibraryCommand) -> Result<i32> {
    let library = workspace.library()?;
    match command {
        LibraryCommand::List => {
            let entries = library.list()?;
            if entries.is_empty() {
                println!("Library is empty.");
            }
            for entry in entries {
                print_entry_line(&entry);
            }
        }
        LibraryCommand::Show { id } => {
            let Some(entry) = library.get(&id)? else {
                eprintln!("No saved template with id {id}");
                return Ok(1);
            };
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        LibraryCommand::Save {
            title,
            category,
            domain,
            content,
            file,
        } => {
            let domain = parse_domain(&domain)?;
            let content = match (content, file) {
                (Some(content), None) => content,
                (None, Some(path)) => fs::read_to_string(&path)
                    .with_context(|| format!("failed reading {}", path.display()))?,
                (Some(_), Some(_)) => bail!("pass either --content or --file, not both"),
                (None, None) => bail!("pass --content or --file"),
            };
            let entry = library.save(&content, &title, &category, domain)?;
            println!("Saved {}", entry.id);
        }
        LibraryCommand::Delete { id } => {
            if library.delete(&id)? {
                println!("Deleted {id}");
            } else {
                println!("No saved template with id {id}");
            }
        }
        LibraryCommand::Export { out } => {
            let out = out.unwrap_or_else(|| {
                PathBuf::from(suggested_export_file_name(Utc::now().date_naive()))
            });
            library.export_to_file(&out)?;
            println!("Exported {} templates to {}", library.list()?.len(), out.display());
        }
        LibraryCommand::Import { path } => {
            let summary = library.import_from_file(&path)?;
            println!(
                "Imported {} of {} templates ({} total)",
                summary.added, summary.received, summary.total
            );
        }
    }
    Ok(0)
}

fn print_entry_line(entry: &SavedTemplate) {
    println!(
        "{}  {}  [{}] {} / {}",
        entry.id,
        entry.created_at.format("%Y-%m-%d"),
        entry.domain,
        entry.category,
        entry.title
    );
}

fn run_key(workspace: &Workspace, command: KeyCommand) -> Result<i32> {
    let credentials = workspace.credentials();
    match command {
        KeyCommand::Set { value } => {
            if value.trim().is_empty() {
                bail!("refusing to store an empty key");
            }
            credentials.set_override(&value)?;
            println!("Key saved ({})", mask_key(value.trim()));
        }
        KeyCommand::Clear => {
            credentials.clear_override()?;
            println!("Key override cleared");
        }
        KeyCommand::Show => {
            if let Some(key) = credentials.override_key() {
                println!("override: {}", mask_key(&key));
            } else if let Some(key) = environment_default() {
                println!("environment: {}", mask_key(&key));
            } else {
                println!("No API key configured.");
            }
        }
    }
    Ok(0)
}

fn parse_domain(raw: &str) -> Result<Domain> {
    raw.parse::<Domain>().map_err(|err| anyhow!(err))
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    use clap::Parser;
    use refinery_contracts::credentials::CredentialResolver;
    use refinery_contracts::domains::{DomainRegistry, ProfileRegistry};
    use refinery_contracts::library::Library;
    use refinery_contracts::store::FileStore;
    use tempfile::TempDir;

    use super::{domain_listing, execute, Cli, Command, STORE_FILE};

    fn cli(home: &Path, args: &[&str]) -> anyhow::Result<Cli> {
        let home = home.to_string_lossy().to_string();
        let mut argv = vec!["refinery", "--home", home.as_str(), "--backend", "dryrun"];
        argv.extend_from_slice(args);
        Ok(Cli::try_parse_from(argv)?)
    }

    fn library_at(home: &Path) -> anyhow::Result<Library> {
        Ok(Library::open(Arc::new(FileStore::new(home.join(STORE_FILE))))?)
    }

    #[test]
    fn run_args_collect_repeated_images() -> anyhow::Result<()> {
        let parsed = Cli::try_parse_from([
            "refinery", "run", "--domain", "image", "--image", "a.png", "--image", "b.png",
            "--deep",
        ])?;
        let Command::Run(args) = parsed.command else {
            panic!("expected run command");
        };
        assert_eq!(args.images.len(), 2);
        assert!(args.deep);
        assert!(!args.grounding);
        assert_eq!(args.category, "General");
        Ok(())
    }

    #[test]
    fn dryrun_generation_saves_refined_prompt() -> anyhow::Result<()> {
        let home = TempDir::new()?;
        let code = execute(cli(
            home.path(),
            &[
                "run", "--domain", "writing", "--text", "blog post about tea", "--save",
                "Tea post", "--category", "Blog",
            ],
        )?)?;
        assert_eq!(code, 0);

        let entries = library_at(home.path())?.list()?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Tea post");
        assert_eq!(entries[0].category, "Blog");
        assert!(entries[0].content.contains("blog post about tea"));
        assert!(home.path().join("events.jsonl").exists());
        Ok(())
    }

    #[test]
    fn dryrun_image_render_writes_media() -> anyhow::Result<()> {
        let home = TempDir::new()?;
        let code = execute(cli(
            home.path(),
            &["run", "--domain", "image", "--text", "neon city", "--render"],
        )?)?;
        assert_eq!(code, 0);
        let written = fs::read_dir(home.path().join("media"))?.count();
        assert_eq!(written, 1);
        Ok(())
    }

    #[test]
    fn empty_run_is_rejected() -> anyhow::Result<()> {
        let home = TempDir::new()?;
        let code = execute(cli(home.path(), &["run", "--domain", "code"])?)?;
        assert_eq!(code, 2);
        Ok(())
    }

    #[test]
    fn unknown_domain_is_an_error() -> anyhow::Result<()> {
        let home = TempDir::new()?;
        let err = execute(cli(home.path(), &["run", "--domain", "audio", "--text", "hi"])?)
            .unwrap_err();
        assert!(err.to_string().contains("Unknown domain"));
        Ok(())
    }

    #[test]
    fn library_export_then_import_into_fresh_home() -> anyhow::Result<()> {
        let source = TempDir::new()?;
        let target = TempDir::new()?;
        let export_path = source.path().join("library.json");
        let export_arg = export_path.to_string_lossy().to_string();

        execute(cli(
            source.path(),
            &[
                "library", "save", "--title", "Neon City", "--domain", "image", "--content",
                "neon city at night",
            ],
        )?)?;
        execute(cli(
            source.path(),
            &["library", "export", "--out", export_arg.as_str()],
        )?)?;
        execute(cli(
            target.path(),
            &["library", "import", export_arg.as_str()],
        )?)?;

        let imported = library_at(target.path())?.list()?;
        assert_eq!(imported, library_at(source.path())?.list()?);
        assert_eq!(imported[0].title, "Neon City");
        Ok(())
    }

    #[test]
    fn key_set_and_clear_update_the_override() -> anyhow::Result<()> {
        let home = TempDir::new()?;
        let resolver = || {
            CredentialResolver::with_env_default(
                Arc::new(FileStore::new(home.path().join(STORE_FILE))),
                None,
            )
        };

        execute(cli(home.path(), &["key", "set", "  sk-test-1234  "])?)?;
        assert_eq!(resolver().override_key().as_deref(), Some("sk-test-1234"));

        execute(cli(home.path(), &["key", "clear"])?)?;
        assert_eq!(resolver().override_key(), None);
        Ok(())
    }

    #[test]
    fn domain_listing_shows_input_hint_and_default_target() {
        let lines = domain_listing(&DomainRegistry::default(), &ProfileRegistry::default());
        assert!(lines.iter().any(|line| line.starts_with("image (")));
        assert!(lines.iter().any(|line| line
            == "  input: Describe the image you want, or attach reference images to reverse-engineer them..."));
        assert!(lines.iter().any(|line| line.starts_with("  * midjourney-v6")));
    }
}
