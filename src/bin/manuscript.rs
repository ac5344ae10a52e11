//! Manuscript CLI: chapters, inspections and comment threads from the shell.
//!
//! Usage:
//!   manuscript chapter <subcommand> [--db path]
//!   manuscript inspect <style|grammar|logic> [n]
//!   manuscript export --out book.docx
//!
//! Chapters are addressed by their 1-based position in the book.

use clap::{Parser, Subcommand, ValueEnum};
use manuscript::backend::http::HttpBackend;
use manuscript::backend::socket::{InboundReceiver, SocketTransport};
use manuscript::{
    AnalysisSession, Book, ChapterId, Config, DiscussionOutcome, Fingerprint, InboundEffect,
    InspectionKind, NoticeLevel, OpenStore, Reconciler, SqliteStore, StateStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Parser)]
#[command(
    name = "manuscript",
    version,
    about = "Annotate and cross-check a manuscript chapter by chapter"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to SQLite state database
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Path to YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Backend base URL (overrides config)
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage chapters
    Chapter {
        #[command(subcommand)]
        action: ChapterAction,
    },
    /// Manage the style prompt
    Style {
        #[command(subcommand)]
        action: StyleAction,
    },
    /// Run a full storyboard analysis of one chapter
    Storyboard {
        /// Chapter number
        n: usize,
    },
    /// Send a chapter for inspection and wait for the annotations
    Inspect {
        kind: KindArg,
        /// Chapter number (defaults to the current chapter)
        n: Option<usize>,
        /// Seconds to wait for the inspection to finish
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
    /// Accept the suggestion attached to a comment
    Apply {
        n: usize,
        fingerprint: String,
        /// Span to rewrite (defaults to the marked text)
        #[arg(long)]
        selection: Option<String>,
    },
    /// Reply to a comment and wait for the assistant's answer
    Discuss {
        n: usize,
        fingerprint: String,
        text: String,
    },
    /// Remove a comment and its marker
    Dismiss { n: usize, fingerprint: String },
    /// Export the book with comments as DOCX
    Export {
        #[arg(long)]
        out: PathBuf,
        /// Author name (overrides config)
        #[arg(long)]
        author: Option<String>,
    },
}

#[derive(Subcommand)]
enum ChapterAction {
    /// Add a chapter from a text file
    Add {
        title: String,
        /// File holding the chapter text
        file: PathBuf,
    },
    /// List chapters
    List,
    /// Print a chapter with its comments
    Show { n: usize },
    /// Make a chapter current
    Select { n: usize },
    /// Remove a chapter
    Remove { n: usize },
}

#[derive(Subcommand)]
enum StyleAction {
    /// Replace the style prompt
    Set { prompt: String },
    /// Print the style prompt
    Show,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Style,
    Grammar,
    Logic,
}

impl From<KindArg> for InspectionKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Style => InspectionKind::Style,
            KindArg::Grammar => InspectionKind::Grammar,
            KindArg::Logic => InspectionKind::Logic,
        }
    }
}

/// Loaded state shared by every command.
struct Workspace {
    config: Config,
    store: SqliteStore,
    book: Book,
}

impl Workspace {
    fn open(cli: &Cli) -> Result<Self, String> {
        let mut config = Config::load(cli.config.as_deref()).map_err(|e| e.to_string())?;
        if let Some(url) = &cli.api_url {
            config.api_url = url.clone();
        }
        let db_path = cli.db.clone().unwrap_or_else(|| config.resolved_db_path());
        let store =
            SqliteStore::open(&db_path).map_err(|e| format!("Failed to open database: {}", e))?;
        let book = store
            .load_book()
            .map_err(|e| format!("Failed to load book: {}", e))?
            .unwrap_or_default();
        Ok(Self {
            config,
            store,
            book,
        })
    }

    fn save(&self, book: &Book) -> i32 {
        match self.store.save_book(book) {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("Error: failed to save book: {}", e);
                1
            }
        }
    }

    /// Resolve a 1-based chapter number.
    fn resolve(&self, n: usize) -> Result<ChapterId, String> {
        n.checked_sub(1)
            .ok_or_else(|| "chapter numbers start at 1".to_string())
            .and_then(|i| self.book.id_at(i).map_err(|e| e.to_string()))
    }

    /// Build a session over the book, opening only the channels `kinds` names.
    async fn session(
        &self,
        kinds: &[InspectionKind],
    ) -> Result<(AnalysisSession, InboundReceiver), String> {
        let client = Arc::new(HttpBackend::new(self.config.api_url.clone()));
        let (transport, inbound) = SocketTransport::connect(&self.config.api_url, kinds)
            .await
            .map_err(|e| e.to_string())?;
        let session = AnalysisSession::new(
            Arc::new(RwLock::new(self.book.clone())),
            client,
            Arc::new(transport),
        )
        .with_reconciler(Reconciler::new().with_inline_comments(self.config.inline_comments));

        let mut notices = session.subscribe();
        tokio::spawn(async move {
            loop {
                match notices.recv().await {
                    Ok(notice) => match notice.level {
                        NoticeLevel::Error => eprintln!("! {}", notice.message),
                        NoticeLevel::Info | NoticeLevel::Success => {
                            println!("* {}", notice.message)
                        }
                    },
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
        });
        Ok((session, inbound))
    }
}

fn parse_fingerprint(raw: &str) -> Result<Fingerprint, String> {
    Fingerprint::parse(raw)
        .ok_or_else(|| format!("'{}' is not an 8-character hex fingerprint", raw))
}

fn cmd_chapter_add(ws: &mut Workspace, title: &str, file: &PathBuf) -> i32 {
    let text = match std::fs::read_to_string(file) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: cannot read '{}': {}", file.display(), e);
            return 1;
        }
    };
    ws.book.add_chapter(title, text);
    println!("Added chapter {} '{}'", ws.book.len(), title);
    ws.save(&ws.book)
}

fn cmd_chapter_list(ws: &Workspace) -> i32 {
    if ws.book.is_empty() {
        println!("No chapters.");
        return 0;
    }
    let current = ws.book.current_id();
    println!("{:>3}  {:<1}  {:<32}  {:>8}  {:>8}", "#", "", "TITLE", "COMMENTS", "SUMMARY");
    println!("{}", "-".repeat(62));
    for (i, chapter) in ws.book.chapters().iter().enumerate() {
        println!(
            "{:>3}  {:<1}  {:<32}  {:>8}  {:>8}",
            i + 1,
            if Some(chapter.id) == current { "*" } else { "" },
            chapter.title,
            chapter.comments.fingerprints().len(),
            if chapter.needs_refinement() { "-" } else { "cached" }
        );
    }
    0
}

fn cmd_chapter_show(ws: &Workspace, n: usize) -> i32 {
    let id = match ws.resolve(n) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let Some(chapter) = ws.book.get(&id) else {
        return 1;
    };
    println!("# {}\n", chapter.title);
    println!("{}\n", chapter.text);
    for fp in chapter.comments.fingerprints() {
        println!("[{}] {}", fp, chapter.comments.comment(&fp).unwrap_or_default());
        if let Some(suggestion) = chapter.comments.suggestion(&fp) {
            println!("    suggestion: {}", suggestion);
        }
        for entry in chapter.comments.subcomments(&fp) {
            println!("    > {}", entry.text);
        }
    }
    0
}

fn cmd_chapter_select(ws: &mut Workspace, n: usize) -> i32 {
    let result = ws.resolve(n).and_then(|id| ws.book.select(&id).map_err(|e| e.to_string()));
    match result {
        Ok(()) => {
            println!("Chapter {} is now current", n);
            ws.save(&ws.book)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_chapter_remove(ws: &mut Workspace, n: usize) -> i32 {
    let result = ws
        .resolve(n)
        .and_then(|id| ws.book.remove_chapter(&id).map_err(|e| e.to_string()));
    match result {
        Ok(removed) => {
            println!("Removed chapter '{}'", removed.title);
            ws.save(&ws.book)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_style_set(ws: &mut Workspace, prompt: String) -> i32 {
    // Pushed to the style channel on the next style inspection.
    ws.book.style_prompt = prompt;
    println!("Style prompt updated");
    ws.save(&ws.book)
}

fn cmd_style_show(ws: &Workspace) -> i32 {
    if ws.book.style_prompt.is_empty() {
        println!("No style prompt set.");
    } else {
        println!("{}", ws.book.style_prompt);
    }
    0
}

async fn cmd_storyboard(ws: &Workspace, n: usize) -> i32 {
    let id = match ws.resolve(n) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let (session, _) = match ws.session(&[]).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match session.storyboard_chapter(id).await {
        Ok(summaries) => {
            println!("Characters:\n{}\n", summaries.character_summary);
            println!("Locations:\n{}", summaries.location_summary);
            let book = session.book().read().await;
            ws.save(&book)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_inspect(ws: &Workspace, kind: InspectionKind, n: Option<usize>, timeout: u64) -> i32 {
    let id = match n {
        Some(n) => ws.resolve(n),
        None => ws.book.current_id().ok_or_else(|| "no current chapter".to_string()),
    };
    let id = match id {
        Ok(id) => id,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let (session, mut inbound) = match ws.session(&[kind]).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let dispatched = match kind {
        InspectionKind::Style => {
            let prompt = ws.book.style_prompt.clone();
            if !prompt.is_empty() {
                if let Err(e) = session.update_style_prompt(prompt).await {
                    eprintln!("Error: {}", e);
                    return 1;
                }
            }
            session.inspect_style(id).await
        }
        InspectionKind::Grammar => session.inspect_grammar(id).await,
        InspectionKind::Logic => session.inspect_logic(id).await.map(|report| {
            if !report.refined.is_empty() {
                println!("Refined {} earlier chapter(s)", report.refined.len());
            }
        }),
    };
    if let Err(e) = dispatched {
        eprintln!("Error: {}", e);
        return 1;
    }

    let mut code = 0;
    let wait = async {
        while let Some((channel, frame)) = inbound.recv().await {
            match session.handle_inbound(channel, frame).await {
                InboundEffect::Annotated { outcome, .. } => {
                    let marker = if outcome.anchored { "" } else { " (not anchored)" };
                    println!("[{}]{}", outcome.fingerprint, marker);
                }
                InboundEffect::Finished { .. } => break,
                InboundEffect::Failed { .. } => {
                    code = 1;
                    break;
                }
                InboundEffect::Status(_) | InboundEffect::Ignored => {}
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(timeout), wait).await.is_err() {
        eprintln!("Error: {} inspection timed out after {}s", kind, timeout);
        code = 1;
    }

    // Keep whatever arrived, even on failure.
    let book = session.book().read().await;
    code.max(ws.save(&book))
}

async fn cmd_apply(ws: &Workspace, n: usize, fingerprint: &str, selection: Option<&str>) -> i32 {
    let target = ws.resolve(n).and_then(|id| parse_fingerprint(fingerprint).map(|fp| (id, fp)));
    let (id, fp) = match target {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let (session, _) = match ws.session(&[]).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match session.apply_suggestion(id, &fp, selection).await {
        Ok(()) => {
            let book = session.book().read().await;
            ws.save(&book)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_discuss(ws: &Workspace, n: usize, fingerprint: &str, text: &str) -> i32 {
    let target = ws.resolve(n).and_then(|id| parse_fingerprint(fingerprint).map(|fp| (id, fp)));
    let (id, fp) = match target {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let (session, _) = match ws.session(&[]).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let code = match session.add_subcomment(id, &fp, text).await {
        Ok(DiscussionOutcome::Replied(entry)) => {
            println!("{}", entry.text);
            0
        }
        Ok(DiscussionOutcome::NoReply) => {
            println!("(no reply)");
            0
        }
        Ok(DiscussionOutcome::Duplicate) => 0,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };
    // The reader's entry is kept even when the reply failed.
    let book = session.book().read().await;
    code.max(ws.save(&book))
}

async fn cmd_dismiss(ws: &Workspace, n: usize, fingerprint: &str) -> i32 {
    let target = ws.resolve(n).and_then(|id| parse_fingerprint(fingerprint).map(|fp| (id, fp)));
    let (id, fp) = match target {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let (session, _) = match ws.session(&[]).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match session.remove_annotation(id, &fp).await {
        Ok(true) => {
            println!("Removed comment [{}]", fp);
            let book = session.book().read().await;
            ws.save(&book)
        }
        Ok(false) => {
            eprintln!("Warning: no comment [{}] in chapter {}", fp, n);
            1
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_export(ws: &Workspace, out: &PathBuf, author: Option<String>) -> i32 {
    let (session, _) = match ws.session(&[]).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let filename = out
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "manuscript".to_string());
    let author = author.unwrap_or_else(|| ws.config.author_name.clone());
    let bytes = match session.export_docx(filename, author).await {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match std::fs::write(out, bytes) {
        Ok(()) => {
            println!("Wrote {}", out.display());
            0
        }
        Err(e) => {
            eprintln!("Error: cannot write '{}': {}", out.display(), e);
            1
        }
    }
}

fn init_logging(config: &Config, verbose: bool) {
    let filter = if verbose { "debug" } else { config.log_level.as_str() };
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut ws = match Workspace::open(&cli) {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    init_logging(&ws.config, cli.verbose);

    let code = match cli.command {
        Commands::Chapter { action } => match action {
            ChapterAction::Add { title, file } => cmd_chapter_add(&mut ws, &title, &file),
            ChapterAction::List => cmd_chapter_list(&ws),
            ChapterAction::Show { n } => cmd_chapter_show(&ws, n),
            ChapterAction::Select { n } => cmd_chapter_select(&mut ws, n),
            ChapterAction::Remove { n } => cmd_chapter_remove(&mut ws, n),
        },
        Commands::Style { action } => match action {
            StyleAction::Set { prompt } => cmd_style_set(&mut ws, prompt),
            StyleAction::Show => cmd_style_show(&ws),
        },
        Commands::Storyboard { n } => cmd_storyboard(&ws, n).await,
        Commands::Inspect { kind, n, timeout } => cmd_inspect(&ws, kind.into(), n, timeout).await,
        Commands::Apply {
            n,
            fingerprint,
            selection,
        } => cmd_apply(&ws, n, &fingerprint, selection.as_deref()).await,
        Commands::Discuss {
            n,
            fingerprint,
            text,
        } => cmd_discuss(&ws, n, &fingerprint, &text).await,
        Commands::Dismiss { n, fingerprint } => cmd_dismiss(&ws, n, &fingerprint).await,
        Commands::Export { out, author } => cmd_export(&ws, &out, author).await,
    };
    std::process::exit(code);
}
