//! PageBlocker CLI
//!
//! CLI tool for editing the stored rule tree, checking URLs against it and
//! running the background monitor over a stream of navigation events.

mod store;
mod watch;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

use pb_core::schedule::parse_time;
use pb_core::{Matcher, NodeKind, RuleTree};
use pb_runtime::{Config, Editor, FileStorage, NodeDraft};

use store::{read_document, runtime, write_document, Store};

#[derive(Parser)]
#[command(name = "pb-cli")]
#[command(about = "PageBlocker rule tree editor and tools")]
struct Cli {
    /// Config file (defaults to the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage directory, overriding the config
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Group,
    Url,
    Word,
}

impl Kind {
    fn node_kind(self) -> NodeKind {
        match self {
            Kind::Group => NodeKind::Group,
            Kind::Url => NodeKind::UrlRule,
            Kind::Word => NodeKind::WordRule,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create the empty rule tree if none is stored yet
    Init {
        /// Name of the root group
        #[arg(long, default_value = RuleTree::DEFAULT_ROOT_NAME)]
        root_name: String,
    },

    /// Print the stored rule tree
    Show {
        /// Print the stored JSON document instead of the outline
        #[arg(long)]
        json: bool,
    },

    /// Add a node under the group at PARENT
    Add {
        /// Node type
        #[arg(short, long, value_enum)]
        kind: Kind,

        /// Group name, URL fragment or word
        #[arg(long)]
        value: String,

        /// Display name (URL and word rules)
        #[arg(short, long)]
        name: Option<String>,

        /// Start of the activity window (HH:MM)
        #[arg(long)]
        start: Option<String>,

        /// End of the activity window (HH:MM)
        #[arg(long)]
        end: Option<String>,

        /// Pathname of the parent group (empty for the root)
        parent: Vec<String>,
    },

    /// Change the node at PATH; omitted fields keep their value
    Edit {
        #[arg(long)]
        value: Option<String>,

        #[arg(short, long)]
        name: Option<String>,

        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,

        /// Remove the activity window
        #[arg(long, conflicts_with_all = ["start", "end"])]
        always: bool,

        #[arg(required = true)]
        path: Vec<String>,
    },

    /// Delete the node at PATH
    Delete {
        #[arg(required = true)]
        path: Vec<String>,
    },

    /// Check whether a URL is blocked
    Check {
        url: String,

        /// Time of day to evaluate schedules at (defaults to now)
        #[arg(long, conflicts_with = "ignore_schedules")]
        at: Option<String>,

        /// Treat every rule as always active
        #[arg(long)]
        ignore_schedules: bool,
    },

    /// Convert a document file to the current schema
    Migrate {
        #[arg(short, long)]
        input: PathBuf,

        /// Output file; defaults to stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Replace the stored tree with the migrated one
        #[arg(long, conflicts_with = "output")]
        import: bool,
    },

    /// Redirect blocked navigations read from stdin (`<tab id> <url>` lines)
    Monitor,
}

fn main() {
    let cli = Cli::parse();

    let result = load_config(cli.config.as_deref()).and_then(|config| {
        init_logging(&config, cli.verbose);
        let store = Store::open(config, cli.store_dir.as_deref())?;
        run(cli.command, store)
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<Config, String> {
    Config::load(path).map_err(|e| e.to_string())
}

fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose { "debug" } else { config.logging.level.as_str() };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn run(command: Commands, store: Store) -> Result<(), String> {
    match command {
        Commands::Init { root_name } => cmd_init(&store, &root_name),
        Commands::Show { json } => cmd_show(&store, json),
        Commands::Add {
            kind,
            value,
            name,
            start,
            end,
            parent,
        } => {
            let mut draft = match kind.node_kind() {
                NodeKind::Group => NodeDraft::group(value),
                NodeKind::UrlRule => NodeDraft::url(value),
                NodeKind::WordRule => NodeDraft::word(value),
            };
            if let Some(name) = name {
                draft = draft.named(name);
            }
            cmd_add(&store, &parent, draft.between(start, end))
        }
        Commands::Edit {
            value,
            name,
            start,
            end,
            always,
            path,
        } => cmd_edit(&store, &path, EditFields { value, name, start, end, always }),
        Commands::Delete { path } => cmd_delete(&store, &path),
        Commands::Check {
            url,
            at,
            ignore_schedules,
        } => cmd_check(&store, &url, at.as_deref(), ignore_schedules),
        Commands::Migrate { input, output, import } => cmd_migrate(&store, &input, output.as_deref(), import),
        Commands::Monitor => watch::run_monitor(store),
    }
}

async fn open_editor(store: &Store) -> Result<Editor<FileStorage>, String> {
    Editor::open(store.bridge())
        .await
        .map_err(|e| format!("Failed to load rule tree: {}", e))
}

fn cmd_init(store: &Store, root_name: &str) -> Result<(), String> {
    let created = runtime()?
        .block_on(store.bridge().install(root_name))
        .map_err(|e| format!("Failed to install rule tree: {}", e))?;
    if created {
        println!("Created rule tree '{}' in {}", root_name, store.dir.display());
    } else {
        println!("Rule tree already present in {}", store.dir.display());
    }
    Ok(())
}

fn cmd_show(store: &Store, json: bool) -> Result<(), String> {
    let tree = runtime()?
        .block_on(store.bridge().load())
        .map_err(|e| format!("Failed to load rule tree: {}", e))?;
    if json {
        let text = pb_core::encode_string(&tree).map_err(|e| format!("Failed to encode rule tree: {}", e))?;
        println!("{}", text);
        return Ok(());
    }

    print!("{}", tree);
    println!("  Rules:    {}", tree.rule_count());
    for path in tree.unknown_nodes() {
        println!("  Warning:  unknown rule type at {}", path.join("/"));
    }
    Ok(())
}

fn cmd_add(store: &Store, parent: &[String], draft: NodeDraft) -> Result<(), String> {
    runtime()?.block_on(async {
        let mut editor = open_editor(store).await?;
        for key in parent {
            editor.enter(key).map_err(|e| e.to_string())?;
        }
        let path = editor.add(draft).await.map_err(|e| e.to_string())?;
        println!("Saved {}", path.join("/"));
        Ok(())
    })
}

struct EditFields {
    value: Option<String>,
    name: Option<String>,
    start: Option<String>,
    end: Option<String>,
    always: bool,
}

impl EditFields {
    /// Overlay the given fields on a draft prefilled from the current node.
    fn apply(self, mut draft: NodeDraft) -> NodeDraft {
        if let Some(value) = self.value {
            match NodeKind::from_code(&draft.kind) {
                Some(NodeKind::Group) => draft.name = Some(value),
                Some(NodeKind::UrlRule) => draft.url = Some(value),
                Some(NodeKind::WordRule) => draft.word = Some(value),
                None => {}
            }
        }
        if let Some(name) = self.name {
            draft.name = Some(name);
        }
        if self.always {
            draft.start_time = None;
            draft.end_time = None;
        }
        if self.start.is_some() {
            draft.start_time = self.start;
        }
        if self.end.is_some() {
            draft.end_time = self.end;
        }
        draft
    }
}

fn cmd_edit(store: &Store, path: &[String], fields: EditFields) -> Result<(), String> {
    runtime()?.block_on(async {
        let mut editor = open_editor(store).await?;
        let current = editor
            .tree()
            .get_node_from_pathname(path)
            .map_err(|e| e.to_string())?;
        let draft = fields.apply(NodeDraft::from(current));
        let path = editor.edit(path, draft).await.map_err(|e| e.to_string())?;
        println!("Saved {}", path.join("/"));
        Ok(())
    })
}

fn cmd_delete(store: &Store, path: &[String]) -> Result<(), String> {
    runtime()?.block_on(async {
        let mut editor = open_editor(store).await?;
        let removed = editor.delete(path).await.map_err(|e| e.to_string())?;
        println!("Deleted {} ({})", path.join("/"), removed.kind_code());
        Ok(())
    })
}

fn cmd_check(store: &Store, url: &str, at: Option<&str>, ignore_schedules: bool) -> Result<(), String> {
    let tree = runtime()?
        .block_on(store.bridge().load_or_default())
        .map_err(|e| format!("Failed to load rule tree: {}", e))?;

    let now = match at {
        Some(at) => Some(parse_time(at).map_err(|e| e.to_string())?),
        None if ignore_schedules || !store.config.monitor.enforce_schedules => None,
        None => Some(chrono::Local::now().time()),
    };

    let matcher = Matcher::new(store.config.monitor.unknown_kinds);
    let result = matcher.match_url_at(url, tree.root(), now);
    match result.rule_path {
        Some(path) => println!("BLOCK {} (rule: {})", url, path.join("/")),
        None => println!("ALLOW {}", url),
    }
    Ok(())
}

fn cmd_migrate(store: &Store, input: &Path, output: Option<&Path>, import: bool) -> Result<(), String> {
    let tree = read_document(input)?;

    if import {
        runtime()?
            .block_on(store.bridge().save(&tree))
            .map_err(|e| format!("Failed to store rule tree: {}", e))?;
        println!("Imported {} rules into {}", tree.rule_count(), store.dir.display());
        return Ok(());
    }

    match output {
        Some(output) => {
            write_document(output, &tree)?;
            println!("Migrated '{}' to '{}'", input.display(), output.display());
        }
        None => {
            let text = pb_core::encode_string(&tree).map_err(|e| format!("Failed to encode rule tree: {}", e))?;
            println!("{}", text);
        }
    }
    Ok(())
}
