use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use kbx_core::{DocumentStore, KbError, MergeConfig, Merger, TagStore};
use kbx_store::{
    GroupFilter, GroupUpdate, KbStore, NewGroup, ParentFilter, GROUP_TYPES, MEMBER_ROLES,
};

const DEFAULT_CONFIG: &str = "kbx.toml";
const DEFAULT_DB: &str = "kbx.sqlite";

#[derive(Parser, Debug)]
#[command(name = "kbx", version, about = "Personal knowledge-base manager")]
struct Cli {
    /// Path to a TOML config file (defaults to ./kbx.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Database path (overrides the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or upgrade the database
    Init,
    /// Document operations
    Doc {
        #[command(subcommand)]
        command: DocCommands,
    },
    /// Document group operations
    Group {
        #[command(subcommand)]
        command: GroupCommands,
    },
    /// Duplicate detection and merging
    Merge {
        #[command(subcommand)]
        command: MergeCommands,
    },
    /// Documents related to the given one (same project only)
    Related {
        id: i64,
        #[arg(long, default_value_t = 5)]
        limit: usize,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum DocCommands {
    /// Save a document (content from --content, --file, or stdin)
    Add {
        title: String,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Print a document and bump its view counter
    Show {
        id: i64,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    List {
        #[arg(long)]
        project: Option<String>,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Soft-delete a document
    Delete { id: i64 },
    /// Attach tags to a document
    Tag { id: i64, tags: Vec<String> },
    /// List the active groups a document belongs to
    Groups {
        id: i64,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum GroupCommands {
    Create {
        name: String,
        #[arg(long = "type", value_name = "TYPE")]
        group_type: Option<String>,
        #[arg(long)]
        parent: Option<i64>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    List {
        #[arg(long, action = ArgAction::SetTrue)]
        top_level: bool,
        #[arg(long)]
        parent: Option<i64>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long = "type", value_name = "TYPE")]
        group_type: Option<String>,
        #[arg(long, action = ArgAction::SetTrue)]
        include_inactive: bool,
        /// Batched top-level listing with live child/document counts
        #[arg(long, action = ArgAction::SetTrue)]
        counts: bool,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Group details, members, and the recursive document count
    Show {
        id: i64,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    Update {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        parent: Option<i64>,
        /// Move the group to the top level
        #[arg(long, action = ArgAction::SetTrue, conflicts_with = "parent")]
        clear_parent: bool,
        #[arg(long = "type", value_name = "TYPE")]
        group_type: Option<String>,
        #[arg(long)]
        project: Option<String>,
        /// Re-activate a soft-deleted group
        #[arg(long, action = ArgAction::SetTrue)]
        restore: bool,
    },
    /// Soft-delete by default; --hard removes the row and re-parents children
    Delete {
        id: i64,
        #[arg(long, action = ArgAction::SetTrue)]
        hard: bool,
    },
    AddDoc {
        group: i64,
        doc: i64,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        by: Option<String>,
    },
    RemoveDoc { group: i64, doc: i64 },
}

#[derive(Subcommand, Debug)]
enum MergeCommands {
    /// Scan for likely duplicates
    Find {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        threshold: Option<f64>,
        /// Execute every suggested merge
        #[arg(long, action = ArgAction::SetTrue)]
        apply: bool,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Plan (and optionally execute) a merge of two specific documents
    Pair {
        doc1: i64,
        doc2: i64,
        #[arg(long, action = ArgAction::SetTrue)]
        apply: bool,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
}

#[derive(Debug, Default, Deserialize)]
struct Config {
    db: Option<PathBuf>,
    #[serde(default)]
    merge: MergeSection,
}

#[derive(Debug, Default, Deserialize)]
struct MergeSection {
    similarity_threshold: Option<f64>,
    prefilter_threshold: Option<f64>,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let db_path = cli
        .db
        .or(config.db.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB));
    let store = KbStore::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::debug!(db = %db_path.display(), "store opened");

    let mut merge_config = MergeConfig::default();
    if let Some(threshold) = config.merge.similarity_threshold {
        merge_config.similarity_threshold = threshold;
    }
    if let Some(threshold) = config.merge.prefilter_threshold {
        merge_config.prefilter_threshold = threshold;
    }

    match cli.command {
        Commands::Init => {
            store.init()?;
            println!("database ready at {}", db_path.display());
            Ok(())
        }
        Commands::Doc { command } => run_doc(&store, command),
        Commands::Group { command } => run_group(&store, command),
        Commands::Merge { command } => {
            let merger = Merger::with_config(store.clone(), merge_config)?;
            run_merge(&merger, command)
        }
        Commands::Related { id, limit, json } => {
            let merger = Merger::with_config(store.clone(), merge_config)?;
            let related = merger.find_related_documents(id, limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&related)?);
            } else if related.is_empty() {
                println!("no related documents");
            } else {
                for doc in related {
                    println!("#{:<6} {:.2}  {}", doc.id, doc.score, doc.title);
                }
            }
            Ok(())
        }
    }
}

fn load_config(explicit: Option<&std::path::Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if !default.exists() {
                return Ok(Config::default());
            }
            default
        }
    };
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
}

fn run_doc(store: &KbStore, command: DocCommands) -> Result<()> {
    match command {
        DocCommands::Add {
            title,
            content,
            file,
            project,
            tags,
        } => {
            let body = match (content, file) {
                (Some(text), _) => text,
                (None, Some(path)) => fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, None) => {
                    let mut buf = String::new();
                    io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };
            let id = store.add_document(&title, &body, project.as_deref())?;
            if !tags.is_empty() {
                store.add_tags(id, &tags.into_iter().collect())?;
            }
            println!("saved #{id}: {title}");
            Ok(())
        }
        DocCommands::Show { id, json } => {
            let doc = store
                .get_document(id)?
                .ok_or(KbError::DocumentNotFound(id))?;
            store.touch_document(id)?;
            let tags = store.document_tags(id)?;
            if json {
                let mut value = serde_json::to_value(&doc)?;
                value["tags"] = serde_json::to_value(&tags)?;
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("# {} (#{})", doc.title, doc.id);
                if let Some(project) = &doc.project {
                    println!("project: {project}");
                }
                if !tags.is_empty() {
                    println!(
                        "tags: {}",
                        tags.iter().cloned().collect::<Vec<_>>().join(", ")
                    );
                }
                println!("views: {}\n", doc.access_count);
                println!("{}", doc.content);
            }
            Ok(())
        }
        DocCommands::List { project, json } => {
            let docs = store.active_documents(project.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&docs)?);
            } else if docs.is_empty() {
                println!("no documents");
            } else {
                for doc in docs {
                    let project = doc.project.as_deref().unwrap_or("-");
                    println!("#{:<6} [{:>12}] {}", doc.id, project, doc.title);
                }
            }
            Ok(())
        }
        DocCommands::Delete { id } => {
            if store.delete_document(id)? {
                println!("deleted #{id}");
                Ok(())
            } else {
                Err(KbError::DocumentNotFound(id).into())
            }
        }
        DocCommands::Tag { id, tags } => {
            store
                .get_document(id)?
                .ok_or(KbError::DocumentNotFound(id))?;
            let added = store.add_tags(id, &tags.into_iter().collect())?;
            println!("added {} tag(s)", added.len());
            Ok(())
        }
        DocCommands::Groups { id, json } => {
            let groups = store.get_document_groups(id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&groups)?);
            } else if groups.is_empty() {
                println!("not in any group");
            } else {
                for entry in groups {
                    println!(
                        "#{:<6} [{:>10}] {} (role: {})",
                        entry.group.id, entry.group.group_type, entry.group.name, entry.role
                    );
                }
            }
            Ok(())
        }
    }
}

fn run_group(store: &KbStore, command: GroupCommands) -> Result<()> {
    match command {
        GroupCommands::Create {
            name,
            group_type,
            parent,
            project,
            description,
        } => {
            if let Some(kind) = group_type.as_deref() {
                warn_unknown(kind, &GROUP_TYPES, "group type");
            }
            let id = store.create_group(
                &name,
                NewGroup {
                    group_type,
                    parent_group_id: parent,
                    project,
                    description,
                    created_by: None,
                },
            )?;
            println!("created group #{id}: {name}");
            Ok(())
        }
        GroupCommands::List {
            top_level,
            parent,
            project,
            group_type,
            include_inactive,
            counts,
            json,
        } => {
            if counts {
                let summaries = store.list_top_groups_with_counts()?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&summaries)?);
                } else {
                    for summary in summaries {
                        println!(
                            "#{:<6} [{:>10}] {} ({} docs, {} subgroups)",
                            summary.group.id,
                            summary.group.group_type,
                            summary.group.name,
                            summary.live_doc_count,
                            summary.child_group_count
                        );
                    }
                }
                return Ok(());
            }
            let filter = GroupFilter {
                parent: match (top_level, parent) {
                    (true, _) => ParentFilter::TopLevel,
                    (false, Some(id)) => ParentFilter::ChildrenOf(id),
                    (false, None) => ParentFilter::Any,
                },
                project,
                group_type,
                include_inactive,
            };
            let groups = store.list_groups(&filter)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&groups)?);
            } else if groups.is_empty() {
                println!("no groups");
            } else {
                for group in groups {
                    let marker = if group.is_active { "" } else { " (inactive)" };
                    println!(
                        "#{:<6} [{:>10}] {} ({} docs){}",
                        group.id, group.group_type, group.name, group.doc_count, marker
                    );
                }
            }
            Ok(())
        }
        GroupCommands::Show { id, json } => {
            let group = store.get_group(id)?.ok_or(KbError::GroupNotFound(id))?;
            let members = store.get_group_members(id)?;
            let recursive = store.get_recursive_doc_count(id)?;
            if json {
                let value = serde_json::json!({
                    "group": group,
                    "members": members,
                    "recursive_doc_count": recursive,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("# {} (#{}, {})", group.name, group.id, group.group_type);
                if let Some(description) = &group.description {
                    println!("{description}");
                }
                if let Some(parent) = group.parent_group_id {
                    println!("parent: #{parent}");
                }
                println!(
                    "documents: {} direct, {} recursive; tokens: {}, cost: ${:.4}",
                    group.doc_count, recursive, group.total_tokens, group.total_cost_usd
                );
                for member in members {
                    println!(
                        "  #{:<6} [{:>11}] {}",
                        member.document.id, member.role, member.document.title
                    );
                }
            }
            Ok(())
        }
        GroupCommands::Update {
            id,
            name,
            description,
            parent,
            clear_parent,
            group_type,
            project,
            restore,
        } => {
            if let Some(kind) = group_type.as_deref() {
                warn_unknown(kind, &GROUP_TYPES, "group type");
            }
            let update = GroupUpdate {
                name,
                description: description.map(Some),
                parent_group_id: if clear_parent {
                    Some(None)
                } else {
                    parent.map(Some)
                },
                group_type,
                project: project.map(Some),
                is_active: restore.then_some(true),
            };
            if store.update_group(id, &update)? {
                println!("updated group #{id}");
            } else {
                println!("nothing to update for group #{id}");
            }
            Ok(())
        }
        GroupCommands::Delete { id, hard } => {
            if store.delete_group(id, hard)? {
                println!(
                    "{} group #{id}",
                    if hard { "deleted" } else { "deactivated" }
                );
                Ok(())
            } else {
                Err(KbError::GroupNotFound(id).into())
            }
        }
        GroupCommands::AddDoc {
            group,
            doc,
            role,
            by,
        } => {
            if let Some(role) = role.as_deref() {
                warn_unknown(role, &MEMBER_ROLES, "role");
            }
            store
                .get_document(doc)?
                .ok_or(KbError::DocumentNotFound(doc))?;
            store.get_group(group)?.ok_or(KbError::GroupNotFound(group))?;
            // A duplicate edge is not a failure from the user's point of view.
            if store.add_document_to_group(group, doc, role.as_deref(), by.as_deref())? {
                println!("added #{doc} to group #{group}");
            } else {
                println!("#{doc} is already in group #{group}");
            }
            Ok(())
        }
        GroupCommands::RemoveDoc { group, doc } => {
            if store.remove_document_from_group(group, doc)? {
                println!("removed #{doc} from group #{group}");
                Ok(())
            } else {
                Err(anyhow!("#{doc} is not in group #{group}"))
            }
        }
    }
}

fn run_merge(merger: &Merger<KbStore>, command: MergeCommands) -> Result<()> {
    match command {
        MergeCommands::Find {
            project,
            threshold,
            apply,
            json,
        } => {
            let progress = |current: u64, _total: u64, found: usize| {
                eprint!("\rscanning: {current:>3}% ({found} found)");
                let _ = io::stderr().flush();
            };
            let candidates =
                merger.find_merge_candidates(project.as_deref(), threshold, Some(&progress))?;
            eprintln!();
            if json {
                println!("{}", serde_json::to_string_pretty(&candidates)?);
            } else if candidates.is_empty() {
                println!("no merge candidates");
            } else {
                for cand in &candidates {
                    println!(
                        "{:.2}  #{} \"{}\"  <->  #{} \"{}\"\n      {} | {}",
                        cand.similarity_score,
                        cand.doc1_id,
                        cand.doc1_title,
                        cand.doc2_id,
                        cand.doc2_title,
                        cand.merge_reason,
                        cand.recommended_action
                    );
                }
            }
            if apply {
                let mut merged = 0usize;
                for cand in &candidates {
                    // Earlier merges in the batch may have retired one side.
                    let strategy = match merger.suggest_merge_strategy(cand.doc1_id, cand.doc2_id) {
                        Ok(strategy) => strategy,
                        Err(err) if err.downcast_ref::<KbError>().is_some() => {
                            eprintln!(
                                "skipped #{} <-> #{}: {err}",
                                cand.doc1_id, cand.doc2_id
                            );
                            continue;
                        }
                        Err(err) => return Err(err),
                    };
                    if merger.execute_merge(&strategy, true) {
                        merged += 1;
                    } else {
                        eprintln!(
                            "skipped #{} <-> #{}: merge failed",
                            cand.doc1_id, cand.doc2_id
                        );
                    }
                }
                println!("merged {merged} of {} candidate pair(s)", candidates.len());
            }
            Ok(())
        }
        MergeCommands::Pair {
            doc1,
            doc2,
            apply,
            json,
        } => {
            let strategy = merger.suggest_merge_strategy(doc1, doc2)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&strategy)?);
            } else {
                println!(
                    "keep #{} / retire #{}\ntitle: {}\ntags: {}",
                    strategy.keep_doc_id,
                    strategy.merge_doc_id,
                    strategy.merged_title,
                    strategy
                        .merged_tags
                        .iter()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            if apply {
                if merger.execute_merge(&strategy, true) {
                    println!(
                        "merged #{} into #{}",
                        strategy.merge_doc_id, strategy.keep_doc_id
                    );
                } else {
                    return Err(anyhow!(
                        "merge of #{} into #{} failed",
                        strategy.merge_doc_id,
                        strategy.keep_doc_id
                    ));
                }
            }
            Ok(())
        }
    }
}

fn warn_unknown(value: &str, known: &[&str], what: &str) {
    if !known.contains(&value) {
        eprintln!(
            "warning: unusual {what} \"{value}\" (known: {})",
            known.join(", ")
        );
    }
}
