use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use similar::{ChangeTag, TextDiff};

use pyxis_core::catalog;
use pyxis_core::changes::{Change, ChangeSet, compute_changes};
use pyxis_core::descriptor::Descriptor;
use pyxis_core::graph::DependencyGraph;
use pyxis_core::schema::DescriptorSchema;
use pyxis_core::stack::{DEFAULT_STACK_FILE, Stack};
use pyxis_state::{
    BackendConfig, Coordinator, ProjectionEngine, RecordState, Snapshot, create_backend,
    resolve_desired,
};

#[derive(Parser)]
#[command(name = "pyxis")]
#[command(about = "Remote state coordination for declarative infrastructure stacks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the state backend and write the initial snapshot
    Init {
        /// Path to the stack file
        #[arg(default_value = DEFAULT_STACK_FILE)]
        file: PathBuf,
    },
    /// Validate the stack file
    Validate {
        /// Path to the stack file
        #[arg(default_value = DEFAULT_STACK_FILE)]
        file: PathBuf,
    },
    /// Show the changes a cycle would write, without locking or writing
    Plan {
        /// Path to the stack file
        #[arg(default_value = DEFAULT_STACK_FILE)]
        file: PathBuf,

        /// Show a line diff of the snapshot
        #[arg(long)]
        diff: bool,
    },
    /// Run a coordination cycle to reach the desired state
    Apply {
        /// Path to the stack file
        #[arg(default_value = DEFAULT_STACK_FILE)]
        file: PathBuf,
    },
    /// Run a coordination cycle that removes every record
    Destroy {
        /// Path to the stack file
        #[arg(default_value = DEFAULT_STACK_FILE)]
        file: PathBuf,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Print the latest snapshot
    Show {
        /// Path to the stack file
        #[arg(default_value = DEFAULT_STACK_FILE)]
        file: PathBuf,
    },
    /// Force release an abandoned lock
    ForceUnlock {
        /// Holder token of the lock to release
        lock_id: String,

        /// Path to the stack file
        #[arg(default_value = DEFAULT_STACK_FILE)]
        file: PathBuf,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { file } => run_init(&file).await,
        Commands::Validate { file } => run_validate(&file),
        Commands::Plan { file, diff } => run_plan(&file, diff).await,
        Commands::Apply { file } => run_apply(&file).await,
        Commands::Destroy { file, auto_approve } => run_destroy(&file, auto_approve).await,
        Commands::Show { file } => run_show(&file).await,
        Commands::ForceUnlock { lock_id, file } => run_force_unlock(&file, &lock_id).await,
        Commands::Completions { shell } => run_completions(shell),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn load_stack(file: &PathBuf) -> Result<Stack, String> {
    Stack::load(file).map_err(|e| e.to_string())
}

async fn coordinator_for(stack: &Stack) -> Result<Coordinator, String> {
    let config = BackendConfig::from_block(&stack.backend);
    let backend = create_backend(&config)
        .await
        .map_err(|e| format!("Failed to create backend: {}", e))?;

    Ok(Coordinator::new(
        backend.store,
        backend.locks,
        stack.config.state_id(),
    ))
}

fn get_schemas() -> HashMap<String, DescriptorSchema> {
    let mut all_schemas = HashMap::new();
    for schema in catalog::all_schemas() {
        all_schemas.insert(schema.kind.clone(), schema);
    }
    all_schemas
}

fn validate_descriptors(descriptors: &[Descriptor]) -> Result<(), String> {
    let schemas = get_schemas();
    let mut all_errors = Vec::new();

    for descriptor in descriptors {
        if let Some(schema) = schemas.get(&descriptor.id.kind)
            && let Err(errors) = schema.validate(&descriptor.attributes)
        {
            for error in errors {
                all_errors.push(format!("{}: {}", descriptor.id, error));
            }
        }
    }

    // References must resolve and the graph must be acyclic
    match DependencyGraph::build(descriptors) {
        Ok(graph) => {
            if let Err(e) = graph.topological_order() {
                all_errors.push(e.to_string());
            }
        }
        Err(e) => all_errors.push(e.to_string()),
    }

    if all_errors.is_empty() {
        Ok(())
    } else {
        Err(all_errors.join("\n"))
    }
}

async fn run_init(file: &PathBuf) -> Result<(), String> {
    let stack = load_stack(file)?;
    validate_descriptors(&stack.descriptors)?;

    let coordinator = coordinator_for(&stack).await?;

    println!(
        "{}",
        format!("Initializing backend for {}...", stack.config.state_id()).cyan()
    );

    let created = coordinator
        .ensure_initialized()
        .await
        .map_err(|e| e.to_string())?;

    if created {
        println!(
            "{}",
            "✓ Backend initialized and initial snapshot written."
                .green()
                .bold()
        );
    } else {
        println!("{}", "✓ Backend already initialized.".green().bold());
    }

    Ok(())
}

fn run_validate(file: &PathBuf) -> Result<(), String> {
    let stack = load_stack(file)?;

    println!("{}", "Validating...".cyan());

    validate_descriptors(&stack.descriptors)?;

    println!(
        "{}",
        format!(
            "✓ {} descriptors validated successfully.",
            stack.descriptors.len()
        )
        .green()
        .bold()
    );

    for descriptor in &stack.descriptors {
        println!("  • {}", descriptor.id);
    }

    Ok(())
}

async fn run_plan(file: &PathBuf, diff: bool) -> Result<(), String> {
    let stack = load_stack(file)?;
    validate_descriptors(&stack.descriptors)?;

    let coordinator = coordinator_for(&stack).await?;
    let (current, changes, projected) = plan_changes(&coordinator, &stack).await?;

    if changes.is_empty() {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return Ok(());
    }

    print_changes(&changes);

    if diff {
        print_snapshot_diff(&current, &projected);
    }

    Ok(())
}

async fn run_apply(file: &PathBuf) -> Result<(), String> {
    let stack = load_stack(file)?;
    validate_descriptors(&stack.descriptors)?;

    let coordinator = coordinator_for(&stack).await?;
    let (_, changes, _) = plan_changes(&coordinator, &stack).await?;

    if changes.is_empty() {
        println!("{}", "No changes needed.".green());
        return Ok(());
    }

    print_changes(&changes);
    println!();
    println!("{}", "Applying changes...".cyan().bold());

    let engine = ProjectionEngine::new(stack.seed_bindings());
    let report = coordinator
        .run_cycle("apply", &engine, &stack.descriptors)
        .await
        .map_err(|e| e.to_string())?;

    println!();
    let summary = changes.summary();
    println!(
        "{}",
        format!(
            "Apply complete! {} created, {} updated, {} deleted. State serial: {}.",
            summary.create, summary.update, summary.delete, report.serial
        )
        .green()
        .bold()
    );

    Ok(())
}

async fn run_destroy(file: &PathBuf, auto_approve: bool) -> Result<(), String> {
    let stack = load_stack(file)?;
    let coordinator = coordinator_for(&stack).await?;

    let current = match coordinator.read_current().await.map_err(|e| e.to_string())? {
        Some((snapshot, _)) => snapshot,
        None => {
            println!("{}", "No snapshot exists. Nothing to destroy.".yellow());
            return Ok(());
        }
    };

    if current.records.is_empty() {
        println!("{}", "No records to destroy.".green());
        return Ok(());
    }

    println!("{}", "Destroy Plan:".red().bold());
    println!();

    for record in &current.records {
        println!("  {} {}.{}", "-".red().bold(), record.kind, record.name);
    }

    println!();
    println!(
        "Plan: {} to destroy.",
        current.records.len().to_string().red()
    );
    println!();

    if !auto_approve {
        println!(
            "{}",
            "Do you really want to destroy all records?".yellow().bold()
        );
        println!(
            "  {}",
            "This action cannot be undone. Type 'yes' to confirm.".yellow()
        );
        print!("\n  Enter a value: ");
        std::io::stdout().flush().map_err(|e| e.to_string())?;

        let mut input = String::new();
        std::io::stdin()
            .read_line(&mut input)
            .map_err(|e| e.to_string())?;

        if input.trim() != "yes" {
            println!();
            println!("{}", "Destroy cancelled.".yellow());
            return Ok(());
        }
        println!();
    }

    println!("{}", "Destroying records...".red().bold());

    let engine = ProjectionEngine::new(stack.seed_bindings());
    let report = coordinator
        .run_cycle("destroy", &engine, &[])
        .await
        .map_err(|e| e.to_string())?;

    println!();
    println!(
        "{}",
        format!(
            "Destroy complete! {} records removed. State serial: {}.",
            current.records.len(),
            report.serial
        )
        .green()
        .bold()
    );

    Ok(())
}

async fn run_show(file: &PathBuf) -> Result<(), String> {
    let stack = load_stack(file)?;
    let coordinator = coordinator_for(&stack).await?;

    if let Some(lock) = coordinator.read_lock().await.map_err(|e| e.to_string())? {
        println!(
            "{}",
            format!(
                "State is locked by {} (operation: {}, since {}, lock ID: {})",
                lock.who, lock.operation, lock.created, lock.id
            )
            .yellow()
        );
        println!();
    }

    match coordinator.read_current().await.map_err(|e| e.to_string())? {
        Some((snapshot, version)) => {
            println!(
                "{} {} (serial {}, version {})",
                "State:".cyan().bold(),
                coordinator.state_id(),
                snapshot.serial,
                version
            );
            println!("{} {}", "Lineage:".cyan(), snapshot.lineage);
            println!();

            let json = serde_json::to_string_pretty(&snapshot).map_err(|e| e.to_string())?;
            println!("{}", json);
            Ok(())
        }
        None => {
            println!(
                "{}",
                "No snapshot exists yet. Run 'pyxis init' first.".yellow()
            );
            Ok(())
        }
    }
}

async fn run_force_unlock(file: &PathBuf, lock_id: &str) -> Result<(), String> {
    let stack = load_stack(file)?;
    let coordinator = coordinator_for(&stack).await?;

    coordinator
        .force_unlock(lock_id)
        .await
        .map_err(|e| e.to_string())?;

    println!("{}", format!("✓ Lock {} released.", lock_id).green().bold());
    Ok(())
}

fn run_completions(shell: Shell) -> Result<(), String> {
    let mut command = Cli::command();
    clap_complete::generate(shell, &mut command, "pyxis", &mut std::io::stdout());
    Ok(())
}

/// Read the current snapshot (without locking) and compute the change set
async fn plan_changes(
    coordinator: &Coordinator,
    stack: &Stack,
) -> Result<(Snapshot, ChangeSet, Snapshot), String> {
    let current = coordinator
        .read_current()
        .await
        .map_err(|e| e.to_string())?
        .map(|(snapshot, _)| snapshot)
        .unwrap_or_default();

    let desired =
        resolve_desired(&stack.seed_bindings(), &stack.descriptors).map_err(|e| e.to_string())?;

    let changes = compute_changes(&desired, &current.record_map());

    let mut projected = Snapshot::with_lineage(current.lineage.clone());
    projected.serial = current.serial;
    for record in &desired {
        projected.upsert_record(RecordState {
            kind: record.id.kind.clone(),
            name: record.id.name.clone(),
            attributes: record.attributes.clone(),
        });
    }

    Ok((current, changes, projected))
}

fn print_changes(changes: &ChangeSet) {
    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    for change in changes.changes() {
        match change {
            Change::Create(id) => {
                println!("  {} {}", "+".green().bold(), id.to_string().cyan().bold());
            }
            Change::Update {
                id,
                changed_attributes,
            } => {
                println!("  {} {}", "~".yellow().bold(), id.to_string().cyan().bold());
                for attribute in changed_attributes {
                    println!("      {} {}", "~".yellow(), attribute);
                }
            }
            Change::Delete(id) => {
                println!("  {} {}", "-".red().bold(), id.to_string().cyan().bold());
            }
            Change::NoChange(_) => {}
        }
    }

    println!();
    println!("{}", changes.summary());
}

fn print_snapshot_diff(current: &Snapshot, projected: &Snapshot) {
    let Ok(before) = serde_json::to_string_pretty(&current.records) else {
        return;
    };
    let Ok(after) = serde_json::to_string_pretty(&projected.records) else {
        return;
    };

    println!();
    println!("{}", "Snapshot diff:".cyan().bold());

    let diff = TextDiff::from_lines(&before, &after);
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-".red(),
            ChangeTag::Insert => "+".green(),
            ChangeTag::Equal => " ".normal(),
        };
        print!("{}{}", sign, change);
    }
}
