use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use wellness_core::*;

#[derive(Parser)]
#[command(name = "wellness")]
#[command(about = "Wellness assessment modules and client profiles", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List modules, or the required/optional split for a population
    Modules {
        #[arg(long)]
        population: Option<String>,
    },

    /// Print a module's full definition
    Show { module: String },

    /// Show or assign a user's population
    Population {
        #[arg(long)]
        user: String,

        /// New population tag
        tag: Option<String>,

        /// Remove the assigned population
        #[arg(long, conflicts_with = "tag")]
        clear: bool,
    },

    /// Merge answers into a user's module record
    Save {
        #[arg(long)]
        user: String,

        #[arg(long)]
        module: String,

        /// JSON object of question id to answer
        #[arg(long, default_value = "{}")]
        answers: String,

        /// Mark the module completed
        #[arg(long)]
        complete: bool,
    },

    /// Completed and required modules with the completion percentage
    Progress {
        #[arg(long)]
        user: String,
    },

    /// Set the profile-level completion marker
    Finish {
        #[arg(long)]
        user: String,
    },

    /// Print the unified profile
    Profile {
        #[arg(long)]
        user: String,
    },

    /// Assemble the user's packet
    Packet {
        #[arg(long)]
        user: String,

        /// Emit the payload as JSON instead of text
        #[arg(long)]
        json: bool,

        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Export every assessment record to CSV
    Export {
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    wellness_core::logging::init(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(data_dir) = &cli.data_dir {
        config.data.data_dir = data_dir.clone();
    }
    tracing::debug!("Using data directory {:?}", config.data.data_dir);

    let registry = registry_from_config(&config)?;
    let store = FileProfileStore::new(config.data.profiles_dir());
    let aggregator = ProfileAggregator::with_config(&registry, store.clone(), &config.profile);

    match cli.command {
        Commands::Modules { population } => cmd_modules(&registry, population.as_deref()),
        Commands::Show { module } => {
            let definition = registry
                .get_module(&module)
                .ok_or(Error::UnknownModule(module))?;
            print_json(definition)
        }
        Commands::Population { user, tag, clear } => {
            if clear {
                aggregator.set_population(&user, None)?;
            } else if let Some(tag) = tag {
                aggregator.set_population(&user, Some(&tag))?;
            }
            let population = aggregator.store().load(&user)?.population;
            println!("{}", population.as_deref().unwrap_or("(none)"));
            Ok(())
        }
        Commands::Save {
            user,
            module,
            answers,
            complete,
        } => {
            let answers: Answers = serde_json::from_str(&answers)?;
            let record = aggregator.save_module_to_profile(&user, &module, answers, complete)?;
            print_json(&record)
        }
        Commands::Progress { user } => print_json(&aggregator.progress_summary(&user)?),
        Commands::Finish { user } => {
            let at = aggregator.mark_profile_complete(&user)?;
            println!("Profile complete since {}", at.to_rfc3339());
            Ok(())
        }
        Commands::Profile { user } => print_json(&aggregator.unified_profile(&user)?),
        Commands::Packet { user, json, out } => {
            cmd_packet(&aggregator, &config, &user, json, out)
        }
        Commands::Export { out } => {
            let count = export_records_csv(&store, &out)?;
            println!("Exported {} records to {}", count, out.display());
            Ok(())
        }
    }
}

fn cmd_modules(registry: &ModuleRegistry, population: Option<&str>) -> Result<()> {
    match population {
        Some(tag) => print_json(&registry.available_modules(Some(tag))),
        None => {
            let summaries: Vec<ModuleSummary> =
                registry.modules().iter().map(ModuleDefinition::summary).collect();
            print_json(&summaries)
        }
    }
}

fn cmd_packet(
    aggregator: &ProfileAggregator<'_, FileProfileStore>,
    config: &Config,
    user: &str,
    json: bool,
    out: Option<PathBuf>,
) -> Result<()> {
    let loaded;
    let library = match &config.packet.library_file {
        Some(path) => {
            loaded = Library::load(path)?;
            &loaded
        }
        None => default_library(),
    };

    let profile = aggregator.unified_profile(user)?;
    let packet = build_packet(
        aggregator.registry(),
        &profile,
        library,
        &config.packet,
        chrono::Utc::now(),
    );

    let rendered = if json {
        serde_json::to_string_pretty(&packet)?
    } else {
        packet.render_text()
    };

    match out {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, rendered)?;
            println!("Wrote packet to {}", path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
