use std::{fs, path::PathBuf};

use clap::{Parser, Subcommand};
use wxweb_session::{
    classify, Contact, ContactIndex, EngineConfig, HotResumeSnapshot, JsonFileSnapshotStore,
    Message, RawEvent, SnapshotStore, StoreError,
};

/// Offline tools for wxweb-session: inspect snapshots and classify events.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to a JSON engine configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Choose a command to run.
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the identity and cursor held by a hot-resume snapshot.
    InspectSnapshot { file: PathBuf },
    /// Classify a raw sync event against a contact list.
    Classify {
        /// The raw event as JSON.
        event: PathBuf,
        /// JSON array of contacts.
        #[arg(long)]
        contacts: Option<PathBuf>,
        /// User name of the logged-in account.
        #[arg(long)]
        self_user: String,
    },
    /// Print the current configuration.
    ShowConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::InspectSnapshot { file } => {
            let store = JsonFileSnapshotStore::new(&file);
            match store.read_snapshot() {
                Ok(bytes) => print_snapshot(&HotResumeSnapshot::from_bytes(&bytes)?),
                Err(StoreError::NotFound) => {
                    eprintln!("No snapshot at {}.", file.display());
                }
                Err(err) => return Err(err.into()),
            }
        }
        Commands::Classify {
            event,
            contacts,
            self_user,
        } => {
            let raw: RawEvent = serde_json::from_slice(&fs::read(&event)?)?;
            let index: ContactIndex = match contacts {
                Some(path) => serde_json::from_slice::<Vec<Contact>>(&fs::read(path)?)?
                    .into_iter()
                    .collect(),
                None => ContactIndex::new(),
            };
            let me = index
                .get(&self_user)
                .cloned()
                .unwrap_or_else(|| Contact::new(self_user.as_str(), ""));

            let msg = classify(&raw, &index, &me);
            println!("{}", render(&msg, &index));
            if let Some(err) = msg.resolution_error() {
                eprintln!("Unresolved: {err}");
            }
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(serde_json::from_slice(&fs::read(path)?)?),
        None => Ok(EngineConfig::default()),
    }
}

// Tokens are never printed.
fn print_snapshot(snapshot: &HotResumeSnapshot) {
    println!("Version:    {}", snapshot.version);
    println!("Uin:        {}", snapshot.credentials.uin);
    println!("Device id:  {}", snapshot.credentials.device_id);
    println!(
        "Domain:     {}",
        snapshot.transport.domain.as_deref().unwrap_or("-")
    );
    println!("Cursor:     {}", snapshot.cursor.to_query_value());
    match &snapshot.ticket {
        Some(ticket) => println!("Ticket:     {} ({})", ticket.uuid, ticket.issued_at),
        None => println!("Ticket:     -"),
    }
    println!("Written at: {}", snapshot.written_at);
}

fn render(msg: &Message, contacts: &ContactIndex) -> String {
    let name = |user_name: &str| {
        contacts
            .get(user_name)
            .map(|c| c.name().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| user_name.to_string())
    };
    let time = msg
        .created_at()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    let sender = match &msg.sender_in_group {
        Some(member) => format!("{}/{}", name(msg.from_user_name()), member),
        None => name(msg.from_user_name()),
    };
    format!(
        "[{}][{}] {} -> {}: {}",
        time,
        msg.category.tag(),
        sender,
        name(msg.to_user_name()),
        msg.content
    )
}
