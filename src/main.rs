use std::{io::Write, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use drive_portal::{
    config::AppConfig,
    google_drive::{
        parse_callback_url, recursive_search, DriveClient, DriveFolder, DriveItem, FileStore,
        FolderListing, TokenManager,
    },
    types::UploadSource,
};
use futures::{pin_mut, TryStreamExt};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "drive-portal",
    about = "Browse and manage a tenant's Google Drive folder",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the Google consent URL that starts authorization
    AuthUrl {
        /// Page to come back to once authorized
        #[arg(default_value = "/")]
        return_url: String,
    },
    /// Finish authorization with the URL Google redirected the browser to
    Callback { url: String },
    /// Show whether a valid session is stored
    Status,
    /// Forget stored tokens
    SignOut,
    /// List a folder (default: the configured root)
    Ls { folder: Option<String> },
    /// Folders named like NAME, exact matches first
    FindFolder { name: String },
    /// Every folder whose name contains TERM, across all pages
    Folders {
        #[arg(default_value = "")]
        term: String,
    },
    /// Search the whole tree below the root for names containing TERM
    Search {
        term: String,
        #[arg(long)]
        root: Option<String>,
    },
    /// Upload a local file
    Upload {
        path: PathBuf,
        #[arg(long)]
        folder: Option<String>,
    },
    /// Download a file by id
    Download { id: String, out: PathBuf },
    /// Create a folder
    Mkdir {
        name: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Delete a file or folder by id
    Rm { id: String },
    /// Show folder metadata
    Info { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let store = Arc::new(FileStore::open(&config.token_store_path)?);
    let tokens = Arc::new(TokenManager::new(config.auth_config(), store));
    let client = DriveClient::new(tokens.clone());

    run(cli.command, &config, &client).await
}

async fn run(command: Commands, config: &AppConfig, client: &DriveClient) -> anyhow::Result<()> {
    let tokens = client.tokens();
    let root = config.root_folder_id.as_str();

    match command {
        Commands::AuthUrl { return_url } => {
            let redirect = tokens.start_auth(&return_url)?;
            println!("{}", redirect.url);
        }
        Commands::Callback { url } => {
            let (code, state) = parse_callback_url(&url)?;
            let return_url = tokens.handle_callback(&code, &state).await?;
            println!("Authorized.");
            if let Some(u) = return_url {
                println!("Return to: {u}");
            }
        }
        Commands::Status => match tokens.load_token()? {
            Some(t) if tokens.is_authenticated() => println!("Signed in, token valid until {}", t.expires_at),
            Some(t) if t.refresh_token.is_some() => println!("Token expired, will refresh on next use"),
            _ => println!("Not signed in"),
        },
        Commands::SignOut => {
            tokens.sign_out()?;
            println!("Signed out.");
        }
        Commands::Ls { folder } => {
            let listing = client
                .list_files_in_folder(folder.as_deref().unwrap_or(root))
                .await?;
            print_listing(&listing);
        }
        Commands::FindFolder { name } => {
            for f in client.search_folders_by_name(&name).await? {
                print_folder(&f);
            }
        }
        Commands::Folders { term } => {
            let s = client.folder_search_stream(&term);
            pin_mut!(s);
            while let Some(f) = s.try_next().await? {
                print_folder(&f);
            }
        }
        Commands::Search { term, root: from } => {
            let results = recursive_search(
                client,
                from.as_deref().unwrap_or(root),
                &term,
                config.search_limits(),
            )
            .await?;
            print_listing(&FolderListing {
                folders: results.folders,
                files: results.files,
            });
        }
        Commands::Upload { path, folder } => {
            let source = UploadSource::from_path(&path).await?;
            let item = client
                .upload_file(&source, folder.as_deref().unwrap_or(root), |p| {
                    eprint!("\r{:>3}%", p);
                    let _ = std::io::stderr().flush();
                })
                .await?;
            eprintln!();
            print_item(&item);
        }
        Commands::Download { id, out } => {
            let mut reader = client.open_reader(&id).await?;
            let mut file = tokio::fs::File::create(&out)
                .await
                .with_context(|| format!("Could not create file '{}'", out.to_string_lossy()))?;
            let n = tokio::io::copy(&mut reader, &mut file).await?;
            println!("{n} bytes written to {}", out.to_string_lossy());
        }
        Commands::Mkdir { name, parent } => {
            let f = client
                .create_folder(&name, parent.as_deref().unwrap_or(root))
                .await?;
            print_folder(&f);
        }
        Commands::Rm { id } => {
            client.delete_file(&id).await?;
            println!("Deleted {id}");
        }
        Commands::Info { id } => {
            let f = client.get_folder_info(&id).await?;
            print_folder(&f);
            if let Some(link) = f.web_view_link {
                println!("  {link}");
            }
        }
    }

    Ok(())
}

fn print_folder(f: &DriveFolder) {
    let modified = f
        .modified_time
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    println!("d {:<44} {:>16} {}", f.id, modified, f.name);
}

fn print_item(f: &DriveItem) {
    let size = f.size.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
    println!("- {:<44} {:>16} {} ({})", f.id, size, f.name, f.mime_type);
}

fn print_listing(listing: &FolderListing) {
    if listing.is_empty() {
        println!("(empty)");
        return;
    }
    listing.folders.iter().for_each(print_folder);
    listing.files.iter().for_each(print_item);
}
