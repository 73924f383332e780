use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use persistent_oauth::{
    AccessType, ClientConfiguration, Error, GoogleProvider, PersistentClient, ProviderClient,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "persistent-oauth",
    about = "Authorize against Google interactively and keep the token refreshed on disk."
)]
struct Cli {
    /// Path to the client-secrets JSON downloaded from the provider.
    #[arg(long)]
    auth_config: PathBuf,

    /// Where to persist the user token.
    #[arg(long)]
    token: PathBuf,

    /// Scope to request; repeat for multiple scopes.
    #[arg(long = "scope", required = true)]
    scopes: Vec<String>,

    /// Application name sent with token requests.
    #[arg(long, default_value = "persistent-oauth-cli")]
    application_name: String,

    /// Request an online token (no refresh token, re-consent on expiry).
    #[arg(long)]
    online: bool,

    /// Drop the cached token and re-authorize from scratch.
    #[arg(long)]
    force_refresh: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let config = ClientConfiguration::new()
        .with_application_name(cli.application_name)
        .with_access_type(if cli.online {
            AccessType::Online
        } else {
            AccessType::Offline
        })
        .with_scopes(cli.scopes)
        .with_auth_config_path(cli.auth_config)
        .with_token_path(&cli.token);

    let mut client = PersistentClient::new(config, GoogleProvider::new);
    client.set_authorization_callback(|url| {
        eprintln!("Open the following URL, sign in, and grant access:");
        eprintln!("{url}");
        if let Err(err) = webbrowser::open(url) {
            eprintln!("Failed to open browser automatically: {err}");
        }

        eprint!("Code > ");
        io::stderr().flush()?;
        let mut code = String::new();
        io::stdin().lock().read_line(&mut code)?;
        Ok(code.trim().to_string())
    });

    let handle = client.authenticated_client(cli.force_refresh).await?;
    match handle.token() {
        Some(token) => {
            println!("{}", serde_json::to_string_pretty(token)?);
        }
        None => eprintln!("no token installed"),
    }
    eprintln!("Token persisted at {}", cli.token.display());
    Ok(())
}
