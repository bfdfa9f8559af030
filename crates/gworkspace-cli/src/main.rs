//! gworkspace CLI
//!
//! Authentication setup, MCP client registration and the stdio server.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dialoguer::{Confirm, Select};
use tracing::{debug, info};

use gworkspace_core::auth::{
    ambient_scopes, locate_adc_file, well_known_adc_path, with_auth_retry, write_private, AdcFile,
    TokenStore,
};
use gworkspace_core::config::Config;
use gworkspace_core::logging::{init_file_logging, init_stderr_logging};
use gworkspace_core::mcp::McpServer;
use gworkspace_core::oauth::{ClientSecret, InstalledAppFlow};
use gworkspace_core::{Error, Workspace};

/// Name the server is registered under in MCP clients
const MCP_SERVER_NAME: &str = "google-workspace";

#[derive(Parser)]
#[command(name = "gworkspace")]
#[command(about = "Read-only Google Workspace (Drive, Gmail, Calendar, Sheets) for AI assistants over MCP")]
#[command(long_about = "gworkspace exposes Google Drive, Gmail, Calendar and Sheets as read-only MCP tools.

QUICK START:
  1. Authenticate:     gworkspace setup
  2. Register:         gworkspace config -f claude
  3. Check status:     gworkspace status

AUTHENTICATION:
  OAuth (recommended) stores a token in ~/.config/gworkspace/token.json.
  Application Default Credentials from gcloud are used when no token exists.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up Google authentication (OAuth or gcloud Application Default Credentials)
    Setup {
        /// Use OAuth authentication (recommended)
        #[arg(long, conflicts_with = "adc")]
        oauth: bool,
        /// Use Application Default Credentials (gcloud)
        #[arg(long)]
        adc: bool,
        /// Path to client_secret.json for OAuth
        #[arg(long, value_name = "PATH")]
        client_secret: Option<PathBuf>,
    },
    /// Run the MCP server on stdio. MCP clients call this; you don't need to.
    Run,
    /// Register the MCP server with an AI tool, or print its configuration
    Config {
        /// Target AI tool
        #[arg(short, long, value_enum)]
        format: Option<ConfigFormat>,
        /// user (system-wide) or project (current directory)
        #[arg(short, long, value_enum, default_value_t = ConfigScope::User)]
        scope: ConfigScope,
    },
    /// Show OAuth token, ADC and API access status
    Status,
    /// Remove the stored OAuth token
    Logout {
        /// Remove the OAuth token only (the default)
        #[arg(long)]
        oauth: bool,
        /// Also show how to revoke Application Default Credentials
        #[arg(long)]
        all: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ConfigFormat {
    Claude,
    Cursor,
    Gemini,
    Json,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ConfigScope {
    User,
    Project,
}

impl ConfigScope {
    fn as_str(&self) -> &'static str {
        match self {
            ConfigScope::User => "user",
            ConfigScope::Project => "project",
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            ConfigScope::User => "system-wide",
            ConfigScope::Project => "project-level",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum AuthMethod {
    OAuth,
    Adc,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::OAuth => write!(f, "oauth"),
            AuthMethod::Adc => write!(f, "adc"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The server logs to a file; stdout is the protocol channel
    if !matches!(cli.command, Commands::Run) {
        init_stderr_logging();
    }

    match cli.command {
        Commands::Setup {
            oauth,
            adc,
            client_secret,
        } => {
            let method = match (oauth, adc) {
                (true, _) => Some(AuthMethod::OAuth),
                (_, true) => Some(AuthMethod::Adc),
                _ => None,
            };
            handle_setup(method, client_secret).await
        }
        Commands::Run => handle_run().await,
        Commands::Config { format, scope } => handle_config(format, scope),
        Commands::Status => handle_status().await,
        Commands::Logout { oauth: _, all } => handle_logout(all),
    }
}

fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: ignoring unreadable config ({})", e);
        Config::default()
    })
}

// ============================================================================
// API access check
// ============================================================================

/// Why the Drive probe failed
#[derive(Debug, PartialEq, Eq)]
enum AccessFailure {
    InsufficientScopes,
    ApiNotEnabled,
    NoCredentials,
    Other(String),
}

impl AccessFailure {
    fn classify(error: &Error) -> Self {
        if error.requires_setup() {
            return AccessFailure::NoCredentials;
        }

        let message = error.to_string().to_lowercase();
        if message.contains("insufficient authentication scopes") {
            AccessFailure::InsufficientScopes
        } else if message.contains("api has not been used") || message.contains("api is disabled")
        {
            AccessFailure::ApiNotEnabled
        } else if message.contains("default credentials") {
            AccessFailure::NoCredentials
        } else {
            AccessFailure::Other(error.to_string())
        }
    }
}

impl fmt::Display for AccessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessFailure::InsufficientScopes => write!(f, "insufficient_scopes"),
            AccessFailure::ApiNotEnabled => write!(f, "api_not_enabled"),
            AccessFailure::NoCredentials => write!(f, "no_credentials"),
            AccessFailure::Other(message) => write!(f, "other ({})", message),
        }
    }
}

/// List one Drive file with fresh credentials
async fn test_api_access(config: &Config) -> std::result::Result<(), AccessFailure> {
    let workspace = Workspace::from_config(config).map_err(|e| AccessFailure::classify(&e))?;
    workspace.auth.clear_cache();

    let params = [
        ("pageSize", "1".to_string()),
        ("fields", "files(id)".to_string()),
    ];
    let params = &params;

    with_auth_retry(&workspace.auth, "drive", "v3", move |svc| async move {
        svc.get_json("files", params).await
    })
    .await
    .map(|_| ())
    .map_err(|e| {
        debug!("API access test failed: {}", e);
        AccessFailure::classify(&e)
    })
}

/// Locate an executable on PATH
fn find_in_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

// ============================================================================
// Setup
// ============================================================================

async fn handle_setup(method: Option<AuthMethod>, client_secret: Option<PathBuf>) -> Result<()> {
    let config = load_config();
    let workspace = Workspace::from_config(&config)?;

    println!("Google Workspace MCP Setup\n");
    println!("Step 1: Checking existing authentication");

    let has_token = workspace.auth.has_local_token();
    let has_adc = workspace.auth.has_ambient();

    if has_token {
        println!("  ✓ OAuth token found");
        println!("      {}", config.auth.token_file.display());
    }
    if has_adc {
        println!("  ✓ ADC credentials found");
    }

    let method = match method {
        Some(method) => {
            println!("\n  ℹ Using requested method: {}", method);
            method
        }
        None => {
            if has_token || has_adc {
                println!("\nStep 2: Testing Google Workspace API access");
                match test_api_access(&config).await {
                    Ok(()) => {
                        println!("  ✓ Workspace APIs accessible!");
                        print_setup_complete();
                        return Ok(());
                    }
                    Err(failure) => {
                        println!("  ! API test failed: {}", failure);
                        println!("  Re-authentication needed.");
                    }
                }
            }
            choose_method()?
        }
    };

    match method {
        AuthMethod::OAuth => setup_oauth(&config, &workspace, client_secret).await,
        AuthMethod::Adc => setup_adc(&config).await,
    }
}

fn choose_method() -> Result<AuthMethod> {
    println!("\nChoose authentication method\n");
    let options = &[
        "OAuth (recommended) - sign in with your Google account via browser",
        "ADC - use gcloud Application Default Credentials",
    ];
    let selection = Select::new()
        .with_prompt("Choose method")
        .items(options)
        .default(0)
        .interact()?;
    Ok(if selection == 0 {
        AuthMethod::OAuth
    } else {
        AuthMethod::Adc
    })
}

fn print_setup_complete() {
    println!("\nSetup complete!");
    println!("\nRun `gworkspace config` to register the MCP server");
}

async fn setup_oauth(
    config: &Config,
    workspace: &Workspace,
    client_secret: Option<PathBuf>,
) -> Result<()> {
    println!("\nOAuth Setup");

    let configured = &config.auth.client_secret_file;
    let mut secret_path = client_secret.clone().unwrap_or_else(|| configured.clone());

    if !secret_path.exists() {
        println!("\n  ! Client secret file not found");
        println!("      Expected at: {}", secret_path.display());
        println!(
            "
  To use OAuth, you need a client_secret.json file from Google Cloud Console:

  1. Go to https://console.cloud.google.com/
  2. Create a project (or select existing)
  3. Go to APIs & Services > Credentials
  4. Create OAuth Client ID (Desktop app)
  5. Download the JSON file
  6. Copy it to: {}

  Or run: gworkspace setup --client-secret /path/to/your/file.json
",
            configured.display()
        );
        bail!("OAuth client secret not found");
    }

    // Keep a private copy next to the token
    if client_secret.is_some() && secret_path != *configured {
        let contents = std::fs::read(&secret_path)?;
        write_private(configured, &contents)?;
        println!("  ✓ Copied client secret to {}", configured.display());
        secret_path = configured.clone();
    }

    let secret = ClientSecret::from_file(&secret_path)?;
    println!("  ✓ Client secret found");
    println!("\n  Opening browser for authentication...");
    println!("  (Sign in with your Google account and authorize access)\n");

    let flow = InstalledAppFlow::new(secret, workspace.auth.client().http().clone());
    let store = TokenStore::new(&config.auth.token_file);
    if let Err(e) = flow
        .run(&store, |url| {
            println!("  If the browser does not open, visit:\n\n  {}\n", url);
        })
        .await
    {
        println!("\n  ✗ Authentication failed or was cancelled");
        return Err(e.into());
    }

    match test_api_access(config).await {
        Ok(()) => {
            println!("\n  ✓ Authentication successful!");
            println!("  ✓ Token saved to {}", config.auth.token_file.display());
            print_setup_complete();
            Ok(())
        }
        Err(failure) => {
            println!("\n  ! Authentication completed but API test failed: {}", failure);
            println!("  The APIs may not be enabled in your Google Cloud project.");
            bail!("API access test failed");
        }
    }
}

/// `application_default_credentials.json.backup.<timestamp>` next to the original
fn backup_path_for(adc_path: &Path, timestamp: &str) -> PathBuf {
    let mut name = adc_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".backup.{}", timestamp));
    adc_path.with_file_name(name)
}

fn backup_adc_file(adc_path: &Path) -> Option<PathBuf> {
    if !adc_path.exists() {
        return None;
    }
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let backup = backup_path_for(adc_path, &timestamp);
    match std::fs::copy(adc_path, &backup) {
        Ok(_) => Some(backup),
        Err(e) => {
            eprintln!("  ! Could not back up {}: {}", adc_path.display(), e);
            None
        }
    }
}

fn run_gcloud_auth() -> bool {
    let scopes = ambient_scopes().join(",");
    println!("  Scopes: drive, gmail, calendar, sheets, cloud-platform");
    info!("Running gcloud auth application-default login");

    match Command::new("gcloud")
        .args(["auth", "application-default", "login"])
        .arg(format!("--scopes={}", scopes))
        .status()
    {
        Ok(status) => status.success(),
        Err(e) => {
            println!("  Error running gcloud: {}", e);
            false
        }
    }
}

async fn setup_adc(config: &Config) -> Result<()> {
    println!("\nADC Setup");

    if find_in_path("gcloud").is_none() {
        println!("  ✗ gcloud CLI not found");
        println!(
            "
  Please install the Google Cloud CLI:

  macOS:
    brew install --cask google-cloud-sdk

  Linux (Fedora/RHEL):
    sudo dnf install google-cloud-cli

  Linux (Ubuntu/Debian):
    sudo apt-get install google-cloud-cli

  Or download from:
    https://cloud.google.com/sdk/docs/install

  Alternatively, use OAuth instead: gworkspace setup --oauth
"
        );
        bail!("gcloud CLI not found");
    }
    println!("  ✓ gcloud CLI is installed");

    let Some(adc_path) = well_known_adc_path() else {
        bail!("Could not determine the gcloud configuration directory");
    };

    let existing_quota_project = match AdcFile::read(&adc_path) {
        Ok(adc) => {
            println!("  ✓ Existing ADC found at {}", adc_path.display());
            let project = adc.quota_project_id().map(String::from);
            if let Some(project) = &project {
                println!("  ℹ Quota project: {}", project);
            }
            project
        }
        Err(_) => None,
    };

    let backup = backup_adc_file(&adc_path);
    if let Some(backup) = &backup {
        println!("  ℹ Backed up to: {}", backup.display());
    }

    let proceed = Confirm::new()
        .with_prompt("Do you want to authenticate now?")
        .default(true)
        .interact()?;
    if !proceed {
        println!("\nCancelled.");
        return Ok(());
    }

    println!("\n  Opening browser for authentication...");
    println!("  (Sign in with your Google account)\n");

    if !run_gcloud_auth() {
        println!("\n  ✗ Authentication failed or was cancelled");
        if let Some(backup) = &backup {
            println!("\n  ℹ Backup available at: {}", backup.display());
        }
        bail!("gcloud authentication failed");
    }

    match test_api_access(config).await {
        Ok(()) => {
            println!("\n  ✓ Authentication successful!");
            print_setup_complete();
            Ok(())
        }
        Err(failure) => {
            println!("\n  ! Authentication completed but API test failed: {}", failure);
            if failure == AccessFailure::ApiNotEnabled {
                println!("  This is likely a quota project issue.");
                println!("\n  Set a quota project with Workspace APIs enabled:");
                println!("    gcloud auth application-default set-quota-project <PROJECT>");
            }
            if let Some(project) = existing_quota_project {
                println!("\n  Your previous quota project was: {}", project);
            }
            bail!("API access test failed");
        }
    }
}

// ============================================================================
// Run
// ============================================================================

async fn handle_run() -> Result<()> {
    let config = load_config();
    init_file_logging(&config, "mcp.log")?;

    info!("gworkspace MCP server starting");
    let workspace = Arc::new(Workspace::from_config(&config)?);
    McpServer::new(workspace).run().await?;
    Ok(())
}

// ============================================================================
// Config
// ============================================================================

/// The command MCP clients should spawn
fn server_command() -> String {
    find_in_path("gworkspace")
        .or_else(|| std::env::current_exe().ok())
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "gworkspace".to_string())
}

fn claude_command(cmd_path: &str, scope: ConfigScope) -> Vec<String> {
    ["claude", "mcp", "add", MCP_SERVER_NAME, "-s", scope.as_str(), "--", cmd_path, "run"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn gemini_command(cmd_path: &str, scope: ConfigScope) -> Vec<String> {
    let mut cmd = vec!["gemini".to_string(), "mcp".to_string(), "add".to_string()];
    if scope == ConfigScope::User {
        cmd.extend(["-s".to_string(), "user".to_string()]);
    }
    cmd.extend([MCP_SERVER_NAME.to_string(), cmd_path.to_string(), "run".to_string()]);
    cmd
}

fn handle_config(format: Option<ConfigFormat>, scope: ConfigScope) -> Result<()> {
    let Some(format) = format else {
        println!("MCP Configuration\n");
        println!("Usage: gworkspace config -f <format>\n");
        println!("Available formats:");
        println!("  claude   - Configure Claude Code (runs 'claude mcp add')");
        println!("  gemini   - Configure Gemini CLI (runs 'gemini mcp add')");
        println!("  cursor   - Show JSON config for Cursor (manual copy)");
        println!("  json     - Raw JSON output for other tools");
        println!("\nOptions:");
        println!("  -s, --scope  user (system-wide, default) or project (current directory)");
        println!("\nExamples:");
        println!("  gworkspace config -f claude");
        println!("  gworkspace config -f gemini -s project");
        println!("  gworkspace config -f cursor");
        return Ok(());
    };

    let cmd_path = server_command();

    match format {
        ConfigFormat::Claude => {
            if find_in_path("claude").is_none() {
                bail!("Claude Code CLI not found. Install it from https://claude.ai/download");
            }
            println!("\nClaude Code Configuration ({})", scope.describe());
            register_with(&claude_command(&cmd_path, scope), "Claude Code", "claude mcp list")
        }
        ConfigFormat::Gemini => {
            if find_in_path("gemini").is_none() {
                bail!("Gemini CLI not found. Install it with: npm install -g @google/gemini-cli");
            }
            println!("\nGemini CLI Configuration ({})", scope.describe());
            register_with(&gemini_command(&cmd_path, scope), "Gemini CLI", "gemini mcp list")
        }
        ConfigFormat::Cursor => {
            println!("\nCursor Configuration");
            println!("Add to Cursor MCP settings:\n");
            let config = serde_json::json!({
                (MCP_SERVER_NAME): {"command": cmd_path, "args": ["run"]}
            });
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigFormat::Json => {
            let config = serde_json::json!({"command": cmd_path, "args": ["run"], "env": {}});
            println!("{}", config);
            Ok(())
        }
    }
}

fn register_with(cmd: &[String], tool: &str, verify: &str) -> Result<()> {
    println!("\nThis will run the following command:\n");
    println!("  {}\n", cmd.join(" "));

    let proceed = Confirm::new()
        .with_prompt("Do you want to proceed?")
        .default(true)
        .interact()?;
    if !proceed {
        println!("\nCancelled.");
        return Ok(());
    }

    let status = Command::new(&cmd[0]).args(&cmd[1..]).status()?;
    if !status.success() {
        bail!("Failed to add MCP server to {}", tool);
    }

    println!("\n✓ MCP server added to {}!", tool);
    println!("Verify with: {}", verify);
    Ok(())
}

// ============================================================================
// Status
// ============================================================================

async fn handle_status() -> Result<()> {
    let config = load_config();

    println!("Google Workspace MCP Status");

    println!("\nOAuth:");
    let store = TokenStore::new(&config.auth.token_file);
    match store.load() {
        Ok(Some(token)) => {
            let credential = token.into_credential();
            if credential.is_valid() {
                println!("  ✓ Token valid");
            } else if credential.can_refresh() {
                println!("  ✓ Token expired, will refresh on next use");
            } else {
                println!("  ! Token expired or invalid");
            }
            println!("      {}", store.path().display());
        }
        Ok(None) => println!("    No OAuth token"),
        Err(e) => {
            println!("  ! Token unreadable: {}", e);
            println!("      {}", store.path().display());
        }
    }

    println!("\nADC (gcloud):");
    match find_in_path("gcloud") {
        Some(gcloud) => println!("  ✓ gcloud installed at {}", gcloud.display()),
        None => println!("    gcloud not installed"),
    }
    match locate_adc_file(config.auth.adc_file.as_deref()).filter(|p| p.is_file()) {
        Some(adc_path) => {
            match AdcFile::read(&adc_path) {
                Ok(adc) => {
                    println!("  ✓ ADC credentials found");
                    if let Some(project) = adc.quota_project_id() {
                        println!("  ℹ Quota project: {}", project);
                    }
                }
                Err(e) => println!("  ! ADC credentials invalid: {}", e),
            }
            println!("      {}", adc_path.display());
        }
        None => println!("    No ADC credentials"),
    }

    println!("\nAPI Access:");
    match test_api_access(&config).await {
        Ok(()) => {
            println!("  ✓ Workspace APIs accessible!");
            println!("  ✓ Ready to use!");
        }
        Err(failure) => {
            println!("  ✗ API test failed: {}", failure);
            println!("  Run: gworkspace setup");
        }
    }

    Ok(())
}

// ============================================================================
// Logout
// ============================================================================

fn handle_logout(all: bool) -> Result<()> {
    let config = load_config();

    println!("Google Workspace MCP Logout");

    let store = TokenStore::new(&config.auth.token_file);
    let removed = store.delete()?;
    if removed {
        println!("\n  ✓ Removed OAuth token");
        println!("      {}", store.path().display());
    } else {
        println!("\n    No OAuth token found");
    }

    if all {
        match well_known_adc_path().filter(|p| p.exists()) {
            Some(adc_path) => {
                println!("\n  ℹ To remove ADC credentials, run:");
                println!("      gcloud auth application-default revoke");
                println!("\n  Or manually delete: {}", adc_path.display());
            }
            None => println!("\n    No ADC credentials found"),
        }
    }

    if removed {
        println!("\nLogged out successfully.");
        println!("\nRun `gworkspace setup` to re-authenticate.");
    } else if !all {
        println!("\nNothing to remove.");
        println!("Use --all to see ADC logout instructions.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_access_failures() {
        let scopes = Error::Api {
            status: 403,
            message: "Request had insufficient authentication scopes.".to_string(),
        };
        assert_eq!(AccessFailure::classify(&scopes), AccessFailure::InsufficientScopes);

        let disabled = Error::Api {
            status: 403,
            message: "Google Drive API has not been used in project 123 before or it is disabled."
                .to_string(),
        };
        assert_eq!(AccessFailure::classify(&disabled), AccessFailure::ApiNotEnabled);

        assert_eq!(
            AccessFailure::classify(&Error::not_configured()),
            AccessFailure::NoCredentials
        );

        let other = Error::Api {
            status: 500,
            message: "Backend Error".to_string(),
        };
        assert!(matches!(AccessFailure::classify(&other), AccessFailure::Other(_)));
    }

    #[test]
    fn test_backup_path() {
        let path = Path::new("/home/u/.config/gcloud/application_default_credentials.json");
        assert_eq!(
            backup_path_for(path, "20260101_120000"),
            PathBuf::from(
                "/home/u/.config/gcloud/application_default_credentials.json.backup.20260101_120000"
            )
        );
    }

    #[test]
    fn test_registration_commands() {
        assert_eq!(
            claude_command("/bin/gworkspace", ConfigScope::Project).join(" "),
            "claude mcp add google-workspace -s project -- /bin/gworkspace run"
        );
        assert_eq!(
            gemini_command("/bin/gworkspace", ConfigScope::User).join(" "),
            "gemini mcp add -s user google-workspace /bin/gworkspace run"
        );
        assert_eq!(
            gemini_command("/bin/gworkspace", ConfigScope::Project).join(" "),
            "gemini mcp add google-workspace /bin/gworkspace run"
        );
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["gworkspace", "config", "-f", "cursor", "-s", "project"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                format: Some(ConfigFormat::Cursor),
                scope: ConfigScope::Project
            }
        ));
        assert!(Cli::try_parse_from(["gworkspace", "setup", "--oauth", "--adc"]).is_err());
    }
}
