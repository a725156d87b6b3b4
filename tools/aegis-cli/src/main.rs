//! Aegis CLI: talks to a running store-service over HTTP to manage
//! services, policies, role policies and extension functions.

use aegis_cli::{
    build_client, function_url, functions_url, normalize_endpoint, policies_url, policy_url,
    read_json_file, role_policies_url, role_policy_url, service_url, services_url, ClientConfig,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "aegis")]
#[command(about = "Aegis CLI - service, policy, role-policy and function management")]
#[command(version = aegis_core::VERSION)]
struct Cli {
    /// store-service base URL
    #[arg(long, global = true, default_value = "http://localhost:8081")]
    endpoint: String,

    /// request timeout in seconds
    #[arg(long, global = true, default_value_t = 5)]
    timeout: u64,

    /// identify this client using a TLS certificate file
    #[arg(long, global = true)]
    cert: Option<PathBuf>,

    /// identify this client using a TLS key file
    #[arg(long, global = true)]
    key: Option<PathBuf>,

    /// verify the server's certificate chain using this CA bundle
    #[arg(long, global = true)]
    cacert: Option<PathBuf>,

    /// skip TLS certificate verification
    #[arg(long, global = true, default_value_t = false)]
    skipverify: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Service management commands
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
    /// Policy management commands
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },
    /// Role policy management commands
    RolePolicy {
        #[command(subcommand)]
        action: RolePolicyAction,
    },
    /// Extension function management commands
    Function {
        #[command(subcommand)]
        action: FunctionAction,
    },
    /// Store and service health
    Status,
}

#[derive(Subcommand)]
enum ServiceAction {
    /// Get a service by name
    Get { name: String },
    /// Create a service from a JSON definition file
    Create {
        name: String,
        #[arg(long, short = 'f')]
        json_file: PathBuf,
    },
    /// Delete a service
    Delete { name: String },
}

#[derive(Subcommand)]
enum PolicyAction {
    /// Get a policy by id
    Get {
        #[arg(long, short = 's')]
        service: String,
        id: String,
    },
    /// Create a policy in a service from a JSON definition file
    Create {
        #[arg(long, short = 's')]
        service: String,
        #[arg(long, short = 'f')]
        json_file: PathBuf,
    },
    /// Delete a policy by id
    Delete {
        #[arg(long, short = 's')]
        service: String,
        id: String,
    },
}

#[derive(Subcommand)]
enum RolePolicyAction {
    /// Get a role policy by id
    Get {
        #[arg(long, short = 's')]
        service: String,
        id: String,
    },
    /// Create a role policy in a service from a JSON definition file
    Create {
        #[arg(long, short = 's')]
        service: String,
        #[arg(long, short = 'f')]
        json_file: PathBuf,
    },
    /// Delete a role policy by id
    Delete {
        #[arg(long, short = 's')]
        service: String,
        id: String,
    },
}

#[derive(Subcommand)]
enum FunctionAction {
    /// Get an extension function by name
    Get { name: String },
    /// Create an extension function from a JSON definition file
    Create {
        name: String,
        #[arg(long, short = 'f')]
        json_file: PathBuf,
    },
    /// Delete an extension function
    Delete { name: String },
}

impl From<&Cli> for ClientConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            timeout: Duration::from_secs(cli.timeout),
            skipverify: cli.skipverify,
            cacert: cli.cacert.clone(),
            cert: cli.cert.clone(),
            key: cli.key.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = build_client(&ClientConfig::from(&cli))?;
    let endpoint = normalize_endpoint(&cli.endpoint);

    match &cli.command {
        Commands::Service { action } => handle_service_action(&client, &endpoint, action).await,
        Commands::Policy { action } => handle_policy_action(&client, &endpoint, action).await,
        Commands::RolePolicy { action } => handle_role_policy_action(&client, &endpoint, action).await,
        Commands::Function { action } => handle_function_action(&client, &endpoint, action).await,
        Commands::Status => handle_status(&client, &endpoint).await,
    }
}

async fn handle_service_action(
    client: &reqwest::Client,
    endpoint: &str,
    action: &ServiceAction,
) -> anyhow::Result<()> {
    match action {
        ServiceAction::Get { name } => print_response(client.get(service_url(endpoint, name)).send().await?).await,
        ServiceAction::Create { name, json_file } => {
            let body = read_json_file(json_file)?;
            let resp = client
                .post(services_url(endpoint))
                .body(body)
                .header("content-type", "application/json")
                .send()
                .await?;
            println!("service '{name}' created");
            print_response(resp).await
        }
        ServiceAction::Delete { name } => {
            print_response(client.delete(service_url(endpoint, name)).send().await?).await
        }
    }
}

async fn handle_policy_action(
    client: &reqwest::Client,
    endpoint: &str,
    action: &PolicyAction,
) -> anyhow::Result<()> {
    match action {
        PolicyAction::Get { service, id } => {
            print_response(client.get(policy_url(endpoint, service, id)).send().await?).await
        }
        PolicyAction::Create { service, json_file } => {
            let body = read_json_file(json_file)?;
            let resp = client
                .post(policies_url(endpoint, service))
                .body(body)
                .header("content-type", "application/json")
                .send()
                .await?;
            print_response(resp).await
        }
        PolicyAction::Delete { service, id } => {
            print_response(client.delete(policy_url(endpoint, service, id)).send().await?).await
        }
    }
}

async fn handle_role_policy_action(
    client: &reqwest::Client,
    endpoint: &str,
    action: &RolePolicyAction,
) -> anyhow::Result<()> {
    match action {
        RolePolicyAction::Get { service, id } => {
            print_response(client.get(role_policy_url(endpoint, service, id)).send().await?).await
        }
        RolePolicyAction::Create { service, json_file } => {
            let body = read_json_file(json_file)?;
            let resp = client
                .post(role_policies_url(endpoint, service))
                .body(body)
                .header("content-type", "application/json")
                .send()
                .await?;
            print_response(resp).await
        }
        RolePolicyAction::Delete { service, id } => {
            print_response(client.delete(role_policy_url(endpoint, service, id)).send().await?).await
        }
    }
}

async fn handle_function_action(
    client: &reqwest::Client,
    endpoint: &str,
    action: &FunctionAction,
) -> anyhow::Result<()> {
    match action {
        FunctionAction::Get { name } => {
            print_response(client.get(function_url(endpoint, name)).send().await?).await
        }
        FunctionAction::Create { name, json_file } => {
            let body = read_json_file(json_file)?;
            let resp = client
                .post(functions_url(endpoint))
                .body(body)
                .header("content-type", "application/json")
                .send()
                .await?;
            println!("function '{name}' created");
            print_response(resp).await
        }
        FunctionAction::Delete { name } => {
            print_response(client.delete(function_url(endpoint, name)).send().await?).await
        }
    }
}

async fn handle_status(client: &reqwest::Client, endpoint: &str) -> anyhow::Result<()> {
    print_response(client.get(format!("{endpoint}/health")).send().await?).await
}

async fn print_response(resp: reqwest::Response) -> anyhow::Result<()> {
    let status = resp.status();
    let body = resp.text().await?;
    if status.is_success() {
        println!("{body}");
        Ok(())
    } else {
        anyhow::bail!("request failed with status {status}: {body}")
    }
}
