//! Client construction and URL building for the Aegis CLI, split out of
//! `main.rs` so it can be exercised without going through `clap`.

use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub skipverify: bool,
    pub cacert: Option<std::path::PathBuf>,
    pub cert: Option<std::path::PathBuf>,
    pub key: Option<std::path::PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            skipverify: false,
            cacert: None,
            cert: None,
            key: None,
        }
    }
}

pub fn build_client(config: &ClientConfig) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(config.timeout);

    if config.skipverify {
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(cacert) = &config.cacert {
        let pem = std::fs::read(cacert)?;
        builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
    }
    if let (Some(cert), Some(key)) = (&config.cert, &config.key) {
        let mut pem = std::fs::read(cert)?;
        pem.extend(std::fs::read(key)?);
        builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
    }
    Ok(builder.build()?)
}

pub fn normalize_endpoint(endpoint: &str) -> String {
    endpoint.trim_end_matches('/').to_string()
}

pub fn service_url(endpoint: &str, name: &str) -> String {
    format!("{}/api/v1/services/{name}", normalize_endpoint(endpoint))
}

pub fn services_url(endpoint: &str) -> String {
    format!("{}/api/v1/services", normalize_endpoint(endpoint))
}

pub fn policy_url(endpoint: &str, service: &str, id: &str) -> String {
    format!("{}/api/v1/policies/{service}/{id}", normalize_endpoint(endpoint))
}

pub fn policies_url(endpoint: &str, service: &str) -> String {
    format!("{}/api/v1/policies/{service}", normalize_endpoint(endpoint))
}

pub fn role_policy_url(endpoint: &str, service: &str, id: &str) -> String {
    format!(
        "{}/api/v1/role-policies/{service}/{id}",
        normalize_endpoint(endpoint)
    )
}

pub fn role_policies_url(endpoint: &str, service: &str) -> String {
    format!("{}/api/v1/role-policies/{service}", normalize_endpoint(endpoint))
}

pub fn function_url(endpoint: &str, name: &str) -> String {
    format!("{}/api/v1/functions/{name}", normalize_endpoint(endpoint))
}

pub fn functions_url(endpoint: &str) -> String {
    format!("{}/api/v1/functions", normalize_endpoint(endpoint))
}

pub fn read_json_file(path: &Path) -> anyhow::Result<String> {
    Ok(std::fs::read_to_string(path)?)
}
