use hive_sources::SourceSpec;
use serde::Deserialize;

// The config crate lowercases keys, so every camelCase field from the file
// carries its lowercased alias next to the spelled-out one.

fn default_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_socks_port() -> u16 {
    1080
}

fn default_workers() -> usize {
    50
}

fn default_timeout() -> u64 {
    10
}

fn default_file_name() -> String {
    "proxies.txt".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_plugin_folder() -> String {
    "plugins".to_string()
}

fn default_summary_interval() -> u64 {
    5
}

fn default_api_port() -> u16 {
    8080
}

/// Local SOCKS5 listener options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    #[serde(alias = "IP", alias = "ip")]
    pub ip: String,
    #[serde(alias = "PORT", alias = "port")]
    pub port: u16,
    #[serde(alias = "userName", alias = "username")]
    pub user_name: String,
    pub password: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            port: default_socks_port(),
            user_name: String::new(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Cron expression for whole-pool rechecking; empty disables.
    #[serde(alias = "periodicChecking", alias = "periodicchecking")]
    pub periodic_checking: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckGeolocateConfig {
    /// "open" enables geolocation mode.
    pub switch: String,
    #[serde(alias = "checkURL", alias = "checkurl")]
    pub check_url: String,
    #[serde(alias = "excludeKeywords", alias = "excludekeywords")]
    pub exclude_keywords: Vec<String>,
    #[serde(alias = "includeKeywords", alias = "includekeywords")]
    pub include_keywords: Vec<String>,
}

/// Probe options shared by the validator workers and the batch rechecker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckSocksConfig {
    #[serde(alias = "checkURL", alias = "checkurl")]
    pub check_url: String,
    #[serde(alias = "checkRspKeywords", alias = "checkrspkeywords")]
    pub check_rsp_keywords: String,
    #[serde(alias = "maxConcurrentReq", alias = "maxconcurrentreq")]
    pub max_concurrent_req: usize,
    /// Overall probe/dial timeout in seconds.
    pub timeout: u64,
    #[serde(alias = "checkGeolocate", alias = "checkgeolocate")]
    pub check_geolocate: CheckGeolocateConfig,
}

impl Default for CheckSocksConfig {
    fn default() -> Self {
        Self {
            check_url: "https://www.baidu.com".to_string(),
            check_rsp_keywords: "百度".to_string(),
            max_concurrent_req: default_workers(),
            timeout: default_timeout(),
            check_geolocate: CheckGeolocateConfig::default(),
        }
    }
}

/// Pool persistence options. `type = "redis"` selects the remote-set
/// backing; anything else falls back to the line file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: String,
    pub file_name: String,
    /// "ucb" switches selection to the quality-aware strategy.
    pub strategy: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: "file".to_string(),
            redis_host: "127.0.0.1".to_string(),
            redis_port: default_redis_port(),
            redis_password: String::new(),
            file_name: default_file_name(),
            strategy: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub plugin_folder: String,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            plugin_folder: default_plugin_folder(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    pub log_dir: String,
    /// Minutes between pool-size summary lines.
    pub ip_summary_interval: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_dir: "logs".to_string(),
            ip_summary_interval: default_summary_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiServerConfig {
    /// "open" starts the read API.
    pub switch: String,
    pub token: String,
    pub port: u16,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            switch: String::new(),
            token: String::new(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listener: ListenerConfig,
    pub task: TaskConfig,
    #[serde(alias = "checkSocks", alias = "checksocks")]
    pub check_socks: CheckSocksConfig,
    pub storage: StorageConfig,
    pub plugin: PluginConfig,
    pub log: LogConfig,
    pub apiserver: ApiServerConfig,
    /// Built-in free-list producers registered at startup.
    pub sources: Vec<SourceSpec>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_full_file() {
        let toml = r#"
[listener]
IP = "0.0.0.0"
PORT = 7777
userName = "u"
password = "p"

[task]
periodicChecking = "0 */30 * * * *"

[checkSocks]
checkURL = "https://example.com"
checkRspKeywords = "ok"
maxConcurrentReq = 8
timeout = 3

[checkSocks.checkGeolocate]
switch = "open"
checkURL = "https://geo.example.com"
excludeKeywords = ["bad"]
includeKeywords = ["good", "cn"]

[storage]
type = "redis"
redis_host = "10.0.0.2"
redis_port = 6380
redis_password = "s3cret"
file_name = "pool.txt"
strategy = "ucb"

[plugin]
plugin_folder = "producers"

[log]
enabled = true
log_dir = "out/logs"
ip_summary_interval = 2

[apiserver]
switch = "open"
token = "atoken"
port = 9090

[[sources]]
name = "lists"
schedule = "0 0 * * * *"
urls = ["http://example.com/a.txt"]
"#;
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        f.write_all(toml.as_bytes()).unwrap();
        let cfg = Config::load(f.path().to_str().unwrap()).unwrap();

        assert_eq!(cfg.listener.ip, "0.0.0.0");
        assert_eq!(cfg.listener.port, 7777);
        assert_eq!(cfg.listener.user_name, "u");
        assert_eq!(cfg.task.periodic_checking, "0 */30 * * * *");
        assert_eq!(cfg.check_socks.max_concurrent_req, 8);
        assert_eq!(cfg.check_socks.check_geolocate.switch, "open");
        assert_eq!(cfg.check_socks.check_geolocate.include_keywords.len(), 2);
        assert_eq!(cfg.storage.kind, "redis");
        assert_eq!(cfg.storage.redis_port, 6380);
        assert_eq!(cfg.storage.strategy, "ucb");
        assert_eq!(cfg.plugin.plugin_folder, "producers");
        assert_eq!(cfg.apiserver.port, 9090);
        assert_eq!(cfg.sources.len(), 1);
        assert_eq!(cfg.sources[0].scheme, "socks5");
    }

    #[test]
    fn missing_sections_take_defaults() {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        f.write_all(b"[listener]\nPORT = 1081\n").unwrap();
        let cfg = Config::load(f.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.listener.port, 1081);
        assert_eq!(cfg.listener.ip, "127.0.0.1");
        assert_eq!(cfg.storage.kind, "file");
        assert_eq!(cfg.storage.file_name, "proxies.txt");
        assert!(cfg.task.periodic_checking.is_empty());
        assert!(cfg.sources.is_empty());
    }
}
