//! Command-line flags and the `hodld.conf` file.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use hodld_consensus::Network;
use hodld_log::{Format, Level, LogConfig};
use hodld_masternode::config::SNAPSHOT_FILE_NAME;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const CONF_FILE_NAME: &str = "hodld.conf";

const KNOWN_CONF_KEYS: &[&str] = &[
    "testnet",
    "regtest",
    "loglevel",
    "logformat",
    "logtimestamps",
    "mncache",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingValue(String),
    InvalidValue { key: String, value: String },
    UnknownArgument(String),
    ConfRead { path: PathBuf, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingValue(flag) => write!(f, "missing value for {flag}"),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid {key} value '{value}'")
            }
            ConfigError::UnknownArgument(arg) => write!(f, "unknown argument '{arg}'"),
            ConfigError::ConfRead { path, message } => {
                write!(f, "failed to read {}: {message}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    Summary,
    List,
    Help,
    Version,
}

impl Command {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "summary" => Some(Self::Summary),
            "list" => Some(Self::List),
            "help" => Some(Self::Help),
            "version" => Some(Self::Version),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ToolConfig {
    pub command: Command,
    pub network: Network,
    pub data_dir: PathBuf,
    pub conf_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub json: bool,
    pub log: LogConfig,
    pub ignored_conf_keys: Vec<String>,
}

pub fn usage() -> String {
    [
        "Usage:",
        "  hodld-mncache [summary|list] [options]",
        "",
        "Commands:",
        "  summary  Print registry counters (default)",
        "  list     Print one line per masternode",
        "  help     Print this help and exit",
        "  version  Print version and exit",
        "",
        "Options:",
        "  --datadir <dir>  Base data directory (default: ./data)",
        "  --conf <path>  Config file path (default: <datadir>/hodld.conf)",
        "  --snapshot <path>  Snapshot file (default: <datadir>/mncache.dat)",
        "  --network <mainnet|testnet|regtest>  Network whose snapshot magic to expect",
        "  --json  Print JSON instead of text",
        "  --loglevel <level>  Log verbosity (error|warn|info|debug|trace) (default: info)",
        "  --logformat <format>  Log output format (text|json) (default: text)",
        "  --logtimestamps / --no-logtimestamps  Toggle timestamps in text logs",
    ]
    .join("\n")
}

fn next_value<I>(args: &mut I, flag: &str) -> Result<String, ConfigError>
where
    I: Iterator<Item = String>,
{
    args.next()
        .ok_or_else(|| ConfigError::MissingValue(flag.to_string()))
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Flags win over the conf file; within the file the last value of a key wins.
pub fn parse_args_from<I>(raw_args: I) -> Result<ToolConfig, ConfigError>
where
    I: IntoIterator<Item = String>,
{
    let mut command = Command::Summary;
    let mut data_dir: Option<PathBuf> = None;
    let mut conf_path: Option<PathBuf> = None;
    let mut snapshot_path: Option<PathBuf> = None;
    let mut network: Option<Network> = None;
    let mut json = false;
    let mut level: Option<Level> = None;
    let mut format: Option<Format> = None;
    let mut timestamps: Option<bool> = None;

    let mut args = raw_args.into_iter().peekable();
    if let Some(first) = args.peek() {
        if let Some(parsed) = Command::parse(first) {
            command = parsed;
            let _ = args.next();
        }
    }

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => command = Command::Help,
            "--version" | "-V" => command = Command::Version,
            "--datadir" | "--data-dir" => {
                data_dir = Some(PathBuf::from(next_value(&mut args, &arg)?));
            }
            "--conf" => conf_path = Some(PathBuf::from(next_value(&mut args, &arg)?)),
            "--snapshot" => snapshot_path = Some(PathBuf::from(next_value(&mut args, &arg)?)),
            "--network" => {
                let value = next_value(&mut args, &arg)?;
                network = Some(Network::parse(&value).ok_or_else(|| invalid("network", &value))?);
            }
            "--testnet" => network = Some(Network::Testnet),
            "--regtest" => network = Some(Network::Regtest),
            "--json" => json = true,
            "--loglevel" | "--log-level" => {
                let value = next_value(&mut args, &arg)?;
                level = Some(Level::parse(&value).ok_or_else(|| invalid("loglevel", &value))?);
            }
            "--logformat" | "--log-format" => {
                let value = next_value(&mut args, &arg)?;
                format = Some(Format::parse(&value).ok_or_else(|| invalid("logformat", &value))?);
            }
            "--logtimestamps" | "--log-timestamps" => timestamps = Some(true),
            "--no-logtimestamps" | "--no-log-timestamps" => timestamps = Some(false),
            _ => return Err(ConfigError::UnknownArgument(arg)),
        }
    }

    let data_dir = data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let conf_path = conf_path.unwrap_or_else(|| data_dir.join(CONF_FILE_NAME));
    let mut ignored_conf_keys = Vec::new();

    if let Some(conf) = load_conf(&conf_path)? {
        if network.is_none() {
            if conf_flag(&conf, "regtest")? == Some(true) {
                network = Some(Network::Regtest);
            } else if conf_flag(&conf, "testnet")? == Some(true) {
                network = Some(Network::Testnet);
            }
        }
        if level.is_none() {
            if let Some(raw) = conf_last(&conf, "loglevel") {
                level = Some(Level::parse(raw).ok_or_else(|| invalid("loglevel", raw))?);
            }
        }
        if format.is_none() {
            if let Some(raw) = conf_last(&conf, "logformat") {
                format = Some(Format::parse(raw).ok_or_else(|| invalid("logformat", raw))?);
            }
        }
        if timestamps.is_none() {
            timestamps = conf_flag(&conf, "logtimestamps")?;
        }
        if snapshot_path.is_none() {
            snapshot_path = conf_last(&conf, "mncache").map(|raw| data_dir.join(raw));
        }
        ignored_conf_keys = conf
            .keys()
            .filter(|key| !KNOWN_CONF_KEYS.contains(&key.as_str()))
            .cloned()
            .collect();
        ignored_conf_keys.sort();
    }

    let defaults = LogConfig::default();
    Ok(ToolConfig {
        command,
        network: network.unwrap_or(Network::Mainnet),
        snapshot_path: snapshot_path.unwrap_or_else(|| data_dir.join(SNAPSHOT_FILE_NAME)),
        data_dir,
        conf_path,
        json,
        log: LogConfig {
            level: level.unwrap_or(defaults.level),
            format: format.unwrap_or(defaults.format),
            timestamps: timestamps.unwrap_or(defaults.timestamps),
        },
        ignored_conf_keys,
    })
}

/// Reads `key=value` lines. `#` and `;` start comments, a bare key means `1`,
/// keys are case-insensitive. A missing file yields `None`.
pub fn load_conf(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(ConfigError::ConfRead {
                path: path.to_path_buf(),
                message: err.to_string(),
            })
        }
    };

    let mut entries: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let line = match raw_line.find(&['#', ';'][..]) {
            Some(idx) => &raw_line[..idx],
            None => raw_line,
        }
        .trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        entries
            .entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    Ok(Some(entries))
}

fn conf_last<'a>(conf: &'a HashMap<String, Vec<String>>, key: &str) -> Option<&'a str> {
    conf.get(key)
        .and_then(|values| values.last())
        .map(String::as_str)
}

fn conf_flag(conf: &HashMap<String, Vec<String>>, key: &str) -> Result<Option<bool>, ConfigError> {
    match conf_last(conf, key) {
        Some(raw) => parse_conf_bool(raw)
            .map(Some)
            .ok_or_else(|| invalid(key, raw)),
        None => Ok(None),
    }
}

pub fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
