//! Configuration management for the reMarkable MCP server

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::ocr::OcrBackendSetting;

pub const DEFAULT_USB_HOST: &str = "http://10.11.99.1";
pub const DEFAULT_USB_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub registry: RegistryConfig,
    pub ocr: OcrConfig,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub transport: Transport,
    pub usb_host: String,
    pub usb_timeout_secs: u64,
    pub data_dir: PathBuf,
}

/// How the tablet is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// USB web interface (HTTP, low latency)
    Usb,
    /// xochitl data directory, local copy or SSH mount
    Local,
}

/// How the document registry is populated at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Full listing before serving requests
    Eager,
    /// Batched, cancellable population while serving
    Background,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Explicit load mode; derived from the transport when unset
    pub load_mode: Option<LoadMode>,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub backend: OcrBackendSetting,
    pub google_api_key: Option<String>,
    pub rmc_path: String,
    pub tesseract_path: String,
}

impl FromStr for Transport {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "usb" => Ok(Transport::Usb),
            "local" | "ssh" => Ok(Transport::Local),
            other => Err(ConfigError::InvalidValue {
                var: "REMARKABLE_TRANSPORT",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for LoadMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eager" | "sync" => Ok(LoadMode::Eager),
            "background" | "async" => Ok(LoadMode::Background),
            other => Err(ConfigError::InvalidValue {
                var: "REMARKABLE_LOAD_MODE",
                value: other.to_string(),
            }),
        }
    }
}

fn default_data_dir() -> PathBuf {
    env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".local/share/remarkable/xochitl")
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store: StoreConfig {
                transport: Transport::Usb,
                usb_host: DEFAULT_USB_HOST.to_string(),
                usb_timeout_secs: DEFAULT_USB_TIMEOUT_SECS,
                data_dir: default_data_dir(),
            },
            registry: RegistryConfig {
                load_mode: None,
                batch_size: DEFAULT_BATCH_SIZE,
            },
            ocr: OcrConfig {
                backend: OcrBackendSetting::Auto,
                google_api_key: None,
                rmc_path: "rmc".to_string(),
                tesseract_path: "tesseract".to_string(),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build a config from a variable lookup. One invalid value fails the
    /// whole config; unset variables take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let transport = match lookup("REMARKABLE_TRANSPORT") {
            Some(value) => value.parse()?,
            None => defaults.store.transport,
        };

        let load_mode = match lookup("REMARKABLE_LOAD_MODE") {
            Some(value) if !value.trim().is_empty() => Some(value.parse()?),
            _ => None,
        };

        let backend = match lookup("REMARKABLE_OCR_BACKEND") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                var: "REMARKABLE_OCR_BACKEND",
                value,
            })?,
            None => OcrBackendSetting::Auto,
        };

        Ok(Config {
            store: StoreConfig {
                transport,
                usb_host: lookup("REMARKABLE_USB_HOST").unwrap_or(defaults.store.usb_host),
                usb_timeout_secs: parse_var(
                    &lookup,
                    "REMARKABLE_USB_TIMEOUT",
                    DEFAULT_USB_TIMEOUT_SECS,
                )?,
                data_dir: lookup("REMARKABLE_DATA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.store.data_dir),
            },
            registry: RegistryConfig {
                load_mode,
                batch_size: parse_var(&lookup, "REMARKABLE_BATCH_SIZE", DEFAULT_BATCH_SIZE)?.max(1),
            },
            ocr: OcrConfig {
                backend,
                google_api_key: lookup("GOOGLE_VISION_API_KEY").filter(|key| !key.trim().is_empty()),
                rmc_path: lookup("RMC_PATH").unwrap_or(defaults.ocr.rmc_path),
                tesseract_path: lookup("TESSERACT_PATH").unwrap_or(defaults.ocr.tesseract_path),
            },
        })
    }

    /// Effective registry load mode: USB is cheap to list in full, a data
    /// directory over SSH is not.
    pub fn load_mode(&self) -> LoadMode {
        self.registry.load_mode.unwrap_or(match self.store.transport {
            Transport::Usb => LoadMode::Eager,
            Transport::Local => LoadMode::Background,
        })
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        None => Ok(default),
    }
}
