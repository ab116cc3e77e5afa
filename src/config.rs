//! Server configuration.
//!
//! Every option can be given as a flag or through the environment (a `.env`
//! file in the working directory is loaded first):
//!
//! ```bash
//! PORT=9000 UPLOAD_DIR=/srv/slideshow slideshow-cdn
//! ```

use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_ALLOWED_ORIGIN: &str = "https://slideshow-vito-1788.web.app";
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Image upload and listing backend for the slideshow frontend")]
pub struct Config {
    /// Address to bind the HTTP listener to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Directory uploaded images are stored in and served from
    #[arg(short = 'd', long, env = "UPLOAD_DIR", default_value = "./uploads")]
    pub upload_dir: PathBuf,

    /// The single origin allowed to call the API from a browser
    #[arg(long, env = "ALLOWED_ORIGIN", default_value = DEFAULT_ALLOWED_ORIGIN)]
    pub allowed_origin: String,

    /// Largest accepted image, in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: u64,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[cfg(test)]
    pub fn for_dir(upload_dir: impl Into<PathBuf>) -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            upload_dir: upload_dir.into(),
            allowed_origin: DEFAULT_ALLOWED_ORIGIN.to_string(),
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }
}
