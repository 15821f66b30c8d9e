use clap::Parser;
use std::path::{Path, PathBuf};

/// Server settings. Every flag can also come from its `OBJECT_STORE_*`
/// environment variable; a flag on the command line wins over the variable.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Filesystem-backed S3-compatible object store")]
pub struct AppConfig {
    /// Address to listen on
    #[arg(long, env = "OBJECT_STORE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "OBJECT_STORE_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Root directory; each bucket is a directory below it
    #[arg(long, env = "OBJECT_STORE_STORAGE_DIR", default_value = "./data/objects")]
    pub storage_dir: PathBuf,

    /// Where ETags are cached between requests
    #[arg(
        long,
        env = "OBJECT_STORE_DATABASE_URL",
        default_value = "sqlite://./data/meta/checksums.db"
    )]
    pub database_url: String,

    /// Create the checksum table and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Local file behind a `sqlite://` or `sqlite:` URL, if it names one.
    pub fn sqlite_path(&self) -> Option<&Path> {
        let path = self
            .database_url
            .strip_prefix("sqlite://")
            .or_else(|| self.database_url.strip_prefix("sqlite:"))?;
        let path = path.split('?').next().unwrap_or(path);
        (!path.is_empty() && path != ":memory:").then_some(Path::new(path))
    }
}
