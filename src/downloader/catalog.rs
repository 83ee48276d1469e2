//! Catalog query downloader
//!
//! Reads `catalog.query_processors` from the export specification. Each
//! processor fetches `/ermrest/catalog/{catalog_id}{query_path}` and writes the
//! response body to `<output_path>.<ext>`. With a `bag` directive the outputs are
//! staged as a BagIt bag and archived as `<bag_name>.zip`.

use super::{DownloadRequest, Downloader};
use crate::error::{DownloaderError, Result};
use crate::types::{Artifact, Credential};
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

/// Bag name used when the bag directive names none
const DEFAULT_BAG_NAME: &str = "export";

/// The only archiver this downloader can produce
const SUPPORTED_ARCHIVER: &str = "zip";

/// One entry of `catalog.query_processors`
#[derive(Debug, Clone, Deserialize)]
struct QueryProcessor {
    processor: String,
    #[serde(default)]
    processor_params: ProcessorParams,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ProcessorParams {
    query_path: Option<String>,
    output_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Csv,
    Json,
    JsonStream,
}

impl OutputFormat {
    fn parse(name: &str) -> std::result::Result<Self, DownloaderError> {
        match name {
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            "json-stream" => Ok(OutputFormat::JsonStream),
            other => Err(DownloaderError::Configuration(format!(
                "unsupported query processor '{other}'"
            ))),
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json | OutputFormat::JsonStream => "json",
        }
    }

    fn accept(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "text/csv",
            OutputFormat::Json => "application/json",
            OutputFormat::JsonStream => "application/x-json-stream",
        }
    }
}

/// A processor ready to run
#[derive(Debug, Clone)]
struct Query {
    format: OutputFormat,
    query_path: String,
    output_path: PathBuf,
}

/// Bag settings after normalization
#[derive(Debug, Clone)]
struct BagSettings {
    name: String,
}

/// Downloader that talks to the catalog's REST interface
#[derive(Debug, Clone)]
pub struct CatalogDownloader {
    client: reqwest::Client,
    cookie_name: String,
}

impl CatalogDownloader {
    /// Create a downloader that sends session tokens in cookie `cookie_name`
    pub fn new(cookie_name: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("catalog-export/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            cookie_name: cookie_name.into(),
        })
    }

    async fn run_query(
        &self,
        request: &DownloadRequest,
        query: &Query,
        target: &Path,
        written: &mut u64,
    ) -> std::result::Result<(), DownloaderError> {
        let url = format!(
            "{}/ermrest/catalog/{}{}",
            request.server.base_url(),
            request.server.catalog_id,
            query.query_path
        );
        request.log.info(format!("Fetching {url}"));

        let mut builder = self
            .client
            .get(&url)
            .timeout(request.timeout)
            .header(reqwest::header::ACCEPT, query.format.accept())
            .header("X-Request-Id", &request.context_id);
        builder = match &request.credential {
            Credential::Session(token) => builder.header(
                reqwest::header::COOKIE,
                format!("{}={}", self.cookie_name, token),
            ),
            Credential::Bearer(token) => builder.bearer_auth(token),
            Credential::Basic { username, password } => {
                builder.basic_auth(username, Some(password))
            }
            Credential::Anonymous => builder,
        };

        let mut response = builder
            .send()
            .await
            .map_err(|e| DownloaderError::Failed(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &url, body.trim()));
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(target).await?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| DownloaderError::Failed(format!("reading {url} failed: {e}")))?
        {
            *written += chunk.len() as u64;
            if let Some(limit) = request.max_payload_bytes
                && *written > limit
            {
                return Err(DownloaderError::PayloadTooLarge { limit });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        request
            .log
            .info(format!("Wrote {} ({} bytes total)", target.display(), written));
        Ok(())
    }
}

#[async_trait]
impl Downloader for CatalogDownloader {
    async fn download(
        &self,
        request: DownloadRequest,
    ) -> std::result::Result<Vec<Artifact>, DownloaderError> {
        let queries = parse_queries(&request.spec)?;
        let bag = parse_bag(&request.spec)?;

        if matches!(request.credential, Credential::Anonymous) && !request.allow_anonymous {
            return Err(DownloaderError::Authentication(
                "anonymous catalog access is not permitted".into(),
            ));
        }

        let data_dir = match &bag {
            Some(bag) => request.output_dir.join(&bag.name).join("data"),
            None => request.output_dir.clone(),
        };
        tokio::fs::create_dir_all(&data_dir).await?;

        let mut written = 0u64;
        let mut outputs = Vec::with_capacity(queries.len());
        for query in &queries {
            // Loose files are served by basename, so they sit flat in the job directory
            let target = match (&bag, query.output_path.file_name()) {
                (None, Some(name)) => data_dir.join(name),
                _ => data_dir.join(&query.output_path),
            };
            if outputs.contains(&target) {
                return Err(DownloaderError::Configuration(format!(
                    "two query processors write {}",
                    target.display()
                )));
            }
            self.run_query(&request, query, &target, &mut written)
                .await?;
            outputs.push(target);
        }

        let Some(bag) = bag else {
            return Ok(outputs
                .into_iter()
                .map(|path| {
                    let id = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    Artifact::local(id, path)
                })
                .collect());
        };

        let bag_dir = request.output_dir.join(&bag.name);
        let archive = request.output_dir.join(format!("{}.zip", bag.name));
        {
            let bag_dir = bag_dir.clone();
            let archive = archive.clone();
            tokio::task::spawn_blocking(move || finalize_bag(&bag_dir, &archive))
                .await
                .map_err(|e| DownloaderError::Failed(format!("archiving task failed: {e}")))??;
        }
        if let Err(e) = tokio::fs::remove_dir_all(&bag_dir).await {
            request
                .log
                .warn(format!("Could not remove bag staging directory: {e}"));
        }
        request
            .log
            .info(format!("Created bag archive {}", archive.display()));

        Ok(vec![Artifact::local(bag.name, archive)])
    }
}

/// Map a non-success catalog status to the downloader taxonomy
fn status_error(status: reqwest::StatusCode, url: &str, body: &str) -> DownloaderError {
    let message = if body.is_empty() {
        format!("{url} returned {status}")
    } else {
        format!("{url} returned {status}: {body}")
    };
    match status.as_u16() {
        401 => DownloaderError::Authentication(message),
        403 => DownloaderError::Authorization(message),
        400 | 404 | 409 => DownloaderError::Configuration(message),
        _ => DownloaderError::Failed(message),
    }
}

fn parse_queries(spec: &serde_json::Value) -> std::result::Result<Vec<Query>, DownloaderError> {
    let raw = spec
        .get("catalog")
        .and_then(|c| c.get("query_processors"))
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    let processors: Vec<QueryProcessor> = if raw.is_null() {
        Vec::new()
    } else {
        serde_json::from_value(raw).map_err(|e| {
            DownloaderError::Configuration(format!("invalid query_processors: {e}"))
        })?
    };
    if processors.is_empty() {
        return Err(DownloaderError::Configuration(
            "no query processors specified".into(),
        ));
    }

    processors
        .into_iter()
        .enumerate()
        .map(|(index, processor)| {
            let format = OutputFormat::parse(&processor.processor)?;
            let query_path = processor
                .processor_params
                .query_path
                .filter(|p| p.starts_with('/'))
                .ok_or_else(|| {
                    DownloaderError::Configuration(format!(
                        "query processor {index} needs a query_path starting with '/'"
                    ))
                })?;
            let output_path = processor
                .processor_params
                .output_path
                .ok_or_else(|| {
                    DownloaderError::Configuration(format!(
                        "query processor {index} needs an output_path"
                    ))
                })
                .and_then(|p| safe_relative_path(&p))?;
            let mut file_name = output_path.into_os_string();
            file_name.push(".");
            file_name.push(format.extension());
            let output_path = PathBuf::from(file_name);
            Ok(Query {
                format,
                query_path,
                output_path,
            })
        })
        .collect()
}

fn parse_bag(spec: &serde_json::Value) -> std::result::Result<Option<BagSettings>, DownloaderError> {
    let Some(bag) = spec.get("bag") else {
        return Ok(None);
    };
    let archiver = bag
        .get("bag_archiver")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(SUPPORTED_ARCHIVER);
    if archiver != SUPPORTED_ARCHIVER {
        return Err(DownloaderError::Configuration(format!(
            "unsupported bag_archiver '{archiver}'"
        )));
    }
    let name = bag
        .get("bag_name")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(DEFAULT_BAG_NAME);
    let name = safe_relative_path(name)?;
    if name.components().count() != 1 {
        return Err(DownloaderError::Configuration(format!(
            "bag_name '{}' must be a plain name",
            name.display()
        )));
    }
    Ok(Some(BagSettings {
        name: name.to_string_lossy().into_owned(),
    }))
}

/// Accept only relative paths made of normal components
fn safe_relative_path(raw: &str) -> std::result::Result<PathBuf, DownloaderError> {
    let path = Path::new(raw);
    let safe = !raw.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(name) if !name.to_string_lossy().starts_with('.')));
    if safe {
        Ok(path.to_path_buf())
    } else {
        Err(DownloaderError::Configuration(format!(
            "output path '{raw}' must be relative and stay inside the export"
        )))
    }
}

/// Write BagIt tag files into `bag_dir` and archive it as `archive`
fn finalize_bag(bag_dir: &Path, archive: &Path) -> std::result::Result<(), DownloaderError> {
    let data_dir = bag_dir.join("data");
    let mut manifest = String::new();
    for entry in sorted_files(&data_dir)? {
        let digest = sha256_file(&entry)?;
        let relative = entry.strip_prefix(bag_dir).unwrap_or(&entry);
        manifest.push_str(&format!("{digest}  {}\n", relative.display()));
    }
    std::fs::write(
        bag_dir.join("bagit.txt"),
        "BagIt-Version: 0.97\nTag-File-Character-Encoding: UTF-8\n",
    )?;
    std::fs::write(bag_dir.join("manifest-sha256.txt"), manifest)?;

    let base = bag_dir.parent().unwrap_or(bag_dir);
    let mut writer = zip::ZipWriter::new(std::fs::File::create(archive)?);
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for path in sorted_files(bag_dir)? {
        let name = path
            .strip_prefix(base)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        writer.start_file(name, options)?;
        let mut source = std::fs::File::open(&path)?;
        std::io::copy(&mut source, &mut writer)?;
    }
    writer.finish()?.flush()?;
    Ok(())
}

fn sorted_files(root: &Path) -> std::result::Result<Vec<PathBuf>, DownloaderError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| DownloaderError::Failed(e.to_string()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn sha256_file(path: &Path) -> std::result::Result<String, DownloaderError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}
