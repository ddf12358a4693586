// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Body of one download job.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::engine::{
    DownloadEngine, EngineConfig, EngineError, EngineOptions, OPT_COOKIEDATA, OPT_COOKIEFILE,
    OPT_FORMAT, OPT_NOPLAYLIST, OPT_OUTTMPL,
};

use super::credentials::CredentialFile;
use super::reporter::ProgressReporter;
use super::store::ProgressStore;
use super::types::JobId;

/// Output template relative to the downloads directory.
pub const OUTPUT_TEMPLATE: &str = "%(playlist_index)s - %(title)s.%(ext)s";

/// Default format selection: 720p or the best available.
pub const DEFAULT_FORMAT: &str = "best[height<=720]/best";

/// Settings shared by every job of a dispatcher.
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Where finished files land.
    pub downloads_dir: PathBuf,
    /// Format expression used unless the request overrides it.
    pub default_format: String,
    /// Directory for temporary cookie files. `None` uses the system default.
    pub temp_dir: Option<PathBuf>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            downloads_dir: PathBuf::from("downloads"),
            default_format: DEFAULT_FORMAT.to_string(),
            temp_dir: None,
        }
    }
}

impl JobSettings {
    /// Configuration every job starts from before caller options apply.
    pub fn baseline(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.set(
            OPT_OUTTMPL,
            self.downloads_dir.join(OUTPUT_TEMPLATE).to_string_lossy().into_owned(),
        );
        config.set(OPT_FORMAT, self.default_format.clone());
        config.set(OPT_NOPLAYLIST, true);
        config
    }

    /// Merge caller options over the baseline.
    ///
    /// Inline `cookiedata` is moved into a temporary file and replaced by a
    /// `cookiefile` reference; the returned guard owns that file.
    pub fn prepare(
        &self,
        mut options: EngineOptions,
    ) -> Result<(EngineConfig, Option<CredentialFile>), EngineError> {
        let mut config = self.baseline();

        let credentials = match options.remove(OPT_COOKIEDATA) {
            None | Some(Value::Null) => None,
            Some(Value::String(data)) if data.is_empty() => None,
            Some(Value::String(data)) => {
                let file = match &self.temp_dir {
                    Some(dir) => CredentialFile::create_in(dir, &data),
                    None => CredentialFile::create(&data),
                }
                .map_err(EngineError::Credentials)?;
                config.set(OPT_COOKIEFILE, file.path().to_string_lossy().into_owned());
                Some(file)
            }
            Some(_) => {
                return Err(EngineError::Rejected(format!(
                    "option `{}` must be a string",
                    OPT_COOKIEDATA
                )));
            }
        };

        config.merge(options);
        Ok((config, credentials))
    }
}

/// Everything one job needs, moved onto the job's own thread.
pub struct JobRunner {
    id: JobId,
    url: String,
    options: EngineOptions,
    store: ProgressStore,
    engine: Arc<dyn DownloadEngine>,
    settings: Arc<JobSettings>,
}

impl JobRunner {
    pub fn new(
        id: JobId,
        url: impl Into<String>,
        options: EngineOptions,
        store: ProgressStore,
        engine: Arc<dyn DownloadEngine>,
        settings: Arc<JobSettings>,
    ) -> Self {
        Self {
            id,
            url: url.into(),
            options,
            store,
            engine,
            settings,
        }
    }

    /// Run the job to completion on the current thread.
    ///
    /// Blocks for the whole transfer. Every outcome ends up in the store;
    /// nothing is returned to the caller.
    pub fn run(self) {
        let Self {
            id,
            url,
            options,
            store,
            engine,
            settings,
        } = self;
        let span = tracing::info_span!("job", id = %id);
        let _entered = span.enter();

        let (config, credentials) = match settings.prepare(options) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!(error = %e, "Download failed before start");
                store.fail(&id, e.to_string());
                return;
            }
        };

        store.register(&id);

        tracing::info!(url = %url, engine = engine.name(), "Starting download");
        let mut reporter = ProgressReporter::new(id.clone(), store.clone());
        let result = engine.download(&url, &config, &mut |event| reporter.report(event));

        match result {
            Ok(()) => tracing::info!("Engine run completed"),
            Err(e) => {
                tracing::error!(error = %e, "Download failed");
                store.fail(&id, e.to_string());
            }
        }

        if let Some(credentials) = credentials {
            credentials.release();
        }
    }
}
