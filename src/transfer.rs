// Transfer sequencer: lists the source folder, then walks the resulting
// jobs strictly in order, downloading each file to a local staging path
// and uploading it into the destination folder before touching the next.

use crate::api::{CreatedFile, DriveApi, FileMetadata, RemoteFile};
use crate::config::{FailurePolicy, TransferConfig};
use crate::error::{ApiError, DownloadError, ListError, TransferError, UploadError};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Content type used for every upload; the destination keeps no type hint.
pub const UPLOAD_MIME_TYPE: &str = "application/octet-stream";

/// One file to copy: where it comes from, where it goes, and where it is
/// staged locally in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    pub file: RemoteFile,
    pub source_container_id: String,
    pub destination_container_id: String,
    pub local_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CompletedTransfer {
    pub job: TransferJob,
    pub created_id: String,
    pub bytes: u64,
}

#[derive(Debug)]
pub struct FailedTransfer {
    pub job: TransferJob,
    pub error: TransferError,
}

/// Outcome of a run that was allowed to finish.
#[derive(Debug, Default)]
pub struct TransferReport {
    pub completed: Vec<CompletedTransfer>,
    pub failed: Vec<FailedTransfer>,
}

impl TransferReport {
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.failed.is_empty()
    }
}

/// Progress notifications. All methods default to doing nothing.
pub trait TransferObserver {
    fn listed(&mut self, _files: &[RemoteFile]) {}
    fn no_files(&mut self) {}
    fn job_started(&mut self, _job: &TransferJob) {}
    fn download_progress(&mut self, _job: &TransferJob, _fraction: f64) {}
    fn downloaded(&mut self, _job: &TransferJob, _bytes: u64) {}
    fn uploaded(&mut self, _job: &TransferJob, _created_id: &str) {}
    fn job_failed(&mut self, _job: &TransferJob, _error: &TransferError) {}
    /// Consulted under `FailurePolicy::Ask`.
    fn continue_after_failure(&mut self, _job: &TransferJob, _error: &TransferError) -> bool {
        false
    }
}

/// Observer that ignores everything.
pub struct Silent;

impl TransferObserver for Silent {}

/// Copy every file of the source folder into the destination folder.
///
/// Under `FailurePolicy::Abort` the first failing job ends the run with
/// that job's error; files already uploaded stay where they are.
pub fn run<A, O>(
    api: &A,
    config: &TransferConfig,
    observer: &mut O,
) -> Result<TransferReport, TransferError>
where
    A: DriveApi + ?Sized,
    O: TransferObserver + ?Sized,
{
    let files = list_source_files(api, &config.source_container_id)?;
    let mut report = TransferReport::default();
    if files.is_empty() {
        info!(source = %config.source_container_id, "no files found in source folder");
        observer.no_files();
        return Ok(report);
    }
    observer.listed(&files);

    let jobs = plan_jobs(files, config);
    info!(count = jobs.len(), "starting transfers");
    for job in jobs {
        observer.job_started(&job);
        match transfer_one(api, &job, config, observer) {
            Ok(done) => report.completed.push(done),
            Err(error) => {
                warn!(file = %job.file.name, error = %error, "transfer failed");
                observer.job_failed(&job, &error);
                let keep_going = match config.on_failure {
                    FailurePolicy::Abort => false,
                    FailurePolicy::Continue => true,
                    FailurePolicy::Ask => observer.continue_after_failure(&job, &error),
                };
                if !keep_going {
                    return Err(error);
                }
                report.failed.push(FailedTransfer { job, error });
            }
        }
    }

    info!(
        completed = report.completed.len(),
        failed = report.failed.len(),
        "transfers finished"
    );
    Ok(report)
}

/// Every file directly under `container_id`, following page tokens.
pub fn list_source_files<A>(api: &A, container_id: &str) -> Result<Vec<RemoteFile>, ListError>
where
    A: DriveApi + ?Sized,
{
    let mut files = Vec::new();
    let mut page_token: Option<String> = None;
    loop {
        let page = api
            .list_files(container_id, page_token.as_deref())
            .map_err(|source| ListError {
                container_id: container_id.to_string(),
                source,
            })?;
        debug!(count = page.files.len(), "listing page");
        files.extend(page.files);
        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => break,
        }
    }
    Ok(files)
}

/// Pair each listed file with the run's containers, in listing order.
pub fn plan_jobs(files: Vec<RemoteFile>, config: &TransferConfig) -> Vec<TransferJob> {
    files
        .into_iter()
        .map(|file| TransferJob {
            local_path: config.download_dir.join(local_file_name(&file.name)),
            file,
            source_container_id: config.source_container_id.clone(),
            destination_container_id: config.destination_container_id.clone(),
        })
        .collect()
}

fn transfer_one<A, O>(
    api: &A,
    job: &TransferJob,
    config: &TransferConfig,
    observer: &mut O,
) -> Result<CompletedTransfer, TransferError>
where
    A: DriveApi + ?Sized,
    O: TransferObserver + ?Sized,
{
    let bytes = download_file(api, job, config.chunk_size, observer)?;
    observer.downloaded(job, bytes);

    let created = upload_file(api, job)?;
    observer.uploaded(job, &created.id);
    info!(file = %job.file.name, created_id = %created.id, bytes, "file copied");

    if config.remove_local {
        if let Err(e) = std::fs::remove_file(&job.local_path) {
            warn!(path = %job.local_path.display(), error = %e, "could not remove staged file");
        }
    }

    Ok(CompletedTransfer {
        job: job.clone(),
        created_id: created.id,
        bytes,
    })
}

/// Pull the file's media chunk by chunk, then write it to the job's local
/// path. Returns the number of bytes written.
pub fn download_file<A, O>(
    api: &A,
    job: &TransferJob,
    chunk_size: u64,
    observer: &mut O,
) -> Result<u64, DownloadError>
where
    A: DriveApi + ?Sized,
    O: TransferObserver + ?Sized,
{
    let remote_err = |source| DownloadError::Remote {
        file_id: job.file.id.clone(),
        name: job.file.name.clone(),
        source,
    };
    let chunk_size = chunk_size.max(1);
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        let offset = buffer.len() as u64;
        let chunk = api
            .download_chunk(&job.file.id, offset, chunk_size)
            .map_err(remote_err)?;
        let received = chunk.bytes.len() as u64;
        buffer.extend_from_slice(&chunk.bytes);
        let offset = buffer.len() as u64;

        let done = match chunk.total_size {
            Some(total) => offset >= total,
            None => received < chunk_size,
        };
        observer.download_progress(job, progress_fraction(offset, chunk.total_size, done));
        if done {
            break;
        }
        if received == 0 {
            return Err(remote_err(ApiError::Malformed(
                "empty chunk before end of media".into(),
            )));
        }
    }

    write_local(&job.local_path, &buffer)?;
    Ok(buffer.len() as u64)
}

/// Upload the staged copy into the destination folder.
pub fn upload_file<A>(api: &A, job: &TransferJob) -> Result<CreatedFile, UploadError>
where
    A: DriveApi + ?Sized,
{
    let media = std::fs::read(&job.local_path).map_err(|source| UploadError::Read {
        path: job.local_path.clone(),
        source,
    })?;
    let metadata = FileMetadata {
        name: job.file.name.clone(),
        parents: vec![job.destination_container_id.clone()],
    };
    api.create_file(&metadata, &media, UPLOAD_MIME_TYPE)
        .map_err(|source| UploadError::Remote {
            name: job.file.name.clone(),
            source,
        })
}

fn write_local(path: &Path, bytes: &[u8]) -> Result<(), DownloadError> {
    let write_err = |source| DownloadError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    std::fs::write(path, bytes).map_err(write_err)
}

fn progress_fraction(received: u64, total: Option<u64>, done: bool) -> f64 {
    match total {
        _ if done => 1.0,
        Some(total) if total > 0 => (received as f64 / total as f64).min(1.0),
        _ => 0.0,
    }
}

/// Remote names may contain path separators; keep a single component.
pub fn local_file_name(remote_name: &str) -> String {
    let cleaned: String = remote_name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => format!("_{cleaned}"),
        _ => cleaned,
    }
}
