//! Command-line client for operating a Clipforge job store directly.

use std::fmt::{self, Display, Formatter};

use clap::{Parser, Subcommand, ValueEnum};
use clipforge_core::{JobStatus, JobStore};
use uuid::Uuid;

use crate::context::{CliDependencies, CliError, CliResult};
use crate::output::{render_job_detail, render_job_list};

const DEFAULT_QUEUE_URL: &str = "postgres://localhost/clipforge";

/// Parses CLI arguments, executes the requested command, and returns the
/// process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    let output = cli.output;

    let deps = match CliDependencies::connect(&cli.queue_url).await {
        Ok(deps) => deps,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            return err.exit_code();
        }
    };

    match dispatch(cli.command, &deps, output).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

async fn dispatch(command: Command, deps: &CliDependencies, output: OutputFormat) -> CliResult<()> {
    match command {
        Command::List(args) => handle_list(deps, args, output).await,
        Command::Get(args) => handle_get(deps, args, output).await,
        Command::Retry(args) => handle_retry(deps, args).await,
        Command::Kill(args) => handle_kill(deps, args).await,
        Command::Pause => handle_pause(deps).await,
        Command::Resume => handle_resume(deps).await,
        Command::Drain => handle_drain(deps).await,
        Command::Obliterate(args) => handle_obliterate(deps, args).await,
    }
}

#[derive(Parser)]
#[command(
    name = "clipforge",
    about = "Administrative CLI for the Clipforge import pipeline's job store"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "CLIPFORGE_QUEUE_URL",
        default_value = DEFAULT_QUEUE_URL
    )]
    queue_url: String,
    #[arg(
        long = "output",
        alias = "format",
        global = true,
        value_enum,
        default_value_t = OutputFormat::Table,
        help = "Select output format for commands that render structured data"
    )]
    output: OutputFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List jobs, optionally filtered by status.
    List(ListArgs),
    /// Fetch a single job's full detail, including its recorded log lines.
    Get(JobIdArgs),
    /// Re-arm a failed or delayed job for another attempt.
    Retry(JobIdArgs),
    /// Cancel an active job without notifying the catalog.
    Kill(JobIdArgs),
    /// Stop leasing new jobs without disturbing jobs already in flight.
    Pause,
    /// Resume leasing after a pause.
    Resume,
    /// Remove every waiting job, leaving active and delayed jobs to finish.
    Drain,
    /// Irrecoverably erase all job state.
    Obliterate(ObliterateArgs),
}

#[derive(clap::Args)]
struct ListArgs {
    /// Restrict the listing to a single status.
    #[arg(long, value_enum)]
    status: Option<JobStatusArg>,
}

#[derive(clap::Args)]
struct JobIdArgs {
    /// Job identifier.
    job_id: Uuid,
}

#[derive(clap::Args)]
struct ObliterateArgs {
    /// Required to proceed while any job is still active.
    #[arg(long)]
    force: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum JobStatusArg {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}

impl From<JobStatusArg> for JobStatus {
    fn from(value: JobStatusArg) -> Self {
        match value {
            JobStatusArg::Waiting => Self::Waiting,
            JobStatusArg::Active => Self::Active,
            JobStatusArg::Delayed => Self::Delayed,
            JobStatusArg::Completed => Self::Completed,
            JobStatusArg::Failed => Self::Failed,
        }
    }
}

/// Output format shared across commands that render structured data.
#[derive(Clone, Copy, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Human-readable table/key-value output.
    Table,
    /// Pretty-printed JSON.
    Json,
}

impl Display for OutputFormat {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Table => "table",
            Self::Json => "json",
        })
    }
}

async fn handle_list(deps: &CliDependencies, args: ListArgs, output: OutputFormat) -> CliResult<()> {
    let status = args.status.map(JobStatus::from);
    let jobs = deps
        .store
        .list(status)
        .await
        .map_err(CliError::failure)?;
    render_job_list(&jobs, output)
}

async fn handle_get(deps: &CliDependencies, args: JobIdArgs, output: OutputFormat) -> CliResult<()> {
    let job = fetch_job(deps.store.as_ref(), args.job_id).await?;
    let logs = deps
        .store
        .logs(args.job_id)
        .await
        .map_err(CliError::failure)?;
    render_job_detail(&job, &logs, output)
}

async fn handle_retry(deps: &CliDependencies, args: JobIdArgs) -> CliResult<()> {
    fetch_job(deps.store.as_ref(), args.job_id).await?;
    deps.store
        .retry(args.job_id)
        .await
        .map_err(CliError::failure)?;
    println!("job {} re-armed for another attempt", args.job_id);
    Ok(())
}

async fn handle_kill(deps: &CliDependencies, args: JobIdArgs) -> CliResult<()> {
    fetch_job(deps.store.as_ref(), args.job_id).await?;
    deps.store
        .kill_active(args.job_id)
        .await
        .map_err(CliError::failure)?;
    println!("job {} killed", args.job_id);
    Ok(())
}

async fn handle_pause(deps: &CliDependencies) -> CliResult<()> {
    deps.store.pause().await.map_err(CliError::failure)?;
    println!("dispatcher paused: no new jobs will be leased");
    Ok(())
}

async fn handle_resume(deps: &CliDependencies) -> CliResult<()> {
    deps.store.resume().await.map_err(CliError::failure)?;
    println!("dispatcher resumed");
    Ok(())
}

async fn handle_drain(deps: &CliDependencies) -> CliResult<()> {
    deps.store.drain().await.map_err(CliError::failure)?;
    println!("dispatcher drained: all waiting jobs removed");
    Ok(())
}

async fn handle_obliterate(deps: &CliDependencies, args: ObliterateArgs) -> CliResult<()> {
    deps.store
        .obliterate(args.force)
        .await
        .map_err(CliError::failure)?;
    println!("job store obliterated");
    Ok(())
}

async fn fetch_job(store: &dyn JobStore, job_id: Uuid) -> CliResult<clipforge_core::Job> {
    store
        .get(job_id)
        .await
        .map_err(CliError::failure)?
        .ok_or_else(|| CliError::validation(format!("job {job_id} not found")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use clipforge_core::{
        ClipforgeResult, Job, JobCompletion, JobSpec, JobStore, Progress, SourceKind,
    };
    use chrono::Utc;

    use super::*;

    #[derive(Default)]
    struct InMemoryJobStore {
        jobs: Mutex<HashMap<Uuid, Job>>,
        paused: Mutex<bool>,
    }

    impl InMemoryJobStore {
        fn with_job(job: Job) -> Self {
            let store = Self::default();
            store.jobs.lock().expect("lock poisoned").insert(job.id, job);
            store
        }
    }

    fn sample_job(status: JobStatus) -> Job {
        Job {
            id: Uuid::new_v4(),
            request_id: "req-1".into(),
            source_kind: SourceKind::Url,
            source_ref: "https://example.com/video.mp4".into(),
            file_name: Some("video.mp4".into()),
            catalog_id: None,
            api_key: None,
            status,
            attempts_made: 0,
            max_attempts: 3,
            progress: Progress::default(),
            return_value: None,
            failure_reason: None,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn submit(&self, _spec: JobSpec) -> ClipforgeResult<Job> {
            unimplemented!("not exercised by the CLI")
        }

        async fn lease(
            &self,
            _worker_id: &str,
            _timeout: std::time::Duration,
        ) -> ClipforgeResult<Option<Job>> {
            Ok(None)
        }

        async fn complete(&self, _job_id: Uuid, _result: JobCompletion) -> ClipforgeResult<()> {
            Ok(())
        }

        async fn fail(&self, _job_id: Uuid, _reason: String, _retryable: bool) -> ClipforgeResult<()> {
            Ok(())
        }

        async fn extend_lease(&self, _job_id: Uuid, _worker_id: &str) -> ClipforgeResult<()> {
            Ok(())
        }

        async fn report_progress(&self, _job_id: Uuid, _progress: Progress) -> ClipforgeResult<()> {
            Ok(())
        }

        async fn retry(&self, job_id: Uuid) -> ClipforgeResult<()> {
            let mut jobs = self.jobs.lock().expect("lock poisoned");
            if let Some(job) = jobs.get_mut(&job_id) {
                job.status = JobStatus::Waiting;
            }
            Ok(())
        }

        async fn kill_active(&self, job_id: Uuid) -> ClipforgeResult<()> {
            let mut jobs = self.jobs.lock().expect("lock poisoned");
            if let Some(job) = jobs.get_mut(&job_id) {
                job.status = JobStatus::Failed;
            }
            Ok(())
        }

        async fn get(&self, job_id: Uuid) -> ClipforgeResult<Option<Job>> {
            Ok(self.jobs.lock().expect("lock poisoned").get(&job_id).cloned())
        }

        async fn list(&self, status: Option<JobStatus>) -> ClipforgeResult<Vec<Job>> {
            Ok(self
                .jobs
                .lock()
                .expect("lock poisoned")
                .values()
                .filter(|job| status.is_none_or(|wanted| job.status == wanted))
                .cloned()
                .collect())
        }

        async fn counts_by_status(&self) -> ClipforgeResult<HashMap<JobStatus, u64>> {
            Ok(HashMap::new())
        }

        async fn logs(&self, _job_id: Uuid) -> ClipforgeResult<Vec<String>> {
            Ok(vec!["fetched 10MiB".into()])
        }

        async fn pause(&self) -> ClipforgeResult<()> {
            *self.paused.lock().expect("lock poisoned") = true;
            Ok(())
        }

        async fn resume(&self) -> ClipforgeResult<()> {
            *self.paused.lock().expect("lock poisoned") = false;
            Ok(())
        }

        async fn drain(&self) -> ClipforgeResult<()> {
            self.jobs
                .lock()
                .expect("lock poisoned")
                .retain(|_, job| job.status != JobStatus::Waiting);
            Ok(())
        }

        async fn obliterate(&self, _force: bool) -> ClipforgeResult<()> {
            self.jobs.lock().expect("lock poisoned").clear();
            Ok(())
        }
    }

    #[tokio::test]
    async fn retry_rearms_a_known_job() {
        let job = sample_job(JobStatus::Failed);
        let job_id = job.id;
        let store = InMemoryJobStore::with_job(job);

        store.retry(job_id).await.expect("retry should succeed");

        let refreshed = store.get(job_id).await.expect("get should succeed").expect("job present");
        assert_eq!(refreshed.status, JobStatus::Waiting);
    }

    #[tokio::test]
    async fn fetch_job_reports_not_found_as_validation_error() {
        let store = InMemoryJobStore::default();
        let err = fetch_job(&store, Uuid::new_v4())
            .await
            .expect_err("missing job should fail");
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn fetch_job_returns_the_stored_job() {
        let job = sample_job(JobStatus::Active);
        let job_id = job.id;
        let store = InMemoryJobStore::with_job(job);

        let found = fetch_job(&store, job_id).await.expect("job should be found");
        assert_eq!(found.id, job_id);
    }

    #[tokio::test]
    async fn list_filters_by_requested_status() {
        let store = InMemoryJobStore::default();
        {
            let mut jobs = store.jobs.lock().expect("lock poisoned");
            let waiting = sample_job(JobStatus::Waiting);
            let active = sample_job(JobStatus::Active);
            jobs.insert(waiting.id, waiting);
            jobs.insert(active.id, active);
        }

        let waiting_only = store
            .list(Some(JobStatus::Waiting))
            .await
            .expect("list should succeed");
        assert_eq!(waiting_only.len(), 1);
        assert_eq!(waiting_only[0].status, JobStatus::Waiting);
    }

    #[tokio::test]
    async fn drain_removes_waiting_jobs_but_leaves_active_ones() {
        let store = InMemoryJobStore::default();
        let waiting_id;
        let active_id;
        {
            let mut jobs = store.jobs.lock().expect("lock poisoned");
            let waiting = sample_job(JobStatus::Waiting);
            let active = sample_job(JobStatus::Active);
            waiting_id = waiting.id;
            active_id = active.id;
            jobs.insert(waiting.id, waiting);
            jobs.insert(active.id, active);
        }

        store.drain().await.expect("drain should succeed");

        assert!(store.get(waiting_id).await.expect("get should succeed").is_none());
        assert!(store.get(active_id).await.expect("get should succeed").is_some());
    }

    #[test]
    fn job_status_arg_maps_onto_job_status() {
        assert_eq!(JobStatus::from(JobStatusArg::Delayed), JobStatus::Delayed);
        assert_eq!(JobStatus::from(JobStatusArg::Completed), JobStatus::Completed);
    }

    #[test]
    fn output_format_displays_as_lowercase_tokens() {
        assert_eq!(OutputFormat::Table.to_string(), "table");
        assert_eq!(OutputFormat::Json.to_string(), "json");
    }
}
