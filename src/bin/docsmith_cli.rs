use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docsmith::{
    config, logging,
    processing::{JobState, JobStatus, PipelineCoordinator},
};
use futures_util::future::join_all;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "docsmith-cli",
    about = "Generate documentation for local files without the HTTP server"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process the given files.
    Run {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long)]
        model: String,
    },
    /// Process every file with a matching extension below a directory.
    Batch {
        directory: PathBuf,
        #[arg(long)]
        model: String,
        #[arg(long, default_value = "txt")]
        extension: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    config::init_config();
    logging::init_tracing();

    let (paths, model) = match cli.command {
        Command::Run { paths, model } => (paths, model),
        Command::Batch {
            directory,
            model,
            extension,
        } => (collect_files(&directory, &extension)?, model),
    };
    if paths.is_empty() {
        bail!("No input files found");
    }

    let coordinator = PipelineCoordinator::from_config(config::get_config())
        .context("Failed to build model registry")?;

    let mut submitted = Vec::with_capacity(paths.len());
    for path in paths {
        let job_id = coordinator
            .submit(&path, &model)
            .await
            .with_context(|| format!("Failed to submit {}", path.display()))?;
        submitted.push((path, job_id));
    }

    let outcomes = join_all(
        submitted
            .iter()
            .map(|(path, job_id)| follow(&coordinator, job_id, path)),
    )
    .await;
    let mut failures = 0;
    for outcome in outcomes {
        if outcome?.state != JobState::Success {
            failures += 1;
        }
    }

    if failures > 0 {
        bail!("{failures} of {} jobs failed", submitted.len());
    }
    Ok(())
}

/// Print every status change of `job_id` until it finishes.
async fn follow(coordinator: &PipelineCoordinator, job_id: &str, path: &Path) -> Result<JobStatus> {
    let mut receiver = coordinator.subscribe(job_id)?;
    loop {
        let status = receiver.borrow_and_update().clone();
        println!("{}: {}", path.display(), serde_json::to_string(&status)?);
        if status.state.is_terminal() {
            return Ok(status);
        }
        receiver
            .changed()
            .await
            .with_context(|| format!("Status of job {job_id} is no longer published"))?;
    }
}

fn collect_files(directory: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !directory.is_dir() {
        bail!("{} is not a directory", directory.display());
    }
    let wanted = extension.trim_start_matches('.');
    let mut files: Vec<PathBuf> = WalkDir::new(directory)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
        })
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_collects_matching_files_recursively() {
        let root = std::env::temp_dir().join(format!("docsmith-batch-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(root.join("nested")).expect("dirs");
        std::fs::write(root.join("b.txt"), "b").expect("file");
        std::fs::write(root.join("nested/a.TXT"), "a").expect("file");
        std::fs::write(root.join("skip.md"), "c").expect("file");

        let files = collect_files(&root, ".txt").expect("collect");
        std::fs::remove_dir_all(&root).ok();

        assert_eq!(files, vec![root.join("b.txt"), root.join("nested/a.TXT")]);
    }

    #[test]
    fn batch_rejects_missing_directory() {
        let missing = std::env::temp_dir().join(format!("docsmith-missing-{}", uuid::Uuid::new_v4()));
        assert!(collect_files(&missing, "txt").is_err());
    }
}
