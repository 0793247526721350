//! `fencer quota`: Show the project ID and quota of a directory.

use std::path::PathBuf;

use clap::Args;
use fencer_core::quota::{QuotaInfo, xfs};
use serde::Serialize;

use crate::output::{format_bytes, format_limit};

/// Arguments for the `quota` command.
#[derive(Args, Debug)]
pub struct QuotaArgs {
    /// Directory to inspect.
    pub path: PathBuf,

    /// Print the record as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct QuotaReport {
    path: PathBuf,
    xfs: bool,
    project_id: Option<u32>,
    quota: Option<QuotaInfo>,
}

/// Executes the `quota` command.
///
/// # Errors
///
/// Returns an error if the path is on XFS but its attributes or quota
/// record cannot be read.
pub fn execute(args: &QuotaArgs) -> anyhow::Result<()> {
    let xfs = xfs::is_path_xfs(&args.path);
    let project_id = if xfs {
        xfs::get_project_id(&args.path)?
    } else {
        None
    };
    let quota = match project_id {
        Some(id) => xfs::get_project_quota(&args.path, id)?,
        None => None,
    };
    let report = QuotaReport {
        path: args.path.clone(),
        xfs,
        project_id,
        quota,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if !report.xfs {
        println!("{} is not on an XFS filesystem.", report.path.display());
        return Ok(());
    }
    let Some(project_id) = report.project_id else {
        println!("{} has no project ID.", report.path.display());
        return Ok(());
    };
    println!("Project ID:  {project_id}");
    match report.quota {
        Some(quota) => {
            println!("Soft limit:  {}", format_limit(quota.soft_limit));
            println!("Hard limit:  {}", format_limit(quota.hard_limit));
            println!("Used:        {}", format_bytes(quota.used));
        }
        None => println!("No quota record."),
    }
    Ok(())
}
