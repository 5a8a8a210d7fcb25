use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use clap::Args;
use thiserror::Error;

use job_location_core::{LocationInheritanceResolver, LocationRecord, Resolution};

#[derive(Debug, Args)]
pub struct DeriveArgs {
    /// File holding the business location JSON; stdin when omitted.
    #[arg(long)]
    pub file: Option<PathBuf>,
    /// Employer-supplied address that takes precedence over composition.
    #[arg(long)]
    pub address: Option<String>,
    /// Provenance actor stamped on the copied location.
    #[arg(long)]
    pub actor: Option<String>,
}

#[derive(Debug, Error)]
pub enum DeriveError {
    #[error("failed to read {source_name}: {source}")]
    Read {
        source_name: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid location document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Runs the job-creation path of the resolver for a single location document.
pub fn derive(
    args: &DeriveArgs,
    default_actor: &str,
    resolver: &LocationInheritanceResolver,
) -> Result<Resolution, DeriveError> {
    let raw = match &args.file {
        Some(path) => read_file(path)?,
        None => read_stdin()?,
    };
    let location = parse_location(&raw)?;
    let actor = args
        .actor
        .as_deref()
        .filter(|actor| !actor.trim().is_empty())
        .unwrap_or(default_actor);

    tracing::debug!(stage = "resolver", actor, has_location = location.is_some(), "deriving address");
    Ok(resolver.resolve(args.address.as_deref(), location.as_ref(), actor))
}

/// Empty input and `null` both mean "no business location".
fn parse_location(raw: &str) -> Result<Option<LocationRecord>, DeriveError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    Ok(serde_json::from_str(raw)?)
}

fn read_file(path: &Path) -> Result<String, DeriveError> {
    fs::read_to_string(path).map_err(|source| DeriveError::Read {
        source_name: path.display().to_string(),
        source,
    })
}

fn read_stdin() -> Result<String, DeriveError> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .map_err(|source| DeriveError::Read {
            source_name: "stdin".into(),
            source,
        })?;
    Ok(raw)
}
