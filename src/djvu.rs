//! DJVU→PDF conversion via the external `ddjvu` tool (djvulibre).
//!
//! DJVU is the only non-PDF input the pipeline accepts, and it is handled by
//! materializing a PDF counterpart up front; every later stage (planning,
//! splitting, submission, reconciliation) then keys off the converted file's
//! `{base}_converted` name and never needs to know the source format.

use crate::error::Chunk2MdError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

/// Name of the converted PDF for a DJVU source, e.g. `scan.djvu` →
/// `scan_converted.pdf`. The `_converted` suffix keeps the converted file's
/// chunk identities distinct from any sibling `scan.pdf`.
pub fn converted_pdf_name(djvu_path: &Path) -> String {
    let base = djvu_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{base}_converted.pdf")
}

/// Convert a DJVU file to PDF, writing `output_pdf`.
///
/// Runs `ddjvu -format=pdf -quality=85` with a timeout. A missing binary is
/// reported as [`Chunk2MdError::ToolNotInstalled`] with install hints; an
/// exit failure or an empty output file is [`Chunk2MdError::ConversionFailed`].
pub async fn convert_djvu_to_pdf(
    djvu_path: &Path,
    output_pdf: &Path,
    timeout_secs: u64,
) -> Result<PathBuf, Chunk2MdError> {
    if !djvu_path.exists() {
        return Err(Chunk2MdError::FileNotFound {
            path: djvu_path.into(),
        });
    }
    if let Some(parent) = output_pdf.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Chunk2MdError::persistence(parent, e))?;
    }

    info!(
        source = %djvu_path.display(),
        target = %output_pdf.display(),
        "converting DJVU to PDF"
    );

    let child = Command::new("ddjvu")
        .arg("-format=pdf")
        .arg("-quality=85")
        .arg(djvu_path)
        .arg(output_pdf)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn();

    let child = match child {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Chunk2MdError::ToolNotInstalled {
                tool: "ddjvu".into(),
            });
        }
        Err(e) => {
            return Err(Chunk2MdError::ConversionFailed {
                path: djvu_path.into(),
                detail: e.to_string(),
            });
        }
    };

    let output = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        child.wait_with_output(),
    )
    .await
    .map_err(|_| Chunk2MdError::ConversionTimeout {
        path: djvu_path.into(),
        secs: timeout_secs,
    })?
    .map_err(|e| Chunk2MdError::ConversionFailed {
        path: djvu_path.into(),
        detail: e.to_string(),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(code = ?output.status.code(), %stderr, "ddjvu failed");
        return Err(Chunk2MdError::ConversionFailed {
            path: djvu_path.into(),
            detail: format!("ddjvu exited with {}: {}", output.status, stderr.trim()),
        });
    }

    let produced = std::fs::metadata(output_pdf)
        .map(|m| m.len())
        .unwrap_or(0);
    if produced == 0 {
        return Err(Chunk2MdError::ConversionFailed {
            path: djvu_path.into(),
            detail: "ddjvu produced no output".into(),
        });
    }

    info!(bytes = produced, "DJVU conversion complete");
    Ok(output_pdf.into())
}
